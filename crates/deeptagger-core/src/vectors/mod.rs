//! # Embedding Vector Store
//!
//! Loads pretrained vectors from polyglot, word2vec, fastText or GloVe files
//! into a single [`VectorTable`] with its own token ↔ row mapping. Lookups
//! translate special tokens through a [`TokenMap`] and fall back to freshly
//! sampled vectors for tokens the file does not contain.

pub mod cache;
mod registry;

#[cfg(feature = "glove")]
mod glove;
#[cfg(feature = "polyglot")]
mod polyglot;
#[cfg(feature = "word2vec")]
mod word2vec;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use candle_core::{Device, Tensor};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TaggerError};
use crate::vocab::{SpecialTokens, Vocabulary};

pub use registry::{RawVectors, ReaderRegistry, VectorReader};

/// On-disk layout of a pretrained embedding file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingFormat {
    /// Pickled `(words, matrix)` archive.
    Polyglot,
    /// `count dim` header, then binary or text rows.
    Word2Vec,
    /// Same layout as word2vec.
    FastText,
    /// Headerless text rows.
    Glove,
}

impl EmbeddingFormat {
    pub fn all() -> &'static [EmbeddingFormat] {
        &[
            EmbeddingFormat::Polyglot,
            EmbeddingFormat::Word2Vec,
            EmbeddingFormat::FastText,
            EmbeddingFormat::Glove,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingFormat::Polyglot => "polyglot",
            EmbeddingFormat::Word2Vec => "word2vec",
            EmbeddingFormat::FastText => "fasttext",
            EmbeddingFormat::Glove => "glove",
        }
    }
}

impl fmt::Display for EmbeddingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingFormat {
    type Err = TaggerError;

    fn from_str(s: &str) -> Result<Self> {
        EmbeddingFormat::all()
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TaggerError::Format(s.to_string()))
    }
}

/// Distribution used for tokens absent from the vector file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnkInit {
    Zeros,
    Normal { mean: f32, std: f32 },
    Uniform { low: f32, high: f32 },
}

impl Default for UnkInit {
    fn default() -> Self {
        UnkInit::Normal {
            mean: 0.0,
            std: 1.0,
        }
    }
}

impl UnkInit {
    fn sample(&self, rng: &mut Rand32, dim: usize) -> Vec<f32> {
        match *self {
            UnkInit::Zeros => vec![0.0; dim],
            UnkInit::Uniform { low, high } => (0..dim)
                .map(|_| low + (high - low) * rng.rand_float())
                .collect(),
            UnkInit::Normal { mean, std } => (0..dim)
                .map(|_| {
                    // Box-Muller; 1 - u keeps the log argument in (0, 1].
                    let u1 = 1.0 - rng.rand_float();
                    let u2 = rng.rand_float();
                    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
                    mean + std * z
                })
                .collect(),
        }
    }
}

/// Maps vocabulary spellings of special tokens to a file's spellings.
/// Every other token maps to itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    mapping: HashMap<String, String>,
}

impl TokenMap {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Polyglot spells its specials `<UNK>`, `<PAD>`, `<S>` and `</S>`.
    pub fn polyglot(specials: &SpecialTokens) -> Self {
        Self::identity()
            .with(&specials.unk, "<UNK>")
            .with(&specials.pad, "<PAD>")
            .with(&specials.start, "<S>")
            .with(&specials.stop, "</S>")
    }

    pub fn with(mut self, from: &str, to: &str) -> Self {
        self.mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn apply<'a>(&'a self, token: &'a str) -> &'a str {
        self.mapping.get(token).map(String::as_str).unwrap_or(token)
    }
}

/// Options for [`VectorTable::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Binary rows for word2vec/fastText; ignored by the other formats.
    pub binary: bool,
    pub token_map: TokenMap,
    pub unk_init: UnkInit,
    /// Seed for unknown-token sampling; `None` draws a fresh seed.
    pub seed: Option<u64>,
    /// Directory for the normalized cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Ignore an existing cache and rewrite it.
    pub refresh_cache: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            binary: true,
            token_map: TokenMap::identity(),
            unk_init: UnkInit::default(),
            seed: None,
            cache_dir: None,
            refresh_cache: false,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the token map a format expects.
    pub fn for_format(format: EmbeddingFormat, specials: &SpecialTokens) -> Self {
        let token_map = match format {
            EmbeddingFormat::Polyglot => TokenMap::polyglot(specials),
            _ => TokenMap::identity(),
        };
        Self {
            token_map,
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_token_map(mut self, token_map: TokenMap) -> Self {
        self.token_map = token_map;
        self
    }

    pub fn with_unk_init(mut self, unk_init: UnkInit) -> Self {
        self.unk_init = unk_init;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_refresh_cache(mut self, refresh: bool) -> Self {
        self.refresh_cache = refresh;
        self
    }
}

/// Normalized pretrained vectors: `itos`, `stoi` and a row-major
/// `(len, dim)` matrix.
pub struct VectorTable {
    itos: Vec<String>,
    stoi: HashMap<String, u32>,
    dim: usize,
    vectors: Vec<f32>,
    token_map: TokenMap,
    unk_init: UnkInit,
    rng: Mutex<Rand32>,
}

impl fmt::Debug for VectorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorTable")
            .field("len", &self.itos.len())
            .field("dim", &self.dim)
            .field("unk_init", &self.unk_init)
            .finish()
    }
}

impl VectorTable {
    /// Load `path` with the built-in readers.
    pub fn load<P: AsRef<Path>>(
        path: P,
        format: EmbeddingFormat,
        options: &LoadOptions,
    ) -> Result<Self> {
        Self::load_with(&ReaderRegistry::default(), path, format, options)
    }

    /// Load `path` with the readers of `registry`, going through the cache
    /// when one is configured.
    pub fn load_with<P: AsRef<Path>>(
        registry: &ReaderRegistry,
        path: P,
        format: EmbeddingFormat,
        options: &LoadOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let cache_file = options
            .cache_dir
            .as_ref()
            .map(|dir| cache::cache_path(dir, path, format));

        if let Some(cache_file) = &cache_file {
            if cache_file.exists() && !options.refresh_cache {
                if let Some(raw) = cache::read(cache_file, path)? {
                    info!(cache = ?cache_file, source = ?path, "loading vectors from cache");
                    return Self::from_raw(raw, options);
                }
            }
        }

        let reader = registry.reader(format)?;
        let raw = reader.read(path, options.binary)?;
        info!(
            source = ?path,
            %format,
            rows = raw.itos.len(),
            dim = raw.dim,
            "loaded embedding vectors"
        );

        if let Some(cache_file) = &cache_file {
            if let Err(err) = cache::write(cache_file, &raw, format, path) {
                warn!(cache = ?cache_file, error = %err, "failed to write vector cache");
            }
        }

        Self::from_raw(raw, options)
    }

    /// Wrap reader output, checking that every row has `dim` columns.
    pub fn from_raw(raw: RawVectors, options: &LoadOptions) -> Result<Self> {
        let RawVectors { itos, dim, data } = raw;
        if data.len() != itos.len() * dim {
            return Err(TaggerError::ShapeMismatch(format!(
                "{} tokens of dim {} need {} values, got {}",
                itos.len(),
                dim,
                itos.len() * dim,
                data.len()
            )));
        }

        let mut stoi = HashMap::with_capacity(itos.len());
        let mut duplicates = 0usize;
        for (idx, token) in itos.iter().enumerate() {
            if stoi.contains_key(token) {
                duplicates += 1;
            } else {
                stoi.insert(token.clone(), idx as u32);
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "duplicate tokens in vector file, keeping first rows");
        }

        let seed = options.seed.unwrap_or_else(entropy_seed);
        Ok(Self {
            itos,
            stoi,
            dim,
            vectors: data,
            token_map: options.token_map.clone(),
            unk_init: options.unk_init,
            rng: Mutex::new(Rand32::new(seed)),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    /// Tokens in row order, spelled as in the file.
    pub fn itos(&self) -> &[String] {
        &self.itos
    }

    /// Stored row for `token` after applying the token map.
    pub fn lookup(&self, token: &str) -> Option<&[f32]> {
        let mapped = self.token_map.apply(token);
        self.stoi.get(mapped).map(|&row| self.row(row as usize))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.lookup(token).is_some()
    }

    /// Vector for `token`; unknown tokens get a new sample from the
    /// configured initializer on every call.
    pub fn get(&self, token: &str) -> Vec<f32> {
        match self.lookup(token) {
            Some(row) => row.to_vec(),
            None => self.sample_unknown(),
        }
    }

    pub fn sample_unknown(&self) -> Vec<f32> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.unk_init.sample(&mut rng, self.dim)
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }

    /// The whole table as a `(len, dim)` tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.vectors, (self.itos.len(), self.dim), device)?)
    }

    /// Pretrained matrix indexed by `vocab` ids, shape `(vocab.len(), dim)`.
    pub fn align_to(&self, vocab: &Vocabulary, device: &Device) -> Result<Tensor> {
        let mut data = Vec::with_capacity(vocab.len() * self.dim);
        let mut hits = 0usize;
        for token in vocab.itos() {
            match self.lookup(token) {
                Some(row) => {
                    hits += 1;
                    data.extend_from_slice(row);
                }
                None => data.extend(self.sample_unknown()),
            }
        }
        info!(
            vocab = vocab.len(),
            hits,
            "aligned pretrained vectors to vocabulary"
        );
        Ok(Tensor::from_vec(data, (vocab.len(), self.dim), device)?)
    }
}

fn entropy_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ ((std::process::id() as u64) << 32)
}

/// Decode bytes as UTF-8, dropping invalid sequences.
pub(crate) fn decode_ignoring_errors(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Parse one whitespace-separated float field.
pub(crate) fn parse_component(field: &str, path: &Path, record: usize) -> Result<f32> {
    field.parse::<f32>().map_err(|e| TaggerError::MalformedVectors {
        path: path.to_path_buf(),
        record,
        reason: format!("invalid float {field:?}: {e}"),
    })
}
