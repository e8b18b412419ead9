use std::collections::HashMap;
use std::path::Path;

use tracing::error;

use super::EmbeddingFormat;
use crate::error::{Result, TaggerError};

/// Reader output before normalization: tokens in row order and a
/// row-major `(itos.len(), dim)` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVectors {
    pub itos: Vec<String>,
    pub dim: usize,
    pub data: Vec<f32>,
}

/// Parses one embedding file format.
pub trait VectorReader: Send + Sync {
    /// Read every vector in `path`. `binary` selects the row encoding for
    /// formats that have more than one.
    fn read(&self, path: &Path, binary: bool) -> Result<RawVectors>;
}

/// Readers keyed by format. A format without a reader fails only its own
/// loads.
pub struct ReaderRegistry {
    readers: HashMap<EmbeddingFormat, Box<dyn VectorReader>>,
}

impl ReaderRegistry {
    /// Registry without any reader.
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Registry holding every reader compiled into this build.
    pub fn with_default_readers() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "polyglot")]
        registry.register(EmbeddingFormat::Polyglot, super::polyglot::PolyglotReader);
        #[cfg(feature = "word2vec")]
        {
            registry.register(EmbeddingFormat::Word2Vec, super::word2vec::Word2VecReader);
            registry.register(EmbeddingFormat::FastText, super::word2vec::Word2VecReader);
        }
        #[cfg(feature = "glove")]
        registry.register(EmbeddingFormat::Glove, super::glove::GloveReader);
        registry
    }

    /// Add or replace the reader for `format`.
    pub fn register<R: VectorReader + 'static>(&mut self, format: EmbeddingFormat, reader: R) {
        self.readers.insert(format, Box::new(reader));
    }

    pub fn has(&self, format: EmbeddingFormat) -> bool {
        self.readers.contains_key(&format)
    }

    /// Reader for `format`, or `MissingDependency` naming the cargo feature
    /// that provides it.
    pub fn reader(&self, format: EmbeddingFormat) -> Result<&dyn VectorReader> {
        match self.readers.get(&format) {
            Some(reader) => Ok(reader.as_ref()),
            None => {
                let hint = format!(
                    "rebuild deeptagger-core with `--features {}` or register a custom reader",
                    feature_for(format)
                );
                error!(%format, %hint, "embedding reader unavailable");
                Err(TaggerError::MissingDependency {
                    format: format.to_string(),
                    hint,
                })
            }
        }
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_default_readers()
    }
}

fn feature_for(format: EmbeddingFormat) -> &'static str {
    match format {
        EmbeddingFormat::Polyglot => "polyglot",
        EmbeddingFormat::Word2Vec | EmbeddingFormat::FastText => "word2vec",
        EmbeddingFormat::Glove => "glove",
    }
}
