//! DeepTagger command-line tool
//!
//! Inspects and caches pretrained embedding files, and tags sentences with a
//! saved model directory.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use candle_core::Device;
use clap::{Parser, Subcommand};
use deeptagger_core::{
    BatchBuilder, EmbeddingFormat, LoadOptions, ModelOptions, Rcnn, SequenceTagger,
    SpecialTokens, TaggerFields, VectorTable,
};
use tracing::{debug, info};

const OPTIONS_FILE: &str = "options.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// CLI arguments
#[derive(Parser)]
#[command(name = "deeptagger")]
#[command(about = "Load embedding vectors and tag sentences")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a vector file and print its size
    Inspect {
        path: PathBuf,
        /// polyglot, word2vec, fasttext or glove
        #[arg(short, long)]
        format: EmbeddingFormat,
        /// Text rows for word2vec/fasttext files
        #[arg(long)]
        text: bool,
    },
    /// Write the normalized cache for a vector file
    Cache {
        path: PathBuf,
        #[arg(short, long)]
        format: EmbeddingFormat,
        #[arg(short, long)]
        cache_dir: PathBuf,
        /// Rebuild even if a cache file exists
        #[arg(long)]
        refresh: bool,
        #[arg(long)]
        text: bool,
    },
    /// Print vectors for tokens as JSON lines
    Lookup {
        path: PathBuf,
        #[arg(short, long)]
        format: EmbeddingFormat,
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,
        #[arg(long)]
        text: bool,
        #[arg(required = true)]
        tokens: Vec<String>,
    },
    /// Tag whitespace-tokenized sentences, one per line
    Tag {
        /// Directory with options.json, *.vocab files and model.safetensors
        #[arg(short, long)]
        model_dir: PathBuf,
        /// Input file; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Sentences per forward pass
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
}

fn load_options(format: EmbeddingFormat, text: bool, cache_dir: Option<&Path>) -> LoadOptions {
    let mut options = LoadOptions::for_format(format, &SpecialTokens::default()).with_binary(!text);
    if let Some(dir) = cache_dir {
        options = options.with_cache_dir(dir);
    }
    options
}

fn load_vectors(path: &Path, format: EmbeddingFormat, options: &LoadOptions) -> Result<VectorTable> {
    VectorTable::load(path, format, options)
        .with_context(|| format!("failed to load {format} vectors from {}", path.display()))
}

fn read_sentences(input: Option<&Path>) -> Result<Vec<Vec<String>>> {
    let lines: Vec<String> = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("failed to read stdin")?,
    };
    Ok(lines
        .iter()
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect())
}

fn load_model(dir: &Path, device: &Device) -> Result<(Rcnn, ModelOptions)> {
    let specials = SpecialTokens::default();
    let options = ModelOptions::from_file(dir.join(OPTIONS_FILE))
        .with_context(|| format!("failed to read {OPTIONS_FILE} in {}", dir.display()))?;
    let mut fields = TaggerFields::load(dir, &specials)
        .with_context(|| format!("failed to read vocabularies in {}", dir.display()))?;

    // The saved word table fixes the embedding width even when it came from
    // pretrained vectors of a different size than options.json states.
    let weights = dir.join(WEIGHTS_FILE);
    let tensors = candle_core::safetensors::load(&weights, device)
        .with_context(|| format!("failed to read {}", weights.display()))?;
    if let Some(word_table) = tensors.get("word_emb.weight") {
        fields = fields.with_word_vectors(word_table.clone());
    }

    let mut model = Rcnn::new(fields, device);
    model.build(&options).context("failed to build model")?;
    model
        .load(&weights)
        .with_context(|| format!("failed to load weights from {}", weights.display()))?;
    info!(dir = %dir.display(), classes = model.nb_classes(), "loaded tagger");
    Ok((model, options))
}

fn tag(model_dir: &Path, input: Option<&Path>, batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        bail!("--batch-size must be positive");
    }
    let device = Device::Cpu;
    let (model, options) = load_model(model_dir, &device)?;
    let fields = model.fields();
    let builder = BatchBuilder::new(fields, &options, &device)?;
    let sentences = read_sentences(input)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for chunk in sentences.chunks(batch_size) {
        let batch = builder.build(chunk)?;
        let classes = model.predict_classes(&batch)?.to_vec2::<u32>()?;
        debug!(sentences = chunk.len(), "tagged batch");

        for (sentence, ids) in chunk.iter().zip(classes) {
            let tagged: Vec<String> = sentence
                .iter()
                .zip(ids)
                .map(|(token, id)| {
                    let tag = fields.tags.token(id).unwrap_or("?");
                    format!("{token}_{tag}")
                })
                .collect();
            writeln!(out, "{}", tagged.join(" "))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { path, format, text } => {
            let table = load_vectors(&path, format, &load_options(format, text, None))?;
            println!("{}: {} vectors of dimension {}", path.display(), table.len(), table.dim());
        }
        Commands::Cache {
            path,
            format,
            cache_dir,
            refresh,
            text,
        } => {
            let options =
                load_options(format, text, Some(&cache_dir)).with_refresh_cache(refresh);
            let table = load_vectors(&path, format, &options)?;
            info!(
                rows = table.len(),
                cache_dir = %cache_dir.display(),
                "vector cache ready"
            );
        }
        Commands::Lookup {
            path,
            format,
            cache_dir,
            text,
            tokens,
        } => {
            let table = load_vectors(&path, format, &load_options(format, text, cache_dir.as_deref()))?;
            for token in tokens {
                let line = serde_json::json!({
                    "token": token,
                    "known": table.contains(&token),
                    "vector": table.get(&token),
                });
                println!("{line}");
            }
        }
        Commands::Tag {
            model_dir,
            input,
            batch_size,
        } => tag(&model_dir, input.as_deref(), batch_size)?,
    }
    Ok(())
}
