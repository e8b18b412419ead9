//! Normalized vector cache.
//!
//! A cache file is a safetensors archive with one `vectors` tensor of shape
//! `(len, dim)` in little-endian f32. The token list travels in the header
//! metadata as a JSON array under `itos`, next to the `format` and `source`
//! it was produced from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use tracing::debug;

use super::EmbeddingFormat;
use super::registry::RawVectors;
use crate::error::{Result, TaggerError};

const VECTORS_KEY: &str = "vectors";
const ITOS_KEY: &str = "itos";
const SOURCE_KEY: &str = "source";

/// `<dir>/<source file name>.<format>.safetensors`
pub fn cache_path(dir: &Path, source: &Path, format: EmbeddingFormat) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vectors".to_string());
    dir.join(format!("{name}.{format}.safetensors"))
}

/// Absolute spelling of `source` as recorded in the cache header.
pub fn source_key(source: &Path) -> String {
    fs::canonicalize(source)
        .unwrap_or_else(|_| source.to_path_buf())
        .display()
        .to_string()
}

/// Write `raw` to `path`, creating parent directories.
pub fn write(path: &Path, raw: &RawVectors, format: EmbeddingFormat, source: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes: Vec<u8> = raw.data.iter().flat_map(|v| v.to_le_bytes()).collect();
    let view = TensorView::new(Dtype::F32, vec![raw.itos.len(), raw.dim], &bytes)?;

    let mut metadata = HashMap::new();
    metadata.insert(ITOS_KEY.to_string(), serde_json::to_string(&raw.itos)?);
    metadata.insert("format".to_string(), format.to_string());
    metadata.insert(SOURCE_KEY.to_string(), source_key(source));

    safetensors::serialize_to_file([(VECTORS_KEY, view)], &Some(metadata), path)?;
    debug!(cache = ?path, rows = raw.itos.len(), "wrote vector cache");
    Ok(())
}

/// Read a cache written by [`write`] for `source`.
///
/// Returns `None` when the cache was produced from a different source file
/// that happens to share its file name.
pub fn read(path: &Path, source: &Path) -> Result<Option<RawVectors>> {
    let bytes = fs::read(path)?;
    let malformed = |reason: String| TaggerError::MalformedVectors {
        path: path.to_path_buf(),
        record: 0,
        reason,
    };

    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let metadata = header.metadata().as_ref();
    let expected = source_key(source);
    match metadata.and_then(|m| m.get(SOURCE_KEY)) {
        Some(cached) if *cached == expected => {}
        cached => {
            debug!(
                cache = ?path,
                cached = ?cached,
                source = %expected,
                "vector cache belongs to another source"
            );
            return Ok(None);
        }
    }
    let itos_json = metadata
        .and_then(|m| m.get(ITOS_KEY))
        .ok_or_else(|| malformed("cache header has no token list".to_string()))?;
    let itos: Vec<String> = serde_json::from_str(itos_json)?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let view = tensors.tensor(VECTORS_KEY)?;
    if view.dtype() != Dtype::F32 {
        return Err(malformed(format!("expected F32 vectors, got {:?}", view.dtype())));
    }
    let [rows, dim] = view.shape() else {
        return Err(malformed(format!("expected a 2-D matrix, got {:?}", view.shape())));
    };
    if *rows != itos.len() {
        return Err(TaggerError::ShapeMismatch(format!(
            "cache holds {rows} vectors for {} tokens",
            itos.len()
        )));
    }

    let data = view
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Some(RawVectors {
        itos,
        dim: *dim,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::tests::scratch_path;

    #[test]
    fn test_cache_path_keeps_source_name() {
        let path = cache_path(
            Path::new("/tmp/cache"),
            Path::new("/data/glove.6B.50d.txt"),
            EmbeddingFormat::Glove,
        );
        assert_eq!(path, PathBuf::from("/tmp/cache/glove.6B.50d.txt.glove.safetensors"));
    }

    #[test]
    fn test_write_then_read_preserves_rows() {
        let path = scratch_path("cache-nested").join("vectors.safetensors");
        let raw = RawVectors {
            itos: vec!["<UNK>".into(), "naïve".into()],
            dim: 3,
            data: vec![0.0, 0.5, -1.0, 2.0, 3.0, 4.0],
        };
        let source = Path::new("src.pkl");
        write(&path, &raw, EmbeddingFormat::Polyglot, source).unwrap();

        assert_eq!(read(&path, source).unwrap(), Some(raw));
        assert_eq!(read(&path, Path::new("other/src.pkl")).unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_garbage_cache_is_an_error() {
        let path = scratch_path("cache-garbage.safetensors");
        fs::write(&path, b"not a safetensors file").unwrap();
        assert!(read(&path, Path::new("src.pkl")).is_err());
        let _ = fs::remove_file(&path);
    }
}
