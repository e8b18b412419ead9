//! GloVe text vectors: no header, one `token f1 … fd` line per row. The
//! width is taken from the first row and every later row must match it.

use std::fs;
use std::path::Path;

use super::registry::{RawVectors, VectorReader};
use super::{decode_ignoring_errors, parse_component};
use crate::error::{Result, TaggerError};

pub(crate) struct GloveReader;

impl VectorReader for GloveReader {
    fn read(&self, path: &Path, _binary: bool) -> Result<RawVectors> {
        let bytes = fs::read(path)?;
        let mut itos = Vec::new();
        let mut data = Vec::new();
        let mut dim: Option<usize> = None;

        for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let record = idx + 1;
            let line = decode_ignoring_errors(line);
            let mut fields = line.split_whitespace();
            let Some(token) = fields.next() else {
                continue;
            };
            let row = fields
                .map(|field| parse_component(field, path, record))
                .collect::<Result<Vec<f32>>>()?;

            match dim {
                None if row.is_empty() => {
                    return Err(TaggerError::MalformedVectors {
                        path: path.to_path_buf(),
                        record,
                        reason: format!("no vector values for {token:?}"),
                    });
                }
                None => dim = Some(row.len()),
                Some(expected) if expected != row.len() => {
                    return Err(TaggerError::ShapeMismatch(format!(
                        "{path:?} line {record}: expected {expected} values for {token:?}, got {}",
                        row.len()
                    )));
                }
                Some(_) => {}
            }
            itos.push(token.to_string());
            data.extend(row);
        }

        let dim = dim.ok_or_else(|| TaggerError::MalformedVectors {
            path: path.to_path_buf(),
            record: 0,
            reason: "file contains no vectors".to_string(),
        })?;
        Ok(RawVectors { itos, dim, data })
    }
}
