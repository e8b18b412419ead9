//! word2vec / fastText key-vector files: a `count dim` header line followed
//! by `count` rows, either `token f1 … fd` text lines or a token, one space
//! and `dim` little-endian f32 values.

use std::fs;
use std::path::Path;

use super::registry::{RawVectors, VectorReader};
use super::{decode_ignoring_errors, parse_component};
use crate::error::{Result, TaggerError};

pub(crate) struct Word2VecReader;

impl VectorReader for Word2VecReader {
    fn read(&self, path: &Path, binary: bool) -> Result<RawVectors> {
        let bytes = fs::read(path)?;
        let (count, dim, body) = parse_header(&bytes, path)?;
        if binary {
            parse_binary(body, count, dim, path)
        } else {
            parse_text(body, count, dim, path)
        }
    }
}

fn malformed(path: &Path, record: usize, reason: impl Into<String>) -> TaggerError {
    TaggerError::MalformedVectors {
        path: path.to_path_buf(),
        record,
        reason: reason.into(),
    }
}

/// Reject headers announcing more rows than `body` can hold, given the
/// smallest possible encoding of one row.
fn check_row_budget(
    body: &[u8],
    count: usize,
    min_row_bytes: Option<usize>,
    path: &Path,
) -> Result<()> {
    let max_rows = min_row_bytes.map_or(0, |row| body.len() / row);
    if count > max_rows {
        return Err(malformed(
            path,
            1,
            format!("header announces {count} vectors, file holds at most {max_rows}"),
        ));
    }
    Ok(())
}

fn parse_header<'a>(bytes: &'a [u8], path: &Path) -> Result<(usize, usize, &'a [u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| malformed(path, 1, "missing header line"))?;
    let header = decode_ignoring_errors(&bytes[..end]);
    let mut fields = header.split_whitespace().map(str::parse::<usize>);
    match (fields.next(), fields.next()) {
        (Some(Ok(count)), Some(Ok(dim))) if dim > 0 => Ok((count, dim, &bytes[end + 1..])),
        _ => Err(malformed(
            path,
            1,
            format!("expected `<count> <dim>` header, got {header:?}"),
        )),
    }
}

fn parse_binary(body: &[u8], count: usize, dim: usize, path: &Path) -> Result<RawVectors> {
    let row_bytes = dim
        .checked_mul(4)
        .ok_or_else(|| malformed(path, 1, format!("dimension {dim} is too large")))?;
    // token, separator, vector
    check_row_budget(body, count, row_bytes.checked_add(2), path)?;
    let mut itos = Vec::with_capacity(count);
    let mut data = Vec::with_capacity(count * dim);
    let mut pos = 0usize;

    for record in 0..count {
        // Rows may be separated by a newline that belongs to neither token nor vector.
        while pos < body.len() && body[pos] == b'\n' {
            pos += 1;
        }
        let token_len = body[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed(path, record + 2, "unexpected end of file in token"))?;
        itos.push(decode_ignoring_errors(&body[pos..pos + token_len]));
        pos += token_len + 1;

        if pos + row_bytes > body.len() {
            return Err(malformed(path, record + 2, "unexpected end of file in vector"));
        }
        data.extend(
            body[pos..pos + row_bytes]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        pos += row_bytes;
    }

    Ok(RawVectors { itos, dim, data })
}

fn parse_text(body: &[u8], count: usize, dim: usize, path: &Path) -> Result<RawVectors> {
    // token, then a separator and one digit per value
    check_row_budget(body, count, dim.checked_mul(2).and_then(|n| n.checked_add(1)), path)?;
    let mut itos = Vec::with_capacity(count);
    let mut data = Vec::with_capacity(count * dim);

    let lines = body
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(idx, line)| (idx + 2, decode_ignoring_errors(line)))
        .filter(|(_, line)| !line.trim().is_empty())
        .take(count);

    for (record, line) in lines {
        let line = line.trim_end_matches([' ', '\t', '\r']);
        let mut fields = line.split(' ');
        let token = fields.next().unwrap_or_default();
        let row = fields
            .map(|field| parse_component(field, path, record))
            .collect::<Result<Vec<f32>>>()?;
        if row.len() != dim {
            return Err(TaggerError::ShapeMismatch(format!(
                "{path:?} line {record}: expected {dim} values for {token:?}, got {}",
                row.len()
            )));
        }
        itos.push(token.to_string());
        data.extend(row);
    }

    if itos.len() != count {
        return Err(malformed(
            path,
            itos.len() + 1,
            format!("header announces {count} vectors, found {}", itos.len()),
        ));
    }
    Ok(RawVectors { itos, dim, data })
}
