//! Polyglot embeddings: a Python pickle holding `(words, matrix)` where
//! `words` is a list of strings (or a `(words, counts)` pair) and `matrix`
//! is a 2-D float32/float64 numpy array.
//!
//! Only the pickle opcodes numpy and plain containers emit are understood.
//! Globals are never resolved; arrays are recognised structurally from the
//! `_reconstruct` + `BUILD` or `_frombuffer` shapes numpy pickles to.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::registry::{RawVectors, VectorReader};
use crate::error::{Result, TaggerError};

/// Leading bytes of a bzip2 stream.
const BZIP2_MAGIC: &[u8] = b"BZh";

pub(crate) struct PolyglotReader;

impl VectorReader for PolyglotReader {
    fn read(&self, path: &Path, _binary: bool) -> Result<RawVectors> {
        let bytes = fs::read(path)?;
        if bytes.starts_with(BZIP2_MAGIC) {
            return Err(TaggerError::Unsupported(format!(
                "{} is bzip2-compressed; decompress it to a plain pickle first",
                path.display()
            )));
        }
        let value = Unpickler::new(&bytes, path).run()?;
        into_raw_vectors(value, path)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Global { module: String, name: String },
    Call {
        callable: Box<Value>,
        args: Box<Value>,
        state: Option<Box<Value>>,
    },
}

struct Unpickler<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Unpickler<'a> {
    fn new(bytes: &'a [u8], path: &'a Path) -> Self {
        Self {
            bytes,
            pos: 0,
            path,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> TaggerError {
        TaggerError::MalformedVectors {
            path: self.path.to_path_buf(),
            record: self.pos,
            reason: reason.into(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.bytes.len() - self.pos {
            return Err(self.error("unexpected end of pickle"));
        }
        let bytes = self.bytes;
        let slice = &bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    /// 8-byte length prefix that must fit in memory.
    fn len64(&mut self) -> Result<usize> {
        let len = self.u64()?;
        usize::try_from(len).map_err(|_| self.error(format!("length {len} does not fit in memory")))
    }

    fn line(&mut self) -> Result<String> {
        let bytes = self.bytes;
        let rest = &bytes[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.error("unterminated text argument"))?;
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    fn utf8(&mut self, len: usize) -> Result<Value> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map(Value::Str)
            .map_err(|_| self.error("invalid utf-8 in unicode string"))
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| self.error("stack underflow"))
    }

    fn top(&mut self) -> Result<&mut Value> {
        let pos = self.pos;
        self.stack.last_mut().ok_or_else(|| TaggerError::MalformedVectors {
            path: self.path.to_path_buf(),
            record: pos,
            reason: "stack underflow".to_string(),
        })
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.marks.pop().ok_or_else(|| self.error("missing MARK"))?;
        if mark > self.stack.len() {
            return Err(self.error("MARK beyond stack"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memo_get(&mut self, key: u32) -> Result<()> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| self.error(format!("memo key {key} not set")))?;
        self.stack.push(value);
        Ok(())
    }

    fn memo_put(&mut self, key: u32) -> Result<()> {
        let value = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| self.error("memoize on empty stack"))?;
        self.memo.insert(key, value);
        Ok(())
    }

    fn tuple_of(&mut self, n: usize) -> Result<()> {
        if self.stack.len() < n {
            return Err(self.error("stack underflow"));
        }
        let items = self.stack.split_off(self.stack.len() - n);
        self.stack.push(Value::Tuple(items));
        Ok(())
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let op = self.u8()?;
            match op {
                0x80 => {
                    self.u8()?; // PROTO
                }
                0x95 => {
                    self.u64()?; // FRAME
                }
                b'.' => return self.pop(),
                b'(' => self.marks.push(self.stack.len()),
                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                b'K' => {
                    let v = self.u8()?;
                    self.stack.push(Value::Int(v as i64));
                }
                b'M' => {
                    let v = self.u16()?;
                    self.stack.push(Value::Int(v as i64));
                }
                b'J' => {
                    let v = self.u32()? as i32;
                    self.stack.push(Value::Int(v as i64));
                }
                0x8a => {
                    let n = self.u8()? as usize;
                    let raw = self.take(n)?;
                    if n > 8 {
                        return Err(self.error("LONG1 wider than 64 bits"));
                    }
                    let mut value: i64 = 0;
                    for (i, byte) in raw.iter().enumerate() {
                        value |= (*byte as i64) << (8 * i);
                    }
                    if n > 0 && n < 8 && raw[n - 1] & 0x80 != 0 {
                        value -= 1i64 << (8 * n);
                    }
                    self.stack.push(Value::Int(value));
                }
                b'I' => {
                    let text = self.line()?;
                    let value = match text.as_str() {
                        "01" => Value::Bool(true),
                        "00" => Value::Bool(false),
                        other => Value::Int(
                            other
                                .parse()
                                .map_err(|_| self.error(format!("bad INT {other:?}")))?,
                        ),
                    };
                    self.stack.push(value);
                }
                b'G' => {
                    let b = self.take(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(b);
                    self.stack.push(Value::Float(f64::from_be_bytes(buf)));
                }
                b'X' => {
                    let len = self.u32()? as usize;
                    let value = self.utf8(len)?;
                    self.stack.push(value);
                }
                0x8c => {
                    let len = self.u8()? as usize;
                    let value = self.utf8(len)?;
                    self.stack.push(value);
                }
                0x8d => {
                    let len = self.len64()?;
                    let value = self.utf8(len)?;
                    self.stack.push(value);
                }
                // Python 2 `str` and bytes objects both carry raw bytes.
                b'U' | b'C' => {
                    let len = self.u8()? as usize;
                    let raw = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                b'T' | b'B' => {
                    let len = self.u32()? as usize;
                    let raw = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                0x8e | 0x96 => {
                    let len = self.len64()?;
                    let raw = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(raw));
                }
                b']' => self.stack.push(Value::List(Vec::new())),
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b'}' => self.stack.push(Value::Dict(Vec::new())),
                b'l' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85 => self.tuple_of(1)?,
                0x86 => self.tuple_of(2)?,
                0x87 => self.tuple_of(3)?,
                b'a' => {
                    let item = self.pop()?;
                    match self.top()? {
                        Value::List(items) => items.push(item),
                        _ => return Err(self.error("APPEND to non-list")),
                    }
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    match self.top()? {
                        Value::List(list) => list.extend(items),
                        _ => return Err(self.error("APPENDS to non-list")),
                    }
                }
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.top()? {
                        Value::Dict(entries) => entries.push((key, value)),
                        _ => return Err(self.error("SETITEM on non-dict")),
                    }
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    let mut pairs = Vec::with_capacity(items.len() / 2);
                    let mut iter = items.into_iter();
                    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                        pairs.push((k, v));
                    }
                    match self.top()? {
                        Value::Dict(entries) => entries.extend(pairs),
                        _ => return Err(self.error("SETITEMS on non-dict")),
                    }
                }
                b'c' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Value::Global { module, name });
                }
                0x93 => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        _ => return Err(self.error("STACK_GLOBAL expects two strings")),
                    }
                }
                b'R' | 0x81 => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(Value::Call {
                        callable: Box::new(callable),
                        args: Box::new(args),
                        state: None,
                    });
                }
                b'b' => {
                    let new_state = self.pop()?;
                    match self.top()? {
                        Value::Call { state, .. } => *state = Some(Box::new(new_state)),
                        _ => return Err(self.error("BUILD on a non-object")),
                    }
                }
                b'q' => {
                    let key = self.u8()? as u32;
                    self.memo_put(key)?;
                }
                b'r' => {
                    let key = self.u32()?;
                    self.memo_put(key)?;
                }
                0x94 => {
                    let key = self.memo.len() as u32;
                    self.memo_put(key)?;
                }
                b'h' => {
                    let key = self.u8()? as u32;
                    self.memo_get(key)?;
                }
                b'j' => {
                    let key = self.u32()?;
                    self.memo_get(key)?;
                }
                other => {
                    self.pos -= 1;
                    return Err(self.error(format!("unsupported pickle opcode 0x{other:02x}")));
                }
            }
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> TaggerError {
    TaggerError::MalformedVectors {
        path: path.to_path_buf(),
        record: 0,
        reason: reason.into(),
    }
}

fn into_raw_vectors(value: Value, path: &Path) -> Result<RawVectors> {
    let (vocab, matrix) = match value {
        Value::Tuple(items) | Value::List(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (Some(vocab), Some(matrix)) => (vocab, matrix),
                _ => return Err(malformed(path, "expected a (words, vectors) pair")),
            }
        }
        _ => return Err(malformed(path, "expected a (words, vectors) pair")),
    };

    let itos = words(vocab, path)?;
    let array = NdArray::from_value(&matrix, path)?;
    if array.shape.len() != 2 {
        return Err(TaggerError::ShapeMismatch(format!(
            "polyglot matrix must be 2-D, got shape {:?}",
            array.shape
        )));
    }
    let (rows, dim) = (array.shape[0], array.shape[1]);
    if rows != itos.len() {
        return Err(TaggerError::ShapeMismatch(format!(
            "polyglot archive has {} words but {rows} vectors",
            itos.len()
        )));
    }
    let data = array.into_row_major_f32(path)?;
    Ok(RawVectors { itos, dim, data })
}

/// Either a word list or a `(words, counts)` pair.
fn words(vocab: Value, path: &Path) -> Result<Vec<String>> {
    let items = match vocab {
        Value::List(items) | Value::Tuple(items) => items,
        _ => return Err(malformed(path, "vocabulary is not a sequence")),
    };
    let is_pair = items.len() == 2
        && items
            .iter()
            .all(|item| matches!(item, Value::List(_) | Value::Tuple(_)));
    let items = if is_pair {
        match items.into_iter().next() {
            Some(Value::List(words)) | Some(Value::Tuple(words)) => words,
            _ => return Err(malformed(path, "vocabulary is not a sequence")),
        }
    } else {
        items
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Str(word) => Ok(word),
            // Python 2 byte strings were written as latin-1.
            Value::Bytes(raw) => Ok(raw.iter().map(|&b| b as char).collect()),
            other => Err(malformed(path, format!("vocabulary entry is not a string: {other:?}"))),
        })
        .collect()
}

#[derive(Debug)]
struct NdArray {
    shape: Vec<usize>,
    kind: char,
    width: usize,
    little_endian: bool,
    fortran: bool,
    raw: Vec<u8>,
}

impl NdArray {
    fn from_value(value: &Value, path: &Path) -> Result<Self> {
        let Value::Call {
            callable,
            args,
            state,
        } = value
        else {
            return Err(malformed(path, "vectors are not a numpy array"));
        };
        let Value::Global { name, .. } = callable.as_ref() else {
            return Err(malformed(path, "vectors are not a numpy array"));
        };

        match name.as_str() {
            // _reconstruct(ndarray, (0,), b'b') followed by
            // BUILD (version, shape, dtype, is_fortran, raw)
            "_reconstruct" => {
                let Some(Value::Tuple(items)) = state.as_deref() else {
                    return Err(malformed(path, "numpy array without state"));
                };
                let offset = if items.len() == 5 { 1 } else { 0 };
                if items.len() < 4 + offset {
                    return Err(malformed(path, "short numpy array state"));
                }
                let shape = shape_of(&items[offset], path)?;
                let (kind, width, little_endian) = dtype_of(&items[offset + 1], path)?;
                let fortran = matches!(items[offset + 2], Value::Bool(true) | Value::Int(1));
                let raw = match &items[offset + 3] {
                    Value::Bytes(raw) => raw.clone(),
                    Value::Str(text) => text.chars().map(|c| c as u32 as u8).collect(),
                    _ => return Err(malformed(path, "numpy array data is not a byte string")),
                };
                Ok(Self {
                    shape,
                    kind,
                    width,
                    little_endian,
                    fortran,
                    raw,
                })
            }
            // _frombuffer(buffer, dtype, shape, order)
            "_frombuffer" => {
                let Value::Tuple(items) = args.as_ref() else {
                    return Err(malformed(path, "bad _frombuffer arguments"));
                };
                let [buffer, dtype, shape, order] = items.as_slice() else {
                    return Err(malformed(path, "bad _frombuffer arguments"));
                };
                let Value::Bytes(raw) = buffer else {
                    return Err(malformed(path, "numpy buffer is not bytes"));
                };
                let (kind, width, little_endian) = dtype_of(dtype, path)?;
                Ok(Self {
                    shape: shape_of(shape, path)?,
                    kind,
                    width,
                    little_endian,
                    fortran: matches!(order, Value::Str(o) if o == "F"),
                    raw: raw.clone(),
                })
            }
            other => Err(malformed(path, format!("unsupported array constructor {other}"))),
        }
    }

    fn into_row_major_f32(self, path: &Path) -> Result<Vec<f32>> {
        if self.kind != 'f' || !(self.width == 4 || self.width == 8) {
            return Err(malformed(
                path,
                format!("unsupported dtype {}{}", self.kind, self.width),
            ));
        }
        let needed = self
            .shape
            .iter()
            .try_fold(self.width, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| malformed(path, format!("numpy shape {:?} is too large", self.shape)))?;
        if self.raw.len() != needed {
            return Err(TaggerError::ShapeMismatch(format!(
                "numpy array of shape {:?} needs {} bytes, got {}",
                self.shape,
                needed,
                self.raw.len()
            )));
        }

        let values: Vec<f32> = self
            .raw
            .chunks_exact(self.width)
            .map(|c| match (self.width, self.little_endian) {
                (4, true) => f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                (4, false) => f32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                (_, little) => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(c);
                    let v = if little {
                        f64::from_le_bytes(buf)
                    } else {
                        f64::from_be_bytes(buf)
                    };
                    v as f32
                }
            })
            .collect();

        if !self.fortran {
            return Ok(values);
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut row_major = vec![0.0f32; values.len()];
        for c in 0..cols {
            for r in 0..rows {
                row_major[r * cols + c] = values[c * rows + r];
            }
        }
        Ok(row_major)
    }
}

fn shape_of(value: &Value, path: &Path) -> Result<Vec<usize>> {
    let Value::Tuple(dims) = value else {
        return Err(malformed(path, "numpy shape is not a tuple"));
    };
    dims.iter()
        .map(|d| match d {
            Value::Int(n) if *n >= 0 => Ok(*n as usize),
            _ => Err(malformed(path, "numpy shape entry is not a size")),
        })
        .collect()
}

/// `numpy.dtype('f4', 0, 1)` with BUILD state `(3, '<', ...)`.
fn dtype_of(value: &Value, path: &Path) -> Result<(char, usize, bool)> {
    let Value::Call { args, state, .. } = value else {
        return Err(malformed(path, "numpy dtype is not an object"));
    };
    let code = match args.as_ref() {
        Value::Tuple(items) => match items.first() {
            Some(Value::Str(code)) => code.clone(),
            Some(Value::Bytes(raw)) => String::from_utf8_lossy(raw).into_owned(),
            _ => return Err(malformed(path, "numpy dtype without type code")),
        },
        _ => return Err(malformed(path, "numpy dtype without type code")),
    };
    let mut chars = code.chars();
    let kind = chars.next().unwrap_or('?');
    let width = chars
        .as_str()
        .parse::<usize>()
        .map_err(|_| malformed(path, format!("unsupported dtype code {code:?}")))?;

    let little_endian = match state.as_deref() {
        Some(Value::Tuple(items)) => match items.get(1) {
            Some(Value::Str(order)) => order != ">",
            Some(Value::Bytes(order)) => order.as_slice() != b">",
            _ => true,
        },
        _ => true,
    };
    Ok((kind, width, little_endian))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::tests::scratch_path;

    /// Protocol-2 pickle of `(words, np.array(rows, dtype='<f4'))`, laid out
    /// the way numpy reduces arrays.
    fn polyglot_fixture(words: &[&str], rows: &[[f32; 2]]) -> Vec<u8> {
        let mut out = vec![0x80, 0x02];
        out.push(b']');
        out.push(b'(');
        for word in words {
            out.push(b'X');
            out.extend_from_slice(&(word.len() as u32).to_le_bytes());
            out.extend_from_slice(word.as_bytes());
        }
        out.push(b'e');

        out.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\n");
        out.extend_from_slice(b"cnumpy\nndarray\n");
        out.extend_from_slice(&[b'K', 0, 0x85]);
        out.extend_from_slice(&[b'U', 1, b'b']);
        out.push(0x87);
        out.push(b'R');

        out.push(b'(');
        out.extend_from_slice(&[b'K', 1]);
        out.extend_from_slice(&[b'K', rows.len() as u8, b'K', 2, 0x86]);
        out.extend_from_slice(b"cnumpy\ndtype\n");
        out.extend_from_slice(&[b'X', 2, 0, 0, 0, b'f', b'4', b'K', 0, b'K', 1, 0x87, b'R']);
        out.push(b'(');
        out.extend_from_slice(&[b'K', 3, b'X', 1, 0, 0, 0, b'<', b'N', b'N', b'N']);
        out.push(b'J');
        out.extend_from_slice(&(-1i32).to_le_bytes());
        out.push(b'J');
        out.extend_from_slice(&(-1i32).to_le_bytes());
        out.extend_from_slice(&[b'K', 0, b't', b'b']);
        out.push(0x89);
        let raw: Vec<u8> = rows.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        out.push(b'T');
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&raw);
        out.extend_from_slice(&[b't', b'b']);

        out.extend_from_slice(&[0x86, b'.']);
        out
    }

    #[test]
    fn test_read_polyglot_pickle() {
        let path = scratch_path("polyglot.pkl");
        let bytes = polyglot_fixture(&["<UNK>", "</S>", "dog"], &[[0.0, 0.1], [1.0, 1.1], [2.0, 2.1]]);
        fs::write(&path, bytes).unwrap();

        let raw = PolyglotReader.read(&path, true).unwrap();
        assert_eq!(raw.itos, vec!["<UNK>", "</S>", "dog"]);
        assert_eq!(raw.dim, 2);
        assert_eq!(raw.data, vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_word_and_row_count_must_agree() {
        let path = scratch_path("polyglot-mismatch.pkl");
        let bytes = polyglot_fixture(&["a", "b"], &[[0.0, 0.1]]);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PolyglotReader.read(&path, true),
            Err(TaggerError::ShapeMismatch(_))
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_truncated_pickle_is_malformed() {
        let path = scratch_path("polyglot-truncated.pkl");
        let mut bytes = polyglot_fixture(&["a"], &[[0.0, 0.1]]);
        bytes.truncate(bytes.len() / 2);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PolyglotReader.read(&path, true),
            Err(TaggerError::MalformedVectors { .. })
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_oversized_length_prefix_is_malformed() {
        let path = scratch_path("polyglot-huge-length.pkl");
        let mut bytes = vec![0x80, 0x04, 0x8d];
        bytes.extend_from_slice(&[0xff; 8]);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            PolyglotReader.read(&path, true),
            Err(TaggerError::MalformedVectors { .. })
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_overflowing_array_shape_is_malformed() {
        let array = NdArray {
            shape: vec![usize::MAX, 2],
            kind: 'f',
            width: 4,
            little_endian: true,
            fortran: false,
            raw: Vec::new(),
        };
        assert!(matches!(
            array.into_row_major_f32(Path::new("x")),
            Err(TaggerError::MalformedVectors { .. })
        ));
    }

    #[test]
    fn test_bzip2_archive_is_unsupported() {
        let path = scratch_path("polyglot.pkl.bz2");
        fs::write(&path, b"BZh91AY&SY\x00\x00").unwrap();

        assert!(matches!(
            PolyglotReader.read(&path, true),
            Err(TaggerError::Unsupported(_))
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_words_counts_pair_is_unwrapped() {
        let vocab = Value::Tuple(vec![
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
            Value::List(vec![Value::Int(3), Value::Int(1)]),
        ]);
        assert_eq!(words(vocab, Path::new("x")).unwrap(), vec!["a", "b"]);
    }
}
