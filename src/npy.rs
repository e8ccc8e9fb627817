//! Dense complex matrices in the NumPy `.npy` format.
//!
//! Layout (version 1.0):
//! ```text
//!  \x93NUMPY | major | minor | u16 LE header length | header dict | payload
//! ```
//! The header is a Python dict literal such as
//! `{'descr': '<c8', 'fortran_order': False, 'shape': (4, 2), }`. It is read
//! by a small decoder that only understands string, boolean and integer-tuple
//! values; nothing in it is ever evaluated.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use nalgebra::DMatrix;
use num_complex::Complex32;

use crate::error::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    Complex64,
    Complex128,
    Float32,
    Float64,
}

impl Dtype {
    fn parse(descr: &str) -> Option<Self> {
        // '|' and '=' only occur for single-byte or native types; treat native as LE.
        let body = descr.strip_prefix('<').or_else(|| descr.strip_prefix('='))?;
        match body {
            "c8" => Some(Dtype::Complex64),
            "c16" => Some(Dtype::Complex128),
            "f4" => Some(Dtype::Float32),
            "f8" => Some(Dtype::Float64),
            _ => None,
        }
    }

    fn item_size(self) -> usize {
        match self {
            Dtype::Complex64 | Dtype::Float64 => 8,
            Dtype::Complex128 => 16,
            Dtype::Float32 => 4,
        }
    }

    fn read_one(self, cur: &mut Cursor<&[u8]>) -> std::io::Result<Complex32> {
        Ok(match self {
            Dtype::Complex64 => {
                let re = cur.read_f32::<LittleEndian>()?;
                let im = cur.read_f32::<LittleEndian>()?;
                Complex32::new(re, im)
            }
            Dtype::Complex128 => {
                let re = cur.read_f64::<LittleEndian>()?;
                let im = cur.read_f64::<LittleEndian>()?;
                Complex32::new(re as f32, im as f32)
            }
            Dtype::Float32 => Complex32::new(cur.read_f32::<LittleEndian>()?, 0.0),
            Dtype::Float64 => Complex32::new(cur.read_f64::<LittleEndian>()? as f32, 0.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Header decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum HeaderValue {
    Str(String),
    Bool(bool),
    Shape(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

struct HeaderParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> HeaderParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> std::result::Result<(), String> {
        match self.peek() {
            Some(got) if got == c => {
                self.pos += 1;
                Ok(())
            }
            Some(got) => Err(format!(
                "expected '{}' at offset {}, found '{}'",
                c as char, self.pos, got as char
            )),
            None => Err(format!("expected '{}', found end of header", c as char)),
        }
    }

    fn string(&mut self) -> std::result::Result<String, String> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q,
            _ => return Err(format!("expected string at offset {}", self.pos)),
        };
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            return Err("unterminated string".into());
        }
        let s = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(s)
    }

    fn word(&mut self) -> &'a [u8] {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn shape(&mut self) -> std::result::Result<Vec<usize>, String> {
        self.expect(b'(')?;
        let mut dims = Vec::new();
        loop {
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(dims);
                }
                Some(b',') => self.pos += 1,
                Some(c) if c.is_ascii_digit() => {
                    let w = self.word();
                    // Python 2 era writers emit `3L`.
                    let digits = std::str::from_utf8(w)
                        .map_err(|e| e.to_string())?
                        .trim_end_matches('L');
                    dims.push(
                        digits
                            .parse::<usize>()
                            .map_err(|e| format!("bad dimension '{digits}': {e}"))?,
                    );
                }
                _ => return Err(format!("malformed shape at offset {}", self.pos)),
            }
        }
    }

    fn value(&mut self) -> std::result::Result<HeaderValue, String> {
        match self.peek() {
            Some(b'\'' | b'"') => Ok(HeaderValue::Str(self.string()?)),
            Some(b'(') => Ok(HeaderValue::Shape(self.shape()?)),
            Some(_) => match self.word() {
                b"True" => Ok(HeaderValue::Bool(true)),
                b"False" => Ok(HeaderValue::Bool(false)),
                other => Err(format!(
                    "unsupported header value '{}'",
                    String::from_utf8_lossy(other)
                )),
            },
            None => Err("unexpected end of header".into()),
        }
    }

    fn parse(mut self) -> std::result::Result<Header, String> {
        let mut descr = None;
        let mut fortran_order = None;
        let mut shape = None;

        self.expect(b'{')?;
        loop {
            match self.peek() {
                Some(b'}') => break,
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let key = self.string()?;
            self.expect(b':')?;
            let value = self.value()?;
            match (key.as_str(), value) {
                ("descr", HeaderValue::Str(s)) => descr = Some(s),
                ("fortran_order", HeaderValue::Bool(b)) => fortran_order = Some(b),
                ("shape", HeaderValue::Shape(s)) => shape = Some(s),
                (k, v) => return Err(format!("unexpected header entry {k}: {v:?}")),
            }
        }

        Ok(Header {
            descr: descr.ok_or("header missing 'descr'")?,
            fortran_order: fortran_order.ok_or("header missing 'fortran_order'")?,
            shape: shape.ok_or("header missing 'shape'")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read a 2-D matrix, converting any supported element type to `Complex32`.
pub fn read_matrix(path: &Path) -> Result<DMatrix<Complex32>> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path)?;
    decode(&bytes).map_err(|reason| Error::format(path, reason))
}

/// Write `matrix` as a C-ordered `<c8` array.
///
/// The bytes go to a sibling temporary file first and are renamed into place,
/// so an interrupted write never leaves a truncated matrix at `path`.
pub fn write_matrix(path: &Path, matrix: &DMatrix<Complex32>) -> Result<()> {
    let bytes = encode(matrix)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".partial");
    let tmp = path.with_file_name(tmp_name);

    if let Err(e) = write_then_rename(&tmp, path, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!(
        "wrote {}x{} matrix to {}",
        matrix.nrows(),
        matrix.ncols(),
        path.display()
    );
    Ok(())
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)
}

fn encode(matrix: &DMatrix<Complex32>) -> Result<Vec<u8>> {
    let mut header = format!(
        "{{'descr': '<c8', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.nrows(),
        matrix.ncols()
    );
    // Preamble is magic (6) + version (2) + length (2); header ends with '\n'.
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + matrix.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.write_u16::<LittleEndian>(header.len() as u16)?;
    out.extend_from_slice(header.as_bytes());
    for row in matrix.row_iter() {
        for z in row.iter() {
            out.write_f32::<LittleEndian>(z.re)?;
            out.write_f32::<LittleEndian>(z.im)?;
        }
    }
    Ok(out)
}

fn decode(bytes: &[u8]) -> std::result::Result<DMatrix<Complex32>, String> {
    let mut cur = Cursor::new(bytes);
    let mut magic = [0u8; 6];
    cur.read_exact(&mut magic)
        .map_err(|_| "file too short for npy magic".to_string())?;
    if &magic != MAGIC {
        return Err("missing npy magic string".into());
    }
    let major = cur.read_u8().map_err(|e| e.to_string())?;
    let _minor = cur.read_u8().map_err(|e| e.to_string())?;
    let header_len = match major {
        1 => cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())? as usize,
        2 | 3 => cur.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize,
        v => return Err(format!("unsupported npy version {v}")),
    };
    let start = cur.position() as usize;
    let end = start
        .checked_add(header_len)
        .ok_or("header length overflows")?;
    let raw = bytes
        .get(start..end)
        .ok_or("header extends past end of file")?;
    let text = std::str::from_utf8(raw).map_err(|e| format!("header is not text: {e}"))?;
    let header = HeaderParser::new(text).parse()?;

    let dtype = Dtype::parse(&header.descr)
        .ok_or_else(|| format!("unsupported dtype '{}'", header.descr))?;
    let (rows, cols) = match header.shape[..] {
        [r, c] => (r, c),
        _ => return Err(format!("expected a 2-D array, got shape {:?}", header.shape)),
    };

    let payload = &bytes[end..];
    let count = rows
        .checked_mul(cols)
        .ok_or_else(|| format!("shape ({rows}, {cols}) is too large"))?;
    let expected = count
        .checked_mul(dtype.item_size())
        .ok_or_else(|| format!("shape ({rows}, {cols}) is too large"))?;
    if payload.len() != expected {
        return Err(format!(
            "payload has {} bytes, shape ({rows}, {cols}) needs {expected}",
            payload.len()
        ));
    }

    let mut cur = Cursor::new(payload);
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        data.push(dtype.read_one(&mut cur).map_err(|e| e.to_string())?);
    }

    Ok(if header.fortran_order {
        DMatrix::from_vec(rows, cols, data)
    } else {
        DMatrix::from_row_slice(rows, cols, &data)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> DMatrix<Complex32> {
        DMatrix::from_fn(3, 2, |i, j| Complex32::new(i as f32 + 0.5, j as f32 - 1.0))
    }

    #[test]
    fn header_is_aligned_and_terminated() {
        let bytes = encode(&sample_matrix()).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGNMENT, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 3 * 2 * 8);
    }

    #[test]
    fn write_then_read_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.npy");
        let m = sample_matrix();
        write_matrix(&path, &m).unwrap();
        assert_eq!(read_matrix(&path).unwrap(), m);
        assert!(!dir.path().join("m.npy.partial").exists());
    }

    #[test]
    fn fortran_order_and_double_precision() {
        let header = "{'descr': '<c16', 'fortran_order': True, 'shape': (2, 2), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        // Column-major: (0,0), (1,0), (0,1), (1,1)
        for v in [1.0f64, 2.0, 3.0, 4.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
            bytes.extend_from_slice(&0.0f64.to_le_bytes());
        }
        let m = decode(&bytes).unwrap();
        assert_eq!(m[(1, 0)], Complex32::new(2.0, 0.0));
        assert_eq!(m[(0, 1)], Complex32::new(3.0, 0.0));
    }

    #[test]
    fn header_parser_rejects_expressions() {
        let err = HeaderParser::new("{'descr': __import__('os'), 'shape': (1, 1)}")
            .parse()
            .unwrap_err();
        assert!(err.contains("unsupported header value"));
    }

    #[test]
    fn one_dimensional_arrays_are_rejected() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        assert!(decode(&bytes).unwrap_err().contains("2-D"));
    }

    #[test]
    fn truncated_payload_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.npy");
        let mut bytes = encode(&sample_matrix()).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();
        assert!(matches!(read_matrix(&path), Err(Error::FormatError { .. })));
    }

    #[test]
    fn oversized_shape_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.npy");
        let header = "{'descr': '<c8', 'fortran_order': False, 'shape': (4611686018427387904, 4), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        fs::write(&path, bytes).unwrap();
        match read_matrix(&path) {
            Err(Error::FormatError { reason, .. }) => assert!(reason.contains("too large")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn header_length_past_end_of_file() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[2, 0]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn missing_file() {
        let err = read_matrix(Path::new("/nonexistent/basis.npy")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
