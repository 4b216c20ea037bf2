//! Minimal NumPy `.npy` codec for 2-D `u8` matrices.
//!
//! Gallery artifacts are plain `.npy` files (format 1.0, dtype `|u1`,
//! C order) so they can be inspected with `numpy.load`. Reading also
//! accepts format 2.0/3.0 headers.

use ndarray::{Array2, ArrayView2};
use std::io::{Read, Write};
use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
/// Total header size (magic + version + length + dict) is padded to this.
const HEADER_ALIGN: usize = 64;
const U8_DESCRS: [&str; 3] = ["|u1", "<u1", "u1"];

#[derive(Error, Debug)]
pub enum NpyError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an .npy file")]
    BadMagic,
    #[error("unsupported .npy format version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed header: {0}")]
    BadHeader(String),
    #[error("unsupported dtype {0:?}, expected |u1")]
    UnsupportedDtype(String),
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("data truncated: header promises {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Parsed `.npy` header for a 2-D `u8` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub rows: usize,
    pub cols: usize,
}

/// Write `matrix` as a format 1.0 `.npy` stream.
pub fn write_u8_matrix<W: Write>(mut writer: W, matrix: ArrayView2<u8>) -> Result<(), NpyError> {
    let (rows, cols) = matrix.dim();
    let mut dict = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");

    // magic(6) + version(2) + header_len(2) + dict + '\n'
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let header_len = u16::try_from(dict.len())
        .map_err(|_| NpyError::BadHeader(format!("header too long: {} bytes", dict.len())))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(dict.as_bytes())?;

    match matrix.as_slice() {
        Some(data) => writer.write_all(data)?,
        None => {
            for row in matrix.rows() {
                let row: Vec<u8> = row.iter().copied().collect();
                writer.write_all(&row)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read only the header, leaving `reader` positioned at the array data.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header, NpyError> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        major => return Err(NpyError::UnsupportedVersion(major, version[1])),
    };

    let mut raw = vec![0u8; header_len];
    reader.read_exact(&mut raw)?;
    let dict = String::from_utf8(raw).map_err(|_| NpyError::BadHeader("header is not UTF-8".into()))?;

    parse_header_dict(&dict)
}

/// Read a full 2-D `u8` matrix.
///
/// The buffer grows with the bytes actually present, so a header that
/// claims more data than the stream holds fails with `Truncated`.
pub fn read_u8_matrix<R: Read>(mut reader: R) -> Result<Array2<u8>, NpyError> {
    let header = read_header(&mut reader)?;
    let len = header
        .rows
        .checked_mul(header.cols)
        .ok_or_else(|| NpyError::BadHeader(format!("shape ({}, {}) overflows", header.rows, header.cols)))?;

    let mut data = Vec::new();
    reader.take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(NpyError::Truncated {
            expected: len,
            actual: data.len(),
        });
    }
    Ok(Array2::from_shape_vec((header.rows, header.cols), data)?)
}

fn parse_header_dict(dict: &str) -> Result<Header, NpyError> {
    let descr = dict_value(dict, "descr")
        .ok_or_else(|| NpyError::BadHeader("missing 'descr'".into()))?
        .trim_matches(|c| c == '\'' || c == '"');
    if !U8_DESCRS.contains(&descr) {
        return Err(NpyError::UnsupportedDtype(descr.to_string()));
    }

    let fortran = dict_value(dict, "fortran_order")
        .ok_or_else(|| NpyError::BadHeader("missing 'fortran_order'".into()))?;
    if fortran == "True" {
        return Err(NpyError::FortranOrder);
    }

    let shape_start = dict
        .find("'shape'")
        .ok_or_else(|| NpyError::BadHeader("missing 'shape'".into()))?;
    let rest = &dict[shape_start..];
    let open = rest
        .find('(')
        .ok_or_else(|| NpyError::BadHeader("shape is not a tuple".into()))?;
    let close = rest
        .find(')')
        .ok_or_else(|| NpyError::BadHeader("shape is not a tuple".into()))?;
    if close < open {
        return Err(NpyError::BadHeader("shape is not a tuple".into()));
    }

    let dims = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| NpyError::BadHeader(format!("bad dimension {s:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match dims.as_slice() {
        [rows, cols] => Ok(Header { rows: *rows, cols: *cols }),
        other => Err(NpyError::BadHeader(format!("expected 2-D shape, got {other:?}"))),
    }
}

/// Raw text of a scalar dict entry (`'key': value,`).
fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = dict.find(&pattern)? + pattern.len();
    let rest = dict[start..].trim_start();
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}
