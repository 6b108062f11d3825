//! NPY array files for the feature cache.
//!
//! Writes format version 1.0 with little-endian `<f4` / `<i8` payloads in C
//! order; reads versions 1.x and 2.x of the same dtypes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::DatasetError;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Element types stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpyDtype {
    F32,
    I64,
}

impl NpyDtype {
    fn descr(self) -> &'static str {
        match self {
            NpyDtype::F32 => "<f4",
            NpyDtype::I64 => "<i8",
        }
    }

    fn size(self) -> usize {
        match self {
            NpyDtype::F32 => 4,
            NpyDtype::I64 => 8,
        }
    }

    fn from_descr(descr: &str) -> Option<Self> {
        match descr {
            "<f4" | "|f4" => Some(NpyDtype::F32),
            "<i8" | "|i8" => Some(NpyDtype::I64),
            _ => None,
        }
    }
}

/// Raw array read from disk
#[derive(Debug, Clone)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub dtype: NpyDtype,
    data: Vec<u8>,
}

impl NpyArray {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_f32(self) -> Result<Vec<f32>, DatasetError> {
        if self.dtype != NpyDtype::F32 {
            return Err(DatasetError::format(format!("expected <f4, got {:?}", self.dtype)));
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn into_i64(self) -> Result<Vec<i64>, DatasetError> {
        if self.dtype != NpyDtype::I64 {
            return Err(DatasetError::format(format!("expected <i8, got {:?}", self.dtype)));
        }
        Ok(self
            .data
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }
}

fn header_text(dtype: NpyDtype, shape: &[usize]) -> String {
    let dims = match shape {
        [single] => format!("({},)", single),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        dtype.descr(),
        dims
    );
    // magic(6) + version(2) + length(2) + header + '\n' must be 64-aligned
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');
    header
}

fn write_array(path: &Path, dtype: NpyDtype, shape: &[usize], payload: &[u8]) -> Result<(), DatasetError> {
    let expected: usize = shape.iter().product::<usize>() * dtype.size();
    if expected != payload.len() {
        return Err(DatasetError::invalid(format!(
            "shape {:?} needs {} bytes, payload has {}",
            shape,
            expected,
            payload.len()
        )));
    }

    let header = header_text(dtype, shape);
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Write an `f32` array
pub fn write_f32(path: &Path, shape: &[usize], values: &[f32]) -> Result<(), DatasetError> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_array(path, NpyDtype::F32, shape, &payload)
}

/// Write an `i64` array
pub fn write_i64(path: &Path, shape: &[usize], values: &[i64]) -> Result<(), DatasetError> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_array(path, NpyDtype::I64, shape, &payload)
}

/// Read an array file
///
/// # Errors
/// * `DatasetError::NotFound` - the file is absent
/// * `DatasetError::Format` - bad magic, unsupported dtype, Fortran order or
///   truncated payload
pub fn read(path: &Path) -> Result<NpyArray, DatasetError> {
    if !path.is_file() {
        return Err(DatasetError::not_found(path));
    }
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(DatasetError::format(format!("{} is not an NPY file", path.display())));
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
        other => return Err(DatasetError::format(format!("unsupported NPY version {}", other))),
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);

    let descr = dict_value(&header, "descr")
        .map(|raw| raw.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| DatasetError::format("NPY header has no descr"))?;
    let dtype = NpyDtype::from_descr(&descr)
        .ok_or_else(|| DatasetError::format(format!("unsupported dtype {}", descr)))?;

    if dict_value(&header, "fortran_order").as_deref() == Some("True") {
        return Err(DatasetError::format("Fortran-ordered arrays are not supported"));
    }

    let shape = parse_shape(&header)?;
    let mut data = vec![0u8; shape.iter().product::<usize>() * dtype.size()];
    reader
        .read_exact(&mut data)
        .map_err(|_| DatasetError::format(format!("{} payload is truncated", path.display())))?;

    Ok(NpyArray { shape, dtype, data })
}

/// Scalar value following `'key':` in the header dict
fn dict_value(header: &str, key: &str) -> Option<String> {
    let start = header
        .find(&format!("'{}'", key))
        .or_else(|| header.find(&format!("\"{}\"", key)))?;
    let rest = &header[start + key.len() + 2..];
    let rest = rest[rest.find(':')? + 1..].trim_start();
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn parse_shape(header: &str) -> Result<Vec<usize>, DatasetError> {
    let start = header
        .find("'shape'")
        .or_else(|| header.find("\"shape\""))
        .ok_or_else(|| DatasetError::format("NPY header has no shape"))?;
    let rest = &header[start..];
    let open = rest
        .find('(')
        .ok_or_else(|| DatasetError::format("NPY shape is not a tuple"))?;
    let close = rest
        .find(')')
        .ok_or_else(|| DatasetError::format("NPY shape tuple is unclosed"))?;

    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|err| DatasetError::format(format!("invalid shape element '{}': {}", dim, err)))
        })
        .collect()
}
