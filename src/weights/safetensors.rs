//! Safetensors file format reader and writer.
//!
//! Layout:
//! ```text
//! [8 bytes: header_size (u64 LE)]
//! [header_size bytes: JSON header, tensor name -> {dtype, shape, data_offsets}]
//! [remaining bytes: tensor data]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::weights::mmap::MappedFile;

/// Metadata for a single tensor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TensorInfo {
    /// Data type string ("F32", "F16", "BF16", ...).
    pub dtype: String,

    pub shape: Vec<usize>,

    /// Byte range `[start, end)` within the data section.
    pub data_offsets: [usize; 2],
}

impl TensorInfo {
    pub fn byte_size(&self) -> usize {
        self.data_offsets[1].saturating_sub(self.data_offsets[0])
    }

    /// Product of the shape, or `None` when it does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
    }
}

/// Parsed header.
#[derive(Debug)]
pub struct SafetensorsHeader {
    pub tensors: HashMap<String, TensorInfo>,

    /// Free-form `__metadata__` entries.
    pub metadata: HashMap<String, String>,

    /// Offset of the data section from the start of the file.
    pub data_offset: usize,
}

/// Parse the header at the start of `bytes`.
pub fn parse_header(bytes: &[u8]) -> Result<SafetensorsHeader> {
    if bytes.len() < 8 {
        return Err(AdapterError::Format(
            "file too small for safetensors header".into(),
        ));
    }

    let header_size = (&bytes[..8])
        .read_u64::<LittleEndian>()
        .map_err(|e| AdapterError::Format(format!("failed to read header size: {e}")))?
        as usize;

    let data_offset = 8usize
        .checked_add(header_size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            AdapterError::Format(format!(
                "header size {header_size} exceeds file size {}",
                bytes.len()
            ))
        })?;

    let header_str = std::str::from_utf8(&bytes[8..data_offset])
        .map_err(|e| AdapterError::Format(format!("invalid UTF-8 in header: {e}")))?;

    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(header_str)?;

    let mut tensors = HashMap::new();
    let mut metadata = HashMap::new();
    let data_len = bytes.len() - data_offset;

    for (key, value) in raw {
        if key == "__metadata__" {
            if let Some(obj) = value.as_object() {
                for (mk, mv) in obj {
                    if let Some(s) = mv.as_str() {
                        metadata.insert(mk.clone(), s.to_string());
                    }
                }
            }
            continue;
        }

        let info: TensorInfo = serde_json::from_value(value).map_err(|e| {
            AdapterError::Format(format!("failed to parse tensor '{key}': {e}"))
        })?;
        if info.data_offsets[0] > info.data_offsets[1] || info.data_offsets[1] > data_len {
            return Err(AdapterError::Format(format!(
                "tensor '{key}' data range {:?} outside data section of {data_len} bytes",
                info.data_offsets
            )));
        }
        tensors.insert(key, info);
    }

    Ok(SafetensorsHeader {
        tensors,
        metadata,
        data_offset,
    })
}

/// An opened safetensors file.
pub struct SafetensorsFile {
    pub header: SafetensorsHeader,
    mapped: MappedFile,
}

impl SafetensorsFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mapped = MappedFile::open(path)?;
        let header = parse_header(mapped.as_bytes()).map_err(|e| match e {
            AdapterError::Format(msg) => {
                AdapterError::Format(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        Ok(SafetensorsFile { header, mapped })
    }

    pub fn info(&self, name: &str) -> Result<&TensorInfo> {
        self.header
            .tensors
            .get(name)
            .ok_or_else(|| AdapterError::MissingTensor(name.to_string()))
    }

    /// Raw bytes of a named tensor.
    pub fn tensor_data(&self, name: &str) -> Result<&[u8]> {
        let info = self.info(name)?;
        self.mapped
            .slice(self.header.data_offset + info.data_offsets[0], info.byte_size())
    }

    /// Copy a named F32 tensor out of the file, returning data and shape.
    pub fn read_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        let info = self.info(name)?;
        if info.dtype != "F32" {
            return Err(AdapterError::UnsupportedDtype(info.dtype.clone()));
        }
        let (count, expected_bytes) = info
            .element_count()
            .and_then(|count| Some((count, count.checked_mul(4)?)))
            .ok_or_else(|| {
                AdapterError::Format(format!(
                    "tensor '{name}' shape {:?} overflows the address space",
                    info.shape
                ))
            })?;
        if info.byte_size() != expected_bytes {
            return Err(AdapterError::Format(format!(
                "tensor '{name}' has {} bytes for {count} f32 elements",
                info.byte_size()
            )));
        }
        let bytes = self.tensor_data(name)?;
        let mut values = vec![0.0f32; count];
        LittleEndian::read_f32_into(bytes, &mut values);
        Ok((values, info.shape.clone()))
    }

    /// Like [`read_f32`](Self::read_f32) but also checks the shape.
    pub fn read_f32_shaped(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>> {
        let (values, shape) = self.read_f32(name)?;
        if shape != expected {
            return Err(AdapterError::ShapeMismatch {
                name: name.to_string(),
                expected: format!("{expected:?}"),
                got: format!("{shape:?}"),
            });
        }
        Ok(values)
    }
}

/// Write F32 tensors to a new safetensors file at `path`.
///
/// Tensors are laid out in name order so the output is deterministic.
pub fn write_file(
    path: &Path,
    tensors: &[(&str, &[usize], &[f32])],
    metadata: &[(&str, &str)],
) -> Result<()> {
    let mut ordered: Vec<&(&str, &[usize], &[f32])> = tensors.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut header = BTreeMap::new();
    let mut offset = 0usize;
    for (name, shape, data) in &ordered {
        let expected = shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim));
        if expected != Some(data.len()) {
            return Err(AdapterError::ShapeMismatch {
                name: name.to_string(),
                expected: format!("{shape:?}"),
                got: format!("{} elements", data.len()),
            });
        }
        let size = data.len() * 4;
        let info = TensorInfo {
            dtype: "F32".into(),
            shape: shape.to_vec(),
            data_offsets: [offset, offset + size],
        };
        header.insert(name.to_string(), serde_json::to_value(info)?);
        offset += size;
    }
    if !metadata.is_empty() {
        let meta: BTreeMap<&str, &str> = metadata.iter().copied().collect();
        header.insert("__metadata__".to_string(), serde_json::to_value(meta)?);
    }

    let header_bytes = serde_json::to_vec(&header)?;
    let mut out = Vec::with_capacity(8 + header_bytes.len() + offset);
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    for (_, _, data) in &ordered {
        let start = out.len();
        out.resize(start + data.len() * 4, 0);
        LittleEndian::write_f32_into(data, &mut out[start..]);
    }

    let mut file = std::fs::File::create(path).map_err(|e| AdapterError::io(path, e))?;
    file.write_all(&out).map_err(|e| AdapterError::io(path, e))?;
    Ok(())
}
