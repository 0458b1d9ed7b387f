//! Memory-mapped, read-only access to weight files.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{AdapterError, Result};

/// A read-only memory map of a weight file.
///
/// The mapped region stays valid for the lifetime of this struct.
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    /// Map `path` into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AdapterError::io(path, e))?;

        // SAFETY: adapter and base weights are written once, offline, and are
        // never modified while the gateway runs.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AdapterError::io(path, e))?;

        Ok(MappedFile { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Bytes `[offset, offset + len)`, or an error when out of range.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.mmap.len())
            .ok_or_else(|| {
                AdapterError::Format(format!(
                    "range [{offset}..{offset}+{len}] exceeds file size {}",
                    self.mmap.len()
                ))
            })?;
        Ok(&self.mmap[offset..end])
    }

    pub fn size(&self) -> usize {
        self.mmap.len()
    }
}
