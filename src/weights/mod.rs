//! Weight file access.
//!
//! Adapters and base models are stored as safetensors files, memory-mapped on
//! load and copied out as `f32` vectors. Only F32 tensors are accepted; the
//! gateway's adapters are produced offline in that format.

pub mod mmap;
pub mod safetensors;

pub use self::safetensors::{write_file, SafetensorsFile, TensorInfo};
