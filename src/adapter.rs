//! LoRA adapter directories.
//!
//! An adapter directory holds two files, named the way PEFT writes them:
//! - `adapter_config.json` with at least `r` and `lora_alpha`
//! - `adapter_model.safetensors` with the `lora_A` / `lora_B` factors of the
//!   output projection (`lm_head`)

use std::path::Path;

use persona_engine::LoraDelta;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::weights::safetensors::{write_file, SafetensorsFile};

pub const CONFIG_FILE: &str = "adapter_config.json";
pub const WEIGHTS_FILE: &str = "adapter_model.safetensors";

pub const LORA_A: &str = "base_model.model.lm_head.lora_A.weight";
pub const LORA_B: &str = "base_model.model.lm_head.lora_B.weight";

const TARGET_MODULE: &str = "lm_head";

/// Contents of `adapter_config.json`. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// LoRA rank.
    pub r: usize,

    pub lora_alpha: f32,

    #[serde(default)]
    pub target_modules: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model_name_or_path: Option<String>,
}

impl AdapterConfig {
    pub fn new(r: usize, lora_alpha: f32) -> Self {
        Self {
            r,
            lora_alpha,
            target_modules: vec![TARGET_MODULE.to_string()],
            base_model_name_or_path: None,
        }
    }
}

/// Load and validate the adapter stored in `dir`.
pub fn load_adapter(dir: &Path) -> Result<LoraDelta> {
    if !dir.is_dir() {
        return Err(AdapterError::MissingAdapter(dir.to_path_buf()));
    }

    let config_path = dir.join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| AdapterError::io(&config_path, e))?;
    let config: AdapterConfig = serde_json::from_str(&raw)?;

    if config.r == 0 {
        return Err(AdapterError::Format(format!(
            "{}: rank must be at least 1",
            config_path.display()
        )));
    }
    if !config.target_modules.is_empty()
        && !config.target_modules.iter().any(|m| m == TARGET_MODULE)
    {
        return Err(AdapterError::Format(format!(
            "{}: adapter does not target {TARGET_MODULE} (targets {:?})",
            config_path.display(),
            config.target_modules
        )));
    }

    let weights = SafetensorsFile::open(&dir.join(WEIGHTS_FILE))?;
    let (a, a_shape) = weights.read_f32(LORA_A)?;
    let (b, b_shape) = weights.read_f32(LORA_B)?;

    if a_shape.len() != 2 || a_shape[0] != config.r {
        return Err(AdapterError::ShapeMismatch {
            name: LORA_A.to_string(),
            expected: format!("[{}, d_in]", config.r),
            got: format!("{a_shape:?}"),
        });
    }
    if b_shape.len() != 2 || b_shape[1] != config.r {
        return Err(AdapterError::ShapeMismatch {
            name: LORA_B.to_string(),
            expected: format!("[d_out, {}]", config.r),
            got: format!("{b_shape:?}"),
        });
    }

    let delta = LoraDelta::new(config.r, config.lora_alpha, a_shape[1], b_shape[0], a, b)
        .ok_or_else(|| AdapterError::Format(format!("{}: inconsistent factors", dir.display())))?;

    tracing::debug!(
        adapter = %dir.display(),
        rank = delta.rank(),
        d_in = delta.d_in(),
        d_out = delta.d_out(),
        "loaded adapter"
    );
    Ok(delta)
}

/// Write `delta` to `dir` in the layout [`load_adapter`] reads.
pub fn save_adapter(dir: &Path, config: &AdapterConfig, delta: &LoraDelta) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AdapterError::io(dir, e))?;

    let config_path = dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json).map_err(|e| AdapterError::io(&config_path, e))?;

    let a_shape = [delta.rank(), delta.d_in()];
    let b_shape = [delta.d_out(), delta.rank()];
    write_file(
        &dir.join(WEIGHTS_FILE),
        &[
            (LORA_A, &a_shape[..], delta.a()),
            (LORA_B, &b_shape[..], delta.b()),
        ],
        &[("format", "pt")],
    )
}
