//! Gateway configuration.
//!
//! Loaded once from a TOML file. Every section except `[[personas]]` has
//! defaults, so a minimal file only lists the personas and the base model.
//! Relative paths are resolved against the directory holding the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use persona_engine::SamplingParams;
use persona_gateway::PersonaConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerSection,
    pub engine: EngineSection,
    pub generation: GenerationSection,
    pub stream: StreamSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag: Option<RagSection>,
    pub personas: Vec<PersonaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

/// Which [`GenerationEngine`](persona_engine::GenerationEngine) backs the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// LoRA word model loaded from `base_model`.
    #[default]
    Lora,
    /// Deterministic scripted engine, for demos and load tests.
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub kind: EngineKind,
    /// Directory with `config.json`, `model.safetensors` and `vocab.json`.
    pub base_model: PathBuf,
    /// Per-fragment delay of the scripted engine.
    pub fragment_delay_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            kind: EngineKind::Lora,
            base_model: PathBuf::from("model/base"),
            fragment_delay_ms: 50,
        }
    }
}

/// Default sampling parameters and the hard cap on requested output length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub max_output_tokens: usize,
    pub temperature: f32,
    pub nucleus_p: f32,
    pub repetition_penalty: f32,
    pub output_token_limit: usize,
}

impl Default for GenerationSection {
    fn default() -> Self {
        let params = SamplingParams::default();
        Self {
            max_output_tokens: params.max_output_tokens,
            temperature: params.temperature,
            nucleus_p: params.nucleus_p,
            repetition_penalty: params.repetition_penalty,
            output_token_limit: 1024,
        }
    }
}

impl GenerationSection {
    pub fn defaults(&self) -> SamplingParams {
        SamplingParams {
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            nucleus_p: self.nucleus_p,
            repetition_penalty: self.repetition_penalty,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub keepalive_secs: f64,
    pub stall_timeout_secs: f64,
    pub channel_capacity: usize,
    pub strip_reasoning: bool,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            keepalive_secs: 12.0,
            stall_timeout_secs: 30.0,
            channel_capacity: 64,
            strip_reasoning: true,
        }
    }
}

impl StreamSection {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs_f64(self.keepalive_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stall_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub corpus_dir: PathBuf,
    pub top_k: usize,
    pub max_docs: usize,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("rag"),
            top_k: 4,
            max_docs: persona_rag::DEFAULT_MAX_DOCS,
        }
    }
}

impl GatewayConfig {
    /// Read, resolve and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: GatewayConfig = toml::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.engine.base_model);
        if let Some(rag) = self.rag.as_mut() {
            resolve(&mut rag.corpus_dir);
        }
        for persona in &mut self.personas {
            resolve(&mut persona.adapter);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.personas.is_empty() {
            return invalid("at least one [[personas]] entry is required".into());
        }
        if self.server.port == 0 {
            return invalid("server.port must be non-zero".into());
        }
        self.addr()?;

        let stream = &self.stream;
        if !(stream.keepalive_secs.is_finite() && stream.keepalive_secs > 0.0) {
            return invalid(format!(
                "stream.keepalive_secs must be > 0 (got {})",
                stream.keepalive_secs
            ));
        }
        if !(stream.stall_timeout_secs.is_finite() && stream.stall_timeout_secs > 0.0) {
            return invalid(format!(
                "stream.stall_timeout_secs must be > 0 (got {})",
                stream.stall_timeout_secs
            ));
        }
        if stream.channel_capacity == 0 {
            return invalid("stream.channel_capacity must be at least 1".into());
        }

        let generation = &self.generation;
        if generation.output_token_limit == 0 {
            return invalid("generation.output_token_limit must be at least 1".into());
        }
        if generation.max_output_tokens > generation.output_token_limit {
            return invalid(format!(
                "generation.max_output_tokens ({}) exceeds output_token_limit ({})",
                generation.max_output_tokens, generation.output_token_limit
            ));
        }
        generation
            .defaults()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("generation: {e}")))?;

        if let Some(rag) = &self.rag {
            if rag.top_k == 0 {
                return invalid("rag.top_k must be at least 1".into());
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[engine]
base_model = "model/base"

[[personas]]
id = "kant"
instruction = "Du bist Immanuel Kant."
adapter = "adapters/kant"
"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: GatewayConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.generation.max_output_tokens, 160);
        assert_eq!(config.stream.keepalive(), Duration::from_secs(12));
        assert_eq!(config.stream.stall_timeout(), Duration::from_secs(30));
        assert!(config.stream.strip_reasoning);
        assert_eq!(config.engine.kind, EngineKind::Lora);
        assert!(config.rag.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, format!("{MINIMAL}\n[rag]\ncorpus_dir = \"rag\"\n")).unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.engine.base_model, dir.path().join("model/base"));
        assert_eq!(config.personas[0].adapter, dir.path().join("adapters/kant"));
        let rag = config.rag.unwrap();
        assert_eq!(rag.corpus_dir, dir.path().join("rag"));
        assert_eq!(rag.top_k, 4);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config: GatewayConfig = toml::from_str(MINIMAL).unwrap();
        config.stream.keepalive_secs = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: GatewayConfig = toml::from_str(MINIMAL).unwrap();
        config.generation.temperature = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: GatewayConfig = toml::from_str(MINIMAL).unwrap();
        config.generation.max_output_tokens = 4096;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = GatewayConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[server\nport = 1").unwrap();
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            GatewayConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
