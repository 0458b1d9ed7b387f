//! # persona-cli
//!
//! Offline tooling around the gateway:
//! - [`scaffold`] writes a seeded demo base model, one adapter per persona
//!   and a matching `gateway.toml`, so the server can start without any
//!   trained weights.
//! - [`generate`] runs one generation through the same registry, engine and
//!   visible-text filter the server uses, without HTTP.

use std::path::{Path, PathBuf};

use persona_engine::{CancellationToken, EngineError, LoraDelta, SamplingParams};
use persona_gateway::{save_adapter, AdapterConfig, AdapterError, PersonaConfig, Registry};
use persona_runtime::{BaseModel, RuntimeError};
use persona_sampling::SeededRng;
use persona_server::config::{EngineSection, GatewayConfig};
use persona_server::startup::{build_engine, StartupError};
use persona_server::{ConfigError, VisibleText};
use persona_tokenizer::{TokenizerError, WordTokenizer, EOS_TOKEN, UNK_TOKEN};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0} already exists (use --force to overwrite)")]
    Exists(PathBuf),
    #[error("unknown persona '{0}'")]
    UnknownPersona(String),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot serialize config: {0}")]
    Toml(#[from] toml::ser::Error),
    #[error("startup error: {0}")]
    Startup(#[from] StartupError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("model error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("generation error: {0}")]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// A demo persona: id, instruction and the words its adapter favours.
#[derive(Debug, Clone, Copy)]
pub struct DemoPersona {
    pub id: &'static str,
    pub instruction: &'static str,
    pub topics: &'static [&'static str],
}

pub const PERSONAS: &[DemoPersona] = &[
    DemoPersona {
        id: "kant",
        instruction: "Du bist Immanuel Kant. Erkläre ungesellige Geselligkeit (Antagonismus) schülernah, ohne Aufzählungen. Antworte ausschließlich auf Deutsch.",
        topics: &["Vernunft", "Aufklärung", "Antagonismus", "Geselligkeit", "Pflicht", "Freiheit"],
    },
    DemoPersona {
        id: "marx",
        instruction: "Du bist Karl Marx. Erkläre Entfremdung, Arbeit, Bourgeoisie schülernah, ohne Aufzählungen. Antworte ausschließlich auf Deutsch.",
        topics: &["Arbeit", "Entfremdung", "Bourgeoisie", "Kapital", "Klasse", "Ware"],
    },
    DemoPersona {
        id: "gehlen",
        instruction: "Du bist Arnold Gehlen. Erkläre Mängelwesen, Weltoffenheit, Institutionen schülernah, ohne Aufzählungen. Antworte ausschließlich auf Deutsch.",
        topics: &["Mängelwesen", "Weltoffenheit", "Institutionen", "Entlastung", "Handlung"],
    },
    DemoPersona {
        id: "plessner",
        instruction: "Du bist Helmuth Plessner. Erkläre exzentrische Positionalität schülernah, ohne Aufzählungen. Antworte ausschließlich auf Deutsch.",
        topics: &["Positionalität", "exzentrisch", "Künstlichkeit", "Leib", "Körper"],
    },
    DemoPersona {
        id: "loewith",
        instruction: "Du bist Karl Löwith. Erkläre Kulturwesen und zweite Natur schülernah, ohne Aufzählungen. Antworte ausschließlich auf Deutsch.",
        topics: &["Kulturwesen", "Natur", "zweite", "Distanz", "Welt"],
    },
];

const COMMON_WORDS: &[&str] = &[
    "Frage", "Antwort", ":", ".", ",", "?", "!", "der", "die", "das", "und", "ist", "ein",
    "eine", "nicht", "zu", "in", "den", "Mensch", "Menschen", "Gesellschaft", "sich", "als",
    "auch", "wir", "er", "sie", "es", "wird", "sind", "durch", "mit", "Sinn", "Leben",
];

/// Hidden size of the scaffolded base model.
pub const DEMO_HIDDEN: usize = 24;
const DEMO_RANK: usize = 4;
const DEMO_ALPHA: f32 = 8.0;
const TOPIC_BOOST: f32 = 3.0;

pub const CONFIG_FILE: &str = "gateway.toml";
const BASE_DIR: &str = "model/base";
const ADAPTER_DIR: &str = "adapters";

/// Vocabulary of the demo model: special tokens, common words, then every
/// persona's topic words.
pub fn demo_vocabulary() -> Vec<String> {
    let mut words: Vec<String> = vec![EOS_TOKEN.to_string(), UNK_TOKEN.to_string()];
    let extra = COMMON_WORDS
        .iter()
        .chain(PERSONAS.iter().flat_map(|p| p.topics.iter()));
    for word in extra {
        if !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

/// Files written by [`scaffold`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScaffoldReport {
    pub config: PathBuf,
    pub base_model: PathBuf,
    pub adapters: Vec<PathBuf>,
}

/// Write a complete demo deployment under `out`.
pub fn scaffold(out: &Path, seed: u64, force: bool) -> Result<ScaffoldReport> {
    let config_path = out.join(CONFIG_FILE);
    if config_path.exists() && !force {
        return Err(CliError::Exists(config_path));
    }
    std::fs::create_dir_all(out).map_err(|source| CliError::Io {
        path: out.to_path_buf(),
        source,
    })?;

    let tokenizer = WordTokenizer::from_words(demo_vocabulary())?;
    let base = BaseModel::seeded(tokenizer, DEMO_HIDDEN, 0.6, 0.5, seed)?;
    let base_dir = out.join(BASE_DIR);
    base.save(&base_dir)?;

    let mut rng = SeededRng::new(seed ^ 0x5eed);
    let mut personas = Vec::with_capacity(PERSONAS.len());
    let mut adapters = Vec::with_capacity(PERSONAS.len());
    for demo in PERSONAS {
        let delta = persona_delta(&base, demo, &mut rng)?;
        let relative = Path::new(ADAPTER_DIR).join(demo.id);
        let dir = out.join(&relative);
        let config = AdapterConfig {
            base_model_name_or_path: Some(BASE_DIR.to_string()),
            ..AdapterConfig::new(DEMO_RANK, DEMO_ALPHA)
        };
        save_adapter(&dir, &config, &delta)?;
        tracing::info!(persona = demo.id, adapter = %dir.display(), "wrote adapter");

        personas.push(PersonaConfig {
            id: demo.id.to_string(),
            instruction: demo.instruction.to_string(),
            adapter: relative,
        });
        adapters.push(dir);
    }

    let config = GatewayConfig {
        engine: EngineSection {
            base_model: PathBuf::from(BASE_DIR),
            ..Default::default()
        },
        personas,
        ..Default::default()
    };
    let toml = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, toml).map_err(|source| CliError::Io {
        path: config_path.clone(),
        source,
    })?;

    Ok(ScaffoldReport {
        config: config_path,
        base_model: base_dir,
        adapters,
    })
}

/// Random low-rank delta whose output rows for the persona's topic words
/// are amplified.
fn persona_delta(base: &BaseModel, demo: &DemoPersona, rng: &mut SeededRng) -> Result<LoraDelta> {
    let hidden = base.hidden_size();
    let vocab = base.vocab_size();
    let mut draw = |n: usize| -> Vec<f32> { (0..n).map(|_| rng.next_f32() * 2.0 - 1.0).collect() };

    let a = draw(DEMO_RANK * hidden);
    let mut b: Vec<f32> = draw(vocab * DEMO_RANK).into_iter().map(|w| w * 0.1).collect();
    for topic in demo.topics {
        if let Some(id) = base.tokenizer().id_of(topic) {
            let row = id as usize * DEMO_RANK;
            for w in &mut b[row..row + DEMO_RANK] {
                *w = w.signum() * TOPIC_BOOST;
            }
        }
    }

    LoraDelta::new(DEMO_RANK, DEMO_ALPHA, hidden, vocab, a, b).ok_or_else(|| {
        CliError::Adapter(AdapterError::InvalidPersona {
            id: demo.id.to_string(),
            reason: "delta shape does not match the base model".into(),
        })
    })
}

/// Result of one local generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub persona: String,
    pub text: String,
    pub fragments: usize,
}

/// Generate once as `persona`, calling `on_text` with each newly visible
/// piece of text.
pub fn generate(
    config_path: &Path,
    persona: &str,
    prompt: &str,
    params: &SamplingParams,
    mut on_text: impl FnMut(&str),
) -> Result<Generation> {
    let config = GatewayConfig::load(config_path)?;
    let registry = Registry::load(&config.personas)?;
    let persona = registry
        .resolve(persona)
        .ok_or_else(|| CliError::UnknownPersona(persona.to_string()))?;
    let mut engine = build_engine(&config, &registry)?;

    engine.activate(&persona)?;
    let mut visible = VisibleText::new(config.stream.strip_reasoning);
    let mut text = String::new();
    let mut fragments = 0;
    let mut emit = |piece: String, text: &mut String| {
        on_text(&piece);
        text.push_str(&piece);
    };
    for fragment in engine.generate(prompt, params, CancellationToken::new())? {
        fragments += 1;
        if let Some(piece) = visible.push(&fragment?) {
            emit(piece, &mut text);
        }
    }
    if let Some(piece) = visible.finish() {
        emit(piece, &mut text);
    }

    Ok(Generation {
        persona: persona.id().to_string(),
        text,
        fragments,
    })
}
