use std::path::Path;

use persona_engine::LoraDelta;
use persona_gateway::{save_adapter, AdapterConfig, PersonaConfig};
use persona_runtime::BaseModel;
use persona_server::config::{EngineKind, RagSection};
use persona_server::{build_state, GatewayConfig, StartupError};
use persona_tokenizer::{WordTokenizer, EOS_TOKEN, UNK_TOKEN};

const HIDDEN: usize = 3;
const WORDS: &[&str] = &[EOS_TOKEN, UNK_TOKEN, "Frage", ":", "Antwort", "Vernunft", "."];

fn write_base(dir: &Path) {
    let tokenizer =
        WordTokenizer::from_words(WORDS.iter().map(|w| w.to_string()).collect()).unwrap();
    BaseModel::seeded(tokenizer, HIDDEN, 0.5, 0.5, 3)
        .unwrap()
        .save(dir)
        .unwrap();
}

fn write_adapter(dir: &Path, d_in: usize, d_out: usize) {
    let delta = LoraDelta::new(1, 2.0, d_in, d_out, vec![0.1; d_in], vec![0.2; d_out]).unwrap();
    save_adapter(dir, &AdapterConfig::new(1, 2.0), &delta).unwrap();
}

fn config(root: &Path, kind: EngineKind) -> GatewayConfig {
    let mut config = GatewayConfig {
        personas: vec![PersonaConfig {
            id: "Kant".into(),
            instruction: "Du bist Immanuel Kant.".into(),
            adapter: root.join("adapters/kant"),
        }],
        ..Default::default()
    };
    config.engine.kind = kind;
    config.engine.base_model = root.join("base");
    config
}

#[test]
fn lora_engine_with_matching_adapters_starts() {
    let dir = tempfile::tempdir().unwrap();
    write_base(&dir.path().join("base"));
    write_adapter(&dir.path().join("adapters/kant"), HIDDEN, WORDS.len());

    let state = build_state(config(dir.path(), EngineKind::Lora)).unwrap();
    assert_eq!(state.registry.ids(), ["kant"]);
    assert_eq!(state.gate.stats().acquired, 0);
}

#[test]
fn incompatible_adapter_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_base(&dir.path().join("base"));
    write_adapter(&dir.path().join("adapters/kant"), HIDDEN + 1, WORDS.len());

    let err = build_state(config(dir.path(), EngineKind::Lora)).err().unwrap();
    assert!(matches!(err, StartupError::Engine(_)), "{err}");
}

#[test]
fn missing_adapter_or_base_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = build_state(config(dir.path(), EngineKind::Scripted)).err().unwrap();
    assert!(matches!(err, StartupError::Registry(_)), "{err}");

    write_adapter(&dir.path().join("adapters/kant"), HIDDEN, WORDS.len());
    let err = build_state(config(dir.path(), EngineKind::Lora)).err().unwrap();
    assert!(matches!(err, StartupError::Engine(_)), "{err}");
}

#[test]
fn scripted_engine_needs_no_base_model() {
    let dir = tempfile::tempdir().unwrap();
    write_adapter(&dir.path().join("adapters/kant"), 2, 2);
    assert!(build_state(config(dir.path(), EngineKind::Scripted)).is_ok());
}

#[test]
fn retrieval_corpus_is_optional_but_must_exist_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    write_adapter(&dir.path().join("adapters/kant"), 2, 2);

    let mut with_rag = config(dir.path(), EngineKind::Scripted);
    with_rag.rag = Some(RagSection {
        corpus_dir: dir.path().join("rag"),
        ..Default::default()
    });
    let err = build_state(with_rag.clone()).err().unwrap();
    assert!(matches!(err, StartupError::Rag(_)), "{err}");

    std::fs::create_dir(dir.path().join("rag")).unwrap();
    std::fs::write(
        dir.path().join("rag/kant.jsonl"),
        r#"{"messages":[{"role":"user","content":"Was ist Aufklärung?"},{"role":"assistant","content":"Sapere aude."}]}"#,
    )
    .unwrap();
    let state = build_state(with_rag).unwrap();
    assert!(state
        .context
        .context_for("kant", "Aufklärung")
        .unwrap()
        .contains("Sapere aude."));
}
