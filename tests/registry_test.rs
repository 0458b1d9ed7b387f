//! Tests for adapter loading and the persona registry.

use std::path::{Path, PathBuf};

use persona_engine::LoraDelta;
use persona_gateway::adapter::{CONFIG_FILE, LORA_A, WEIGHTS_FILE};
use persona_gateway::weights::write_file;
use persona_gateway::{load_adapter, save_adapter, AdapterConfig, AdapterError, PersonaConfig, Registry};

const D_IN: usize = 4;
const D_OUT: usize = 6;
const RANK: usize = 2;

fn write_adapter(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    let delta = LoraDelta::new(
        RANK,
        4.0,
        D_IN,
        D_OUT,
        (0..RANK * D_IN).map(|i| i as f32 * 0.1).collect(),
        (0..D_OUT * RANK).map(|i| i as f32 * -0.1).collect(),
    )
    .unwrap();
    save_adapter(&dir, &AdapterConfig::new(RANK, 4.0), &delta).unwrap();
    dir
}

fn persona(id: &str, adapter: PathBuf) -> PersonaConfig {
    PersonaConfig {
        id: id.to_string(),
        instruction: format!("Du bist {id}."),
        adapter,
    }
}

#[test]
fn adapter_roundtrips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "kant");

    let delta = load_adapter(&path).unwrap();
    assert_eq!(delta.rank(), RANK);
    assert_eq!(delta.d_in(), D_IN);
    assert_eq!(delta.d_out(), D_OUT);
    assert!((delta.scale() - 2.0).abs() < 1e-6);
    assert!((delta.a()[1] - 0.1).abs() < 1e-6);
}

#[test]
fn missing_adapter_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_adapter(&dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, AdapterError::MissingAdapter(_)));
}

#[test]
fn malformed_adapter_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "marx");
    std::fs::write(path.join(CONFIG_FILE), "{ not json").unwrap();
    assert!(matches!(load_adapter(&path), Err(AdapterError::Json(_))));
}

#[test]
fn rank_mismatch_between_config_and_tensors_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "gehlen");
    let config = serde_json::json!({ "r": 3, "lora_alpha": 4.0 });
    std::fs::write(path.join(CONFIG_FILE), config.to_string()).unwrap();
    assert!(matches!(
        load_adapter(&path),
        Err(AdapterError::ShapeMismatch { .. })
    ));
}

#[test]
fn adapter_for_other_module_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "plessner");
    let config = serde_json::json!({ "r": 2, "lora_alpha": 4.0, "target_modules": ["q_proj"] });
    std::fs::write(path.join(CONFIG_FILE), config.to_string()).unwrap();
    assert!(matches!(load_adapter(&path), Err(AdapterError::Format(_))));
}

#[test]
fn missing_lora_tensor_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "loewith");
    write_file(
        &path.join(WEIGHTS_FILE),
        &[(LORA_A, &[RANK, D_IN][..], &[0.0f32; RANK * D_IN][..])],
        &[],
    )
    .unwrap();
    assert!(matches!(
        load_adapter(&path),
        Err(AdapterError::MissingTensor(_))
    ));
}

#[test]
fn oversized_tensor_shape_fails_registry_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_adapter(dir.path(), "plessner");
    let header = serde_json::to_vec(&serde_json::json!({
        LORA_A: { "dtype": "F32", "shape": [RANK, 1u64 << 62], "data_offsets": [0, 0] }
    }))
    .unwrap();
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(&header);
    std::fs::write(path.join(WEIGHTS_FILE), bytes).unwrap();

    assert!(matches!(
        Registry::load(&[persona("plessner", path)]),
        Err(AdapterError::Format(_))
    ));
}

#[test]
fn registry_loads_and_resolves_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let configs = vec![
        persona("kant", write_adapter(dir.path(), "kant")),
        persona("Marx", write_adapter(dir.path(), "marx")),
    ];
    let registry = Registry::load(&configs).unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.ids(), ["kant".to_string(), "marx".to_string()]);
    assert_eq!(registry.resolve("KANT").unwrap().id(), "kant");
    assert_eq!(registry.resolve("marx").unwrap().instruction(), "Du bist Marx.");
    assert!(registry.resolve("unknown").is_none());
}

#[test]
fn registry_fails_on_any_bad_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let configs = vec![
        persona("kant", write_adapter(dir.path(), "kant")),
        persona("marx", dir.path().join("missing")),
    ];
    assert!(matches!(
        Registry::load(&configs),
        Err(AdapterError::MissingAdapter(_))
    ));
}

#[test]
fn registry_rejects_duplicates_and_bad_ids() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = write_adapter(dir.path(), "kant");

    let dupes = vec![persona("kant", adapter.clone()), persona("KANT", adapter.clone())];
    assert!(matches!(
        Registry::load(&dupes),
        Err(AdapterError::DuplicatePersona(id)) if id == "kant"
    ));

    for bad in ["", "a/b", "two words"] {
        assert!(matches!(
            Registry::load(&[persona(bad, adapter.clone())]),
            Err(AdapterError::InvalidPersona { .. })
        ));
    }
}

#[test]
fn registry_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Registry>();
}
