mod common;

use chrono::Utc;

use common::{test_config, wav_bytes};
use narrator::config::{AppConfig, ConcatBackend, ContainerFormat};
use narrator::kernel::block::{Block, GenerationState, RichContent};
use narrator::kernel::state::{BlockDelta, BlockList, BlockStore};
use narrator::kernel::telemetry::event::{GenerationStage, TelemetryEvent};
use narrator::kernel::telemetry::recorder::TelemetryRecorder;
use narrator::services::storage::{DocumentStore, FileDocumentStore, LocalObjectStore, ObjectStore};
use narrator::ErrorKind;

#[tokio::test]
async fn test_local_object_store_signs_stored_objects() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalObjectStore::new(&config.storage);

    let stored = store.upload("demo/block/job-1.wav", wav_bytes(0.1)).await.unwrap();
    assert!(stored.durable_url.ends_with("/demo/block/job-1.wav"));
    assert!(config.storage.objects_dir.join("demo/block/job-1.wav").exists());

    let signed = store.signed_url(&stored.durable_url).await.unwrap();
    assert!(signed.url.starts_with(&stored.durable_url));
    assert!(!signed.is_expired(Utc::now()));
    assert!(signed.is_expired(signed.expires_at));

    let err = store.upload("../escape.wav", vec![1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    std::fs::remove_file(config.storage.objects_dir.join("demo/block/job-1.wav")).unwrap();
    let err = store.signed_url(&stored.durable_url).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage, "gone objects cannot be re-signed");

    let err = store.signed_url("https://elsewhere/x.wav").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[tokio::test]
async fn test_document_store_replaces_whole_list() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileDocumentStore::new(dir.path());

    let first = Block::new(RichContent::plain("one"), Some("nova".into()));
    let mut second = Block::new(RichContent::plain("two"), None);
    second.order = 1;
    second.audio_ref = Some("https://signed".into());
    store.replace_blocks("book", &[first.clone(), second.clone()]).await.unwrap();

    let loaded = store.get_blocks("book").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, first.id);
    assert!(loaded[1].audio_ref.is_none(), "signed links are session-only");

    store.replace_blocks("book", &[second.clone()]).await.unwrap();
    assert_eq!(store.get_blocks("book").await.unwrap().len(), 1);

    // Persisted shape uses camelCase keys.
    let raw = std::fs::read_to_string(dir.path().join("book.json")).unwrap();
    assert!(raw.contains("\"generationState\""));
    assert!(!raw.contains("audioRef"));

    let err = store.get_blocks("../etc").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("narrator.toml");

    let mut config = AppConfig::with_data_dir(dir.path().to_path_buf());
    config.export.backend = ConcatBackend::Ffmpeg;
    config.export.ffmpeg_format = ContainerFormat::Ogg;
    config.generation.max_poll_duration_ms = Some(90_000);
    config.save(&path).unwrap();

    let loaded = AppConfig::load(Some(path.as_path())).unwrap();
    assert_eq!(loaded.export.backend, ConcatBackend::Ffmpeg);
    assert_eq!(loaded.export.ffmpeg_format, ContainerFormat::Ogg);
    assert_eq!(loaded.generation.max_poll_duration_ms, Some(90_000));

    std::fs::write(&path, "log_level = [not toml").unwrap();
    let err = AppConfig::load(Some(path.as_path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn test_copy_on_write_snapshots() {
    let block = Block::new(RichContent::plain("alpha"), Some("nova".into()));
    let id = block.id;
    let store = BlockStore::new(BlockList::from_blocks(vec![block]));
    let mut changes = store.subscribe();

    let before = store.snapshot();
    store.apply(BlockDelta::GenerationRequested(id));
    let after = store.snapshot();

    assert_eq!(before.get(&id).unwrap().generation_state, GenerationState::Idle, "old snapshot untouched");
    assert_eq!(after.get(&id).unwrap().generation_state, GenerationState::Requesting);
    assert!(after.version > before.version);
    assert!(changes.has_changed().unwrap());
    assert_eq!(changes.borrow_and_update().version, after.version);

    // Unknown ids are dropped without touching existing blocks.
    let stranger = Block::new(RichContent::plain("?"), None).id;
    let next = store.apply(BlockDelta::ResetToIdle(stranger));
    assert_eq!(next.len(), 1);
    assert_eq!(next.get(&id).unwrap().generation_state, GenerationState::Requesting);
}

#[test]
fn test_telemetry_buffer_is_bounded() {
    let mut recorder = TelemetryRecorder::new();
    let id = Block::new(RichContent::plain("t"), None).id;
    for _ in 0..10_050 {
        recorder.record(TelemetryEvent::Generation {
            block_id: id,
            stage: GenerationStage::Requested,
            elapsed_ms: 0,
        });
    }
    assert_eq!(recorder.len(), 10_000);
    assert_eq!(recorder.snapshot().generation.requested, 10_000);
    recorder.clear();
    assert!(recorder.is_empty());
}
