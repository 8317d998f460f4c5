//! Persistence behavior seen from a resuming crawl

use gleaner::config::{Config, PartitionEntry};
use gleaner::crawler::{Coordinator, CrawlOptions};
use gleaner::renderer::MemoryRenderer;
use gleaner::storage::{JsonStore, LoadSource};
use gleaner::{StateStore, WorkCoordinate};
use std::fs;
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.partitions = vec![PartitionEntry::new("1", 1, Some(3))];
    config.output.state_path = dir.path().join("cards.json");
    config.output.diagnostics_dir = dir.path().join("diagnostics");
    config
}

const LEGACY_DOCUMENT: &str = r#"{
    "totalCards": 2,
    "processedPages": ["1-1"],
    "cards": [
        {
            "imageUrl": "https://shoob.gg/img/1.png",
            "detailUrl": "https://shoob.gg/cards/info/1",
            "cardName": "Sakura",
            "animeName": "Naruto",
            "creator": "Kira",
            "tier": 1,
            "page": 1
        },
        {
            "imageUrl": "https://shoob.gg/img/2.png",
            "cardName": "Sasuke",
            "animeName": "Unknown Anime",
            "creator": "Official Art",
            "tier": 1,
            "page": 2
        }
    ]
}"#;

#[test]
fn test_legacy_document_is_sanitized_on_resume() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    fs::write(&config.output.state_path, LEGACY_DOCUMENT).unwrap();

    let coordinator = Coordinator::new(config, MemoryRenderer::new(), CrawlOptions::default())
        .expect("Failed to create coordinator");

    assert_eq!(coordinator.load_source(), &LoadSource::Canonical);
    let merger = coordinator.scheduler().merger();
    // The unresolved legacy record is dropped under the default strict policy
    assert_eq!(merger.len(), 1);
    let record = &merger.state().records[0];
    assert_eq!(record.display_name, "Sakura");
    assert_eq!(record.category, "Naruto");
    assert_eq!(record.partition, "1");
    assert_eq!(record.composite_description, "Sakura from Naruto");
    assert!(merger.is_complete(&WorkCoordinate::new("1", 1)));
}

#[test]
fn test_corrupt_canonical_falls_back_to_backup() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let store = JsonStore::from_config(&config.output, config.partition_order());

    let mut state = gleaner::CrawlState::new();
    state.completed.insert(WorkCoordinate::new("1", 1));
    state.completed.insert(WorkCoordinate::new("1", 2));
    store.save(&state).unwrap();
    assert!(store.backup_path().exists());

    // Simulate a crash that left a truncated canonical file
    fs::write(store.path(), "{\"records\": [").unwrap();

    let coordinator = Coordinator::new(config, MemoryRenderer::new(), CrawlOptions::default())
        .expect("Failed to create coordinator");

    assert_eq!(coordinator.load_source(), &LoadSource::Backup);
    let merger = coordinator.scheduler().merger();
    assert!(merger.is_complete(&WorkCoordinate::new("1", 2)));
}

#[test]
fn test_saved_document_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let store = JsonStore::from_config(&config.output, config.partition_order());

    let mut state = gleaner::CrawlState::new();
    state.completed.insert(WorkCoordinate::new("1", 3));
    state.completed.insert(WorkCoordinate::new("1", 1));
    state.stats.record(true);
    state.stats.record(false);
    store.save(&state).unwrap();

    let raw = fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains("\"completedCoordinates\""));
    assert!(raw.contains("\"totalAttempts\": 2"));

    let loaded = store.load().unwrap();
    assert_eq!(loaded.completed, state.completed);
    assert_eq!(loaded.stats.attempts, 2);
    assert_eq!(loaded.stats.successes, 1);

    // No temporary files are left next to the canonical document
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "cards.json" && n != "cards.backup.json" && n != "snapshots")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}
