//! Atomic JSON document store
//!
//! The canonical document is replaced by writing a temporary file in the same
//! directory and renaming it over the target. After every successful rename the
//! document is copied to a backup path, and every N saves a timestamped snapshot
//! is kept. Backup and snapshot writes are best-effort.

use crate::config::{file_stem, OutputConfig};
use crate::state::CrawlState;
use crate::storage::document::StateDocument;
use crate::storage::traits::{SaveOutcome, StateStore, StorageError, StorageResult};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Where a loaded state came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Canonical,
    Backup,
    Snapshot(PathBuf),
    /// No state file existed
    Fresh,
    /// Every file was corrupt and an empty state was allowed
    EmptyFallback,
}

#[derive(Debug)]
pub struct LoadReport {
    pub state: CrawlState,
    pub source: LoadSource,
}

/// Health of one file in the backup chain
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub path: PathBuf,
    pub exists: bool,
    pub document: Option<StateDocument>,
    pub error: Option<String>,
}

pub struct JsonStore {
    path: PathBuf,
    backup_path: PathBuf,
    snapshot_dir: PathBuf,
    snapshot_every: u64,
    snapshot_keep: usize,
    partition_order: Vec<String>,
    saving: AtomicBool,
    saves: AtomicU64,
}

/// Clears the active-save flag when dropped
struct SaveGuard<'a>(&'a AtomicBool);

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JsonStore {
    /// Creates a store with backup and snapshot locations derived from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let output = OutputConfig {
            state_path: path.into(),
            ..OutputConfig::default()
        };
        Self::from_config(&output, Vec::new())
    }

    pub fn from_config(output: &OutputConfig, partition_order: Vec<String>) -> Self {
        Self {
            path: output.state_path.clone(),
            backup_path: output.effective_backup_path(),
            snapshot_dir: output.effective_snapshot_dir(),
            snapshot_every: output.snapshot_every.max(1),
            snapshot_keep: output.snapshot_keep,
            partition_order,
            saving: AtomicBool::new(false),
            saves: AtomicU64::new(0),
        }
    }

    pub fn with_partition_order(mut self, order: Vec<String>) -> Self {
        self.partition_order = order;
        self
    }

    pub fn with_snapshots(mut self, dir: impl Into<PathBuf>, every: u64, keep: usize) -> Self {
        self.snapshot_dir = dir.into();
        self.snapshot_every = every.max(1);
        self.snapshot_keep = keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn partition_order(&self) -> &[String] {
        &self.partition_order
    }

    /// Number of successful saves made through this store
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Acquire)
    }

    /// Reads and parses one document
    pub fn read_document(path: &Path) -> StorageResult<StateDocument> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Snapshot files, newest first
    pub fn list_snapshots(&self) -> Vec<PathBuf> {
        let prefix = format!("{}-", file_stem(&self.path));
        let mut snapshots: Vec<PathBuf> = match fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension().map_or(false, |ext| ext == "json")
                        && p.file_name()
                            .and_then(|n| n.to_str())
                            .map_or(false, |n| n.starts_with(&prefix))
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        // Timestamped names sort chronologically
        snapshots.sort();
        snapshots.reverse();
        snapshots
    }

    /// Canonical, backup, then snapshots newest first
    pub fn chain(&self) -> Vec<PathBuf> {
        let mut chain = vec![self.path.clone(), self.backup_path.clone()];
        chain.extend(self.list_snapshots());
        chain
    }

    /// Inspects every file in the backup chain without modifying anything
    pub fn inspect_chain(&self) -> Vec<ChainEntry> {
        self.chain()
            .into_iter()
            .map(|path| {
                if !path.exists() {
                    return ChainEntry {
                        path,
                        exists: false,
                        document: None,
                        error: None,
                    };
                }
                match Self::read_document(&path) {
                    Ok(document) => ChainEntry {
                        path,
                        exists: true,
                        document: Some(document),
                        error: None,
                    },
                    Err(e) => ChainEntry {
                        path,
                        exists: true,
                        document: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }

    /// Loads the first readable file in the backup chain
    ///
    /// With no files at all the crawl starts fresh. If files exist but none parse,
    /// this fails with [`StorageError::ChainExhausted`] unless `allow_empty` is set.
    pub fn load_with_fallback(&self, allow_empty: bool) -> StorageResult<LoadReport> {
        let mut failures = Vec::new();

        for (position, path) in self.chain().into_iter().enumerate() {
            if !path.exists() {
                continue;
            }

            match Self::read_document(&path) {
                Ok(document) => {
                    let source = match position {
                        0 => LoadSource::Canonical,
                        1 => LoadSource::Backup,
                        _ => LoadSource::Snapshot(path.clone()),
                    };
                    if source != LoadSource::Canonical {
                        warn!("Recovered state from {}", path.display());
                    }
                    return Ok(LoadReport {
                        state: document.into_state(),
                        source,
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable state file: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            debug!("No state found at {}; starting fresh", self.path.display());
            return Ok(LoadReport {
                state: CrawlState::new(),
                source: LoadSource::Fresh,
            });
        }

        if allow_empty {
            warn!(
                corrupt = failures.len(),
                "Every state file is corrupt; starting from an empty state"
            );
            return Ok(LoadReport {
                state: CrawlState::new(),
                source: LoadSource::EmptyFallback,
            });
        }

        Err(StorageError::ChainExhausted(failures.join("; ")))
    }

    /// Writes a document atomically to `path`, creating parent directories
    pub fn write_document(path: &Path, document: &StateDocument) -> StorageResult<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let json = serde_json::to_vec_pretty(document)?;
        let mut temp = NamedTempFile::new_in(&parent)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .map_err(|e| StorageError::Persist(e.to_string()))?;
        Ok(())
    }

    fn begin_save(&self) -> Option<SaveGuard<'_>> {
        self.saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SaveGuard(&self.saving))
    }

    fn write_backup(&self) {
        if let Some(parent) = self.backup_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        if let Err(e) = fs::copy(&self.path, &self.backup_path) {
            warn!("Backup copy to {} failed: {}", self.backup_path.display(), e);
        }
    }

    fn write_snapshot(&self, sequence: u64) {
        let name = format!(
            "{}-{}-{:06}.json",
            file_stem(&self.path),
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            sequence
        );
        let target = self.snapshot_dir.join(name);

        let result = fs::create_dir_all(&self.snapshot_dir)
            .and_then(|_| fs::copy(&self.path, &target).map(|_| ()));
        match result {
            Ok(()) => {
                info!("Snapshot written to {}", target.display());
                self.prune_snapshots();
            }
            Err(e) => warn!("Snapshot {} failed: {}", target.display(), e),
        }
    }

    fn prune_snapshots(&self) {
        for stale in self.list_snapshots().into_iter().skip(self.snapshot_keep) {
            if let Err(e) = fs::remove_file(&stale) {
                warn!("Could not prune snapshot {}: {}", stale.display(), e);
            }
        }
    }
}

impl StateStore for JsonStore {
    fn load(&self) -> StorageResult<CrawlState> {
        if !self.path.exists() {
            return Ok(CrawlState::new());
        }
        Ok(Self::read_document(&self.path)?.into_state())
    }

    fn save(&self, state: &CrawlState) -> StorageResult<SaveOutcome> {
        let Some(_guard) = self.begin_save() else {
            debug!("Save already in progress; skipping");
            return Ok(SaveOutcome::Skipped);
        };

        let document = StateDocument::from_state(state, &self.partition_order);
        Self::write_document(&self.path, &document)?;

        self.write_backup();

        let sequence = self.saves.fetch_add(1, Ordering::AcqRel) + 1;
        if sequence % self.snapshot_every == 0 {
            self.write_snapshot(sequence);
        }

        debug!(
            records = document.total_records,
            completed = document.completed_coordinates.len(),
            "Checkpoint written to {}",
            self.path.display()
        );
        Ok(SaveOutcome::Written)
    }
}
