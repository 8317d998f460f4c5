//! Post-checkpoint notification hook
//!
//! The configured command runs in the background after a checkpoint. At most one
//! run is active at a time and runs are spaced by the configured minimum
//! interval. Failures are logged and never affect the crawl.

use crate::config::SyncConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Environment variable carrying the canonical state path
pub const STATE_PATH_ENV: &str = "GLEANER_STATE_PATH";

/// Environment variable carrying the configured sync token
pub const SYNC_TOKEN_ENV: &str = "GLEANER_SYNC_TOKEN";

/// Something notified after every successful checkpoint
pub trait CheckpointHook: Send + Sync {
    fn after_checkpoint(&self, state_path: &Path);
}

pub struct CommandHook {
    argv: Vec<String>,
    token: Option<String>,
    min_interval: Duration,
    running: Arc<AtomicBool>,
    last_started: Mutex<Option<Instant>>,
}

impl CommandHook {
    pub fn new(argv: Vec<String>, token: Option<String>, min_interval: Duration) -> Self {
        Self {
            argv,
            token,
            min_interval,
            running: Arc::new(AtomicBool::new(false)),
            last_started: Mutex::new(None),
        }
    }

    /// Builds the hook, or None when no command is configured
    pub fn from_config(config: &SyncConfig) -> Option<Self> {
        if config.command.is_empty() {
            return None;
        }
        Some(Self::new(
            config.command.clone(),
            config.token.clone(),
            Duration::from_secs(config.min_interval_secs),
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claims the single run slot if the interval allows it
    fn try_start(&self, now: Instant) -> bool {
        let mut last = self
            .last_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            if now.duration_since(previous) < self.min_interval {
                return false;
            }
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *last = Some(now);
        true
    }
}

impl CheckpointHook for CommandHook {
    fn after_checkpoint(&self, state_path: &Path) {
        let Some((program, args)) = self.argv.split_first() else {
            return;
        };

        if !self.try_start(Instant::now()) {
            debug!("Sync skipped (running or too soon)");
            return;
        }

        let mut command = Command::new(program);
        command.args(args).env(STATE_PATH_ENV, state_path);
        if let Some(token) = &self.token {
            command.env(SYNC_TOKEN_ENV, token);
        }

        let running = self.running.clone();
        let program = program.clone();
        tokio::spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => info!("Sync command finished"),
                Ok(status) => warn!("Sync command {} exited with {}", program, status),
                Err(e) => warn!("Sync command {} failed to start: {}", program, e),
            }
            running.store(false, Ordering::Release);
        });
    }
}
