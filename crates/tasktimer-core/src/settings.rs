//! Live view of the user-tunable timing settings.
//!
//! The watcher owns the current ignore threshold and publishes every change
//! on a `watch` channel. Engines follow it with
//! [`TimingEngine::follow_settings`](crate::TimingEngine::follow_settings).

use std::path::{Path, PathBuf};

use tokio::sync::watch;

use crate::storage::{Config, DEFAULT_IGNORE_THRESHOLD_SECS};

#[derive(Debug)]
pub struct SettingsWatcher {
    tx: watch::Sender<i64>,
    source: Option<PathBuf>,
}

impl SettingsWatcher {
    /// A watcher starting at `threshold` with no backing file.
    pub fn new(threshold: i64) -> Self {
        let (tx, _rx) = watch::channel(threshold.max(0));
        Self { tx, source: None }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ignore_threshold())
    }

    /// A watcher backed by the config file at `path`. Unreadable or
    /// missing configuration yields the default threshold.
    pub fn from_file(path: &Path) -> Self {
        let mut watcher = Self::from_config(&Config::load_from_or_default(path));
        watcher.source = Some(path.to_path_buf());
        watcher
    }

    pub fn threshold(&self) -> i64 {
        *self.tx.borrow()
    }

    /// Publish a new threshold. Negative values clamp to zero. Subscribers
    /// are only woken when the value actually changes.
    pub fn set_threshold(&self, threshold: i64) {
        let threshold = threshold.max(0);
        let changed = self.tx.send_if_modified(|current| {
            if *current == threshold {
                return false;
            }
            *current = threshold;
            true
        });
        if changed {
            tracing::debug!(threshold, "ignore threshold changed");
        }
    }

    /// Re-read the backing file and publish its threshold.
    /// Without a backing file this is a no-op.
    pub fn reload(&self) {
        if let Some(path) = &self.source {
            self.set_threshold(Config::load_from_or_default(path).ignore_threshold());
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.tx.subscribe()
    }
}

impl Default for SettingsWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_THRESHOLD_SECS)
    }
}
