//! Configuration file watcher and reload coalescing.
//!
//! # Data Flow
//! ```text
//! notify event on the config file ─┐
//! SIGHUP ──────────────────────────┼→ ReloadTrigger::request()
//!                                  │
//! run_reload_loop: wait for trigger → ConfigStore::reload()
//! ```
//!
//! Requests arriving while a reload runs collapse into a single follow-up
//! reload: `Notify` keeps at most one stored permit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, Notify};

use crate::config::store::ConfigStore;

/// Coalescing reload request flag.
#[derive(Debug, Default)]
pub struct ReloadTrigger {
    notify: Notify,
}

impl ReloadTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a reload. Safe to call from any thread.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next request.
    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    trigger: Arc<ReloadTrigger>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, trigger: Arc<ReloadTrigger>) -> Self {
        Self {
            path: path.to_path_buf(),
            trigger,
        }
    }

    /// Start watching. The watch stops when the returned watcher is dropped.
    ///
    /// The parent directory is watched so editors that replace the file
    /// (write to a temp file, then rename) are still observed.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let trigger = Arc::clone(&self.trigger);
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.kind.is_modify() || event.kind.is_create();
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant && ours {
                        tracing::info!("Config file change detected, scheduling reload");
                        trigger.request();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Serve reload requests until shutdown.
pub async fn run_reload_loop(
    store: Arc<ConfigStore>,
    trigger: Arc<ReloadTrigger>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = trigger.requested() => {
                // Outcome and failures are logged by the store.
                let _ = store.reload().await;
            }
            _ = shutdown.recv() => {
                tracing::info!("Reload loop received shutdown signal, exiting");
                break;
            }
        }
    }
}
