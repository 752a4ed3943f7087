//! BPM source backed by a JSON file written by an external detector.
//!
//! The file holds a single object: `{"currentBPM": 128}`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, SyncError};
use crate::inbox::{BpmPublisher, BpmSample};
use crate::source::BpmSource;

/// On-disk format of the BPM file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmFileContents {
    #[serde(rename = "currentBPM")]
    pub current_bpm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BpmFileConfig {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl BpmFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(250),
            stop_grace: Duration::from_millis(500),
        }
    }
}

/// Read and validate the BPM file at `path`.
pub async fn read_bpm_file(path: &Path) -> Result<BpmSample> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SyncError::BpmFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let contents: BpmFileContents =
        serde_json::from_str(&content).map_err(|e| SyncError::BpmFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    BpmSample::new(contents.current_bpm).ok_or(SyncError::NonPositiveBpm(contents.current_bpm))
}

#[derive(Debug, Default)]
struct WatcherStats {
    reads: AtomicU64,
    published: AtomicU64,
    errors: AtomicU64,
}

/// Polls the BPM file and publishes every new value it finds. A rewrite of
/// the file (new modification time) is published even when the value is
/// unchanged, since another source may have moved the tempo in between.
pub struct BpmFileWatcher {
    config: BpmFileConfig,
    publisher: BpmPublisher,
    running: bool,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<WatcherStats>,
}

impl BpmFileWatcher {
    pub fn new(config: BpmFileConfig, publisher: BpmPublisher) -> Self {
        Self {
            config,
            publisher,
            running: false,
            shutdown_tx: None,
            handle: None,
            stats: Arc::new(WatcherStats::default()),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(SyncError::AlreadyRunning);
        }
        if self.config.poll_interval.is_zero() {
            return Err(SyncError::ZeroPollInterval);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.handle = Some(tokio::spawn(poll_loop(
            self.config.clone(),
            self.publisher.clone(),
            self.stats.clone(),
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);
        self.running = true;

        log::info!(
            "Watching {:?} for BPM updates every {:?}",
            self.config.path,
            self.config.poll_interval
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.config.stop_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("BPM file watcher task ended abnormally: {}", e),
                Err(_) => {
                    log::warn!("BPM file watcher did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn published_count(&self) -> u64 {
        self.stats.published.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.stats.errors.load(Ordering::Relaxed)
    }
}

impl Drop for BpmFileWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn poll_loop(
    config: BpmFileConfig,
    publisher: BpmPublisher,
    stats: Arc<WatcherStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_bpm: Option<f32> = None;
    let mut last_modified: Option<SystemTime> = None;
    let mut last_error: Option<String> = None;

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }

            _ = ticker.tick() => {}
        }

        // Other metadata errors surface through the read below
        let modified = match tokio::fs::metadata(&config.path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("BPM file {:?} not present yet", config.path);
                continue;
            }
            Err(_) => None,
        };

        stats.reads.fetch_add(1, Ordering::Relaxed);
        match read_bpm_file(&config.path).await {
            Ok(sample) => {
                last_error = None;
                let rewritten = modified.is_some() && modified != last_modified;
                last_modified = modified;
                if last_bpm == Some(sample.bpm()) && !rewritten {
                    continue;
                }
                last_bpm = Some(sample.bpm());
                stats.published.fetch_add(1, Ordering::Relaxed);
                log::debug!("BPM read from {:?}: {}", config.path, sample);
                publisher.publish(sample);
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                let message = e.to_string();
                if last_error.as_deref() != Some(message.as_str()) {
                    log::warn!("{}", message);
                    last_error = Some(message);
                }
            }
        }
    }
}

#[async_trait]
impl BpmSource for BpmFileWatcher {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn start(&mut self) -> Result<()> {
        BpmFileWatcher::start(self)
    }

    async fn stop(&mut self) {
        BpmFileWatcher::stop(self).await
    }

    fn status(&self) -> HashMap<String, String> {
        let mut status = HashMap::new();
        status.insert(
            "state".to_string(),
            if self.running { "watching" } else { "idle" }.to_string(),
        );
        status.insert("path".to_string(), self.config.path.display().to_string());
        status.insert(
            "reads".to_string(),
            self.stats.reads.load(Ordering::Relaxed).to_string(),
        );
        status.insert("published".to_string(), self.published_count().to_string());
        status.insert("errors".to_string(), self.error_count().to_string());
        status
    }
}
