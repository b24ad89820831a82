//! Structured proxy log with backpressure
//!
//! One JSON object per line. Writes go through a bounded channel: when more
//! than 100 entries are pending the new entry is dropped and a counter
//! incremented, with one warning per 100 drops so a flooded proxy never
//! blocks on disk I/O.

use agentchaos_core::ChaosError;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum pending log writes before entries are dropped.
const MAX_PENDING: usize = 100;

/// Bounded, non-blocking writer for the structured proxy log.
pub struct StructuredLogWriter {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    dropped: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StructuredLogWriter {
    /// Open the log file (creating parent directories) and start the writer
    /// task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ChaosError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!("Structured JSON logging enabled: {}", path.display());

        let (sender, mut receiver) = mpsc::channel::<String>(MAX_PENDING);
        let worker = tokio::spawn(async move {
            while let Some(line) = receiver.recv().await {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!("Error writing structured log: {e}");
                    continue;
                }
                // Flush per entry for real-time reporting
                if let Err(e) = file.flush().await {
                    error!("Error flushing structured log: {e}");
                }
            }
        });

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue one log line (newline appended). Drops the entry when the
    /// channel is full.
    pub fn write_line(&self, mut line: String) {
        line.push('\n');
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            debug!("Structured log writer is shut down; entry dropped");
            return;
        };
        match sender.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    warn!(
                        "Log queue full ({MAX_PENDING} pending), dropping logs (total dropped: {dropped})"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Structured log writer is shut down; entry dropped");
            }
        }
    }

    /// Total entries dropped under backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain pending writes and stop the worker, within a bounded window.
    pub async fn shutdown(&self) {
        // Dropping the sender closes the channel and lets the worker drain.
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
                let _ = worker.await;
            })
            .await;
        }
        let dropped = self.dropped_count();
        if dropped > 0 {
            info!("Log writer shutdown. Total logs dropped due to backpressure: {dropped}");
        } else {
            info!("Log writer shutdown");
        }
    }

    /// Writer whose worker never drains, for exercising the backpressure
    /// bound in tests.
    #[cfg(test)]
    fn stalled() -> Self {
        let (sender, receiver) = mpsc::channel::<String>(MAX_PENDING);
        let worker = tokio::spawn(async move {
            let _receiver = receiver;
            std::future::pending::<()>().await;
        });
        Self {
            sender: Mutex::new(Some(sender)),
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        let writer = StructuredLogWriter::open(&path).await.unwrap();

        writer.write_line(r#"{"a":1}"#.to_owned());
        writer.write_line(r#"{"b":2}"#.to_owned());
        writer.shutdown().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[tokio::test]
    async fn test_backpressure_bound_is_100() {
        let writer = StructuredLogWriter::stalled();

        // The channel holds exactly MAX_PENDING entries; everything beyond
        // is dropped.
        for i in 0..(MAX_PENDING + 42) {
            writer.write_line(format!(r#"{{"n":{i}}}"#));
        }
        assert_eq!(writer.dropped_count(), 42);
    }

    #[tokio::test]
    async fn test_writes_after_shutdown_are_dropped_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StructuredLogWriter::open(dir.path().join("proxy.log")).await.unwrap();
        writer.shutdown().await;
        writer.write_line(r#"{"late":true}"#.to_owned());
    }

    #[tokio::test]
    async fn test_append_mode_preserves_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        std::fs::write(&path, "{\"old\":true}\n").unwrap();

        let writer = StructuredLogWriter::open(&path).await.unwrap();
        writer.write_line(r#"{"new":true}"#.to_owned());
        writer.shutdown().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("{\"old\":true}\n"));
        assert!(contents.contains("{\"new\":true}"));
    }
}
