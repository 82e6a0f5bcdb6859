//! Append-only JSONL result ledger.
//!
//! A single writer task owns the file. Callers send serialized lines over a
//! channel and wait for an acknowledgment that the line is on disk. A failed
//! write is rolled back by truncating to the pre-write length and retried
//! with exponential backoff. When retries run out the writer is poisoned and
//! every later append fails.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::load::load_ledger;
use super::record::{RunKey, ScoredResult};
use crate::error::LedgerError;
use crate::metrics::MetricsCollector;

const CHANNEL_CAPACITY: usize = 64;

/// Storage the writer task appends to.
#[async_trait]
pub(crate) trait RecordSink: Send + 'static {
    async fn len(&mut self) -> io::Result<u64>;

    /// Write one full line and make it durable.
    async fn write_record(&mut self, line: &[u8]) -> io::Result<()>;

    async fn truncate(&mut self, len: u64) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;
}

struct FileSink {
    file: File,
}

#[async_trait]
impl RecordSink for FileSink {
    async fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    async fn write_record(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line).await?;
        // tokio defers the write to a blocking task; flush surfaces its error.
        self.file.flush().await?;
        self.file.sync_data().await
    }

    async fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len).await?;
        self.file.sync_data().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

enum Command {
    Append {
        line: Vec<u8>,
        ack: oneshot::Sender<Result<(), LedgerError>>,
    },
    Close {
        ack: oneshot::Sender<Result<(), LedgerError>>,
    },
}

/// Retry policy for one ledger write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

struct WriterTask<S> {
    sink: S,
    policy: RetryPolicy,
    poisoned: Option<String>,
    metrics: MetricsCollector,
}

impl<S: RecordSink> WriterTask<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append { line, ack } => {
                    let result = self.append(&line).await;
                    let _ = ack.send(result);
                }
                Command::Close { ack } => {
                    let result = self.sink.flush().await.map_err(LedgerError::from);
                    let _ = ack.send(result);
                    break;
                }
            }
        }
    }

    async fn append(&mut self, line: &[u8]) -> Result<(), LedgerError> {
        if let Some(message) = &self.poisoned {
            return Err(LedgerError::WriteFailed {
                attempts: self.policy.attempts,
                message: message.clone(),
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.attempts {
            let before = match self.sink.len().await {
                Ok(len) => len,
                Err(e) => {
                    last_error = e.to_string();
                    backoff(self.policy, attempt).await;
                    continue;
                }
            };
            match self.sink.write_record(line).await {
                Ok(()) => {
                    self.metrics.record_ledger_write("ok");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %e, "Ledger write failed; rolling back");
                    self.metrics.record_ledger_write("retry");
                    if let Err(e) = self.sink.truncate(before).await {
                        tracing::warn!(error = %e, "Ledger rollback failed");
                    }
                    backoff(self.policy, attempt).await;
                }
            }
        }

        tracing::error!(
            attempts = self.policy.attempts,
            error = %last_error,
            "Ledger write failed permanently"
        );
        self.metrics.record_ledger_write("failed");
        self.poisoned = Some(last_error.clone());
        Err(LedgerError::WriteFailed {
            attempts: self.policy.attempts,
            message: last_error,
        })
    }
}

async fn backoff(policy: RetryPolicy, attempt: u32) {
    if attempt < policy.attempts {
        let factor = 2u32.saturating_pow(attempt - 1);
        tokio::time::sleep(policy.backoff.saturating_mul(factor)).await;
    }
}

/// Handle to an open ledger. Share it behind an `Arc`.
pub struct ResultLedger {
    path: PathBuf,
    tx: mpsc::Sender<Command>,
    completed: Mutex<HashSet<RunKey>>,
}

impl ResultLedger {
    /// Open (or create) the ledger at `path`.
    ///
    /// Existing records seed [`completed_keys`](Self::completed_keys). A torn
    /// final line gets a newline appended so new records start on a fresh
    /// line.
    pub async fn open(path: &Path, attempts: u32, backoff: Duration) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let loaded = load_ledger(path)?;
        if loaded.skipped_lines > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped = loaded.skipped_lines,
                truncated_tail = loaded.truncated_tail,
                "Ledger contains unreadable lines"
            );
        }
        let completed: HashSet<RunKey> = loaded.records.iter().map(ScoredResult::key).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        if !ends_with_newline(path)? {
            file.write_all(b"\n").await?;
            file.flush().await?;
            file.sync_data().await?;
        }

        tracing::info!(
            path = %path.display(),
            existing = completed.len(),
            "Opened result ledger"
        );

        let policy = RetryPolicy {
            attempts: attempts.max(1),
            backoff,
        };
        Ok(Self::with_sink(path.to_path_buf(), FileSink { file }, policy, completed))
    }

    pub(crate) fn with_sink<S: RecordSink>(
        path: PathBuf,
        sink: S,
        policy: RetryPolicy,
        completed: HashSet<RunKey>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = WriterTask {
            sink,
            policy,
            poisoned: None,
            metrics: MetricsCollector::new(),
        };
        tokio::spawn(task.run(rx));
        Self {
            path,
            tx,
            completed: Mutex::new(completed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result and wait until it is durable.
    pub async fn append(&self, result: &ScoredResult) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Append { line, ack })
            .await
            .map_err(|_| LedgerError::Closed)?;
        done.await.map_err(|_| LedgerError::Closed)??;

        if let Ok(mut completed) = self.completed.lock() {
            completed.insert(result.key());
        }
        Ok(())
    }

    /// Keys of every result already recorded.
    pub fn completed_keys(&self) -> HashSet<RunKey> {
        self.completed
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn is_completed(&self, key: &RunKey) -> bool {
        self.completed
            .lock()
            .map(|c| c.contains(key))
            .unwrap_or(false)
    }

    /// Flush and stop the writer. Later appends fail with
    /// [`LedgerError::Closed`].
    pub async fn close(&self) -> Result<(), LedgerError> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Close { ack }).await.is_err() {
            return Ok(());
        }
        done.await.map_err(|_| LedgerError::Closed)?
    }
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::sample_result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");

        let ledger = ResultLedger::open(&path, 3, Duration::from_millis(1))
            .await
            .unwrap();
        ledger.append(&sample_result("todo", "openai/gpt-4o", 72.5)).await.unwrap();
        ledger.append(&sample_result("snake", "openai/gpt-4o", 40.0)).await.unwrap();
        assert!(ledger.is_completed(&("todo".to_string(), "openai/gpt-4o".to_string())));
        ledger.close().await.unwrap();

        let loaded = load_ledger(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].score.total, 72.5);
        assert_eq!(loaded.skipped_lines, 0);

        let reopened = ResultLedger::open(&path, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(reopened.completed_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_torn_tail_isolated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        let good = serde_json::to_string(&sample_result("todo", "m", 50.0)).unwrap();
        std::fs::write(&path, format!("{}\n{{\"run_id\": \"abc", good)).unwrap();

        let ledger = ResultLedger::open(&path, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(ledger.completed_keys().len(), 1);
        ledger.append(&sample_result("snake", "m", 60.0)).await.unwrap();
        ledger.close().await.unwrap();

        let loaded = load_ledger(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped_lines, 1);
        assert!(!loaded.truncated_tail);
    }

    #[tokio::test]
    async fn test_closed_ledger_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let ledger = ResultLedger::open(&dir.path().join("l.jsonl"), 3, Duration::ZERO)
            .await
            .unwrap();
        ledger.close().await.unwrap();
        assert!(matches!(
            ledger.append(&sample_result("a", "m", 1.0)).await,
            Err(LedgerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unwritable_file_is_never_acknowledged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        std::fs::write(&path, "").unwrap();
        let read_only = File::open(&path).await.unwrap();

        let ledger = ResultLedger::with_sink(
            path.clone(),
            FileSink { file: read_only },
            RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(1),
            },
            HashSet::new(),
        );
        let err = ledger.append(&sample_result("todo", "m", 10.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::WriteFailed { attempts: 2, .. }));
        assert!(!ledger.is_completed(&("todo".to_string(), "m".to_string())));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    /// In-memory sink that fails the first `failures` writes after writing
    /// half the line.
    struct FlakySink {
        data: Arc<Mutex<Vec<u8>>>,
        failures: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn len(&mut self) -> io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        async fn write_record(&mut self, line: &[u8]) -> io::Result<()> {
            let mut data = self.data.lock().unwrap();
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                data.extend_from_slice(&line[..line.len() / 2]);
                return Err(io::Error::other("disk hiccup"));
            }
            data.extend_from_slice(line);
            Ok(())
        }

        async fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.lock().unwrap().truncate(len as usize);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn flaky(failures: u32, attempts: u32) -> (ResultLedger, Arc<Mutex<Vec<u8>>>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        let sink = FlakySink {
            data: data.clone(),
            failures: Arc::new(AtomicU32::new(failures)),
        };
        let ledger = ResultLedger::with_sink(
            PathBuf::from("memory"),
            sink,
            RetryPolicy {
                attempts,
                backoff: Duration::from_millis(1),
            },
            HashSet::new(),
        );
        (ledger, data)
    }

    #[tokio::test]
    async fn test_retry_rolls_back_partial_write() {
        let (ledger, data) = flaky(2, 3);
        ledger.append(&sample_result("todo", "m", 10.0)).await.unwrap();

        let content = String::from_utf8(data.lock().unwrap().clone()).unwrap();
        assert_eq!(content.lines().count(), 1);
        let parsed: ScoredResult = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(parsed.case_id, "todo");
    }

    #[tokio::test]
    async fn test_exhausted_retries_poison_writer() {
        let (ledger, data) = flaky(10, 2);
        let err = ledger.append(&sample_result("todo", "m", 10.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::WriteFailed { attempts: 2, .. }));
        assert!(data.lock().unwrap().is_empty());

        // Poisoned: no further attempts even though the sink might recover.
        let err = ledger.append(&sample_result("snake", "m", 10.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::WriteFailed { .. }));
        assert!(ledger.completed_keys().is_empty());
    }
}
