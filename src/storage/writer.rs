use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Level, event};

use crate::core::{Error, Result};

/// One durable operation, keyed by the document's final path.
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    /// Serialized bytes snapshotted at enqueue time.
    Save(Vec<u8>),
    Delete,
}

type PendingMap = HashMap<PathBuf, PendingOp>;

/// Single-consumer write queue with per-key coalescing.
///
/// An enqueue replaces the key's pending payload and pushes a marker; when
/// the worker reaches the marker it takes whatever payload is freshest, so a
/// write always reflects the newest enqueued state and superseded payloads
/// are skipped. One worker owns all file I/O, which makes writes for a key
/// strictly FIFO and never concurrent.
pub(crate) struct WriteQueue {
    pending: Arc<StdMutex<PendingMap>>,
    tx: Option<mpsc::UnboundedSender<PathBuf>>,
    worker: Option<JoinHandle<()>>,
    failures: Arc<AtomicU64>,
}

impl WriteQueue {
    pub fn start() -> Self {
        let pending: Arc<StdMutex<PendingMap>> = Arc::new(StdMutex::new(HashMap::new()));
        let failures = Arc::new(AtomicU64::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let pending_for_worker = pending.clone();
        let failures_for_worker = failures.clone();
        let worker = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                let op = lock_pending(&pending_for_worker).remove(&path);
                let Some(op) = op else {
                    // marker superseded by a later enqueue for the same key
                    continue;
                };
                if let Err(err) = Self::execute(&path, op).await {
                    failures_for_worker.fetch_add(1, AtomicOrdering::Relaxed);
                    event!(
                        Level::ERROR,
                        path = %path.display(),
                        error = %err,
                        "durable write failed"
                    );
                }
            }
        });

        Self {
            pending,
            tx: Some(tx),
            worker: Some(worker),
            failures,
        }
    }

    /// Replaces the key's pending payload and queues a marker for it.
    pub fn enqueue(&self, path: PathBuf, op: PendingOp) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(Error::PersistenceFailure(
                "write queue is closed".to_string(),
            ));
        };

        lock_pending(&self.pending).insert(path.clone(), op);
        tx.send(path)
            .map_err(|_| Error::PersistenceFailure("write worker stopped".to_string()))
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(AtomicOrdering::Relaxed)
    }

    /// Stops intake and drains queued writes within the grace period. Past
    /// the deadline the worker is left to finish detached.
    pub async fn close(&mut self, grace: Duration) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(grace, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    event!(Level::ERROR, error = %err, "write worker join failed");
                }
                Err(_) => {
                    event!(
                        Level::WARN,
                        grace_ms = grace.as_millis() as u64,
                        "write queue did not drain within the shutdown grace"
                    );
                }
            }
        }
    }

    /// Executes one durable operation. Saves go to a temp sibling first and
    /// rename over the final path, so a crash mid-write cannot leave a torn
    /// document.
    async fn execute(path: &Path, op: PendingOp) -> Result<()> {
        match op {
            PendingOp::Save(bytes) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                let tmp_path = path.with_extension("tmp");
                fs::write(&tmp_path, bytes).await?;
                fs::rename(&tmp_path, path).await?;
                Ok(())
            }
            PendingOp::Delete => match fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

fn lock_pending(pending: &StdMutex<PendingMap>) -> std::sync::MutexGuard<'_, PendingMap> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
