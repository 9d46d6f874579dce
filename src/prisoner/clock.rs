use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

use crate::facade::Stockade;

/// Background worker driving a periodic engine task.
pub struct ClockWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ClockWorker {
    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            if let Err(err) = join_handle.await {
                event!(Level::ERROR, error = %err, "clock worker join failed");
            }
        }
    }
}

impl Drop for ClockWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

#[derive(Clone, Copy)]
enum WorkerTask {
    Tick,
    Autosave,
}

/// Spawns the sentence clock, advancing every running record once per
/// interval. The interval should match
/// [`tick_interval`](crate::StockadeConfig::tick_interval) so the per-tick
/// clamp lines up with the cadence.
pub fn spawn_sentence_clock(stockade: Arc<Mutex<Stockade>>, interval: Duration) -> ClockWorker {
    spawn_periodic(stockade, interval, WorkerTask::Tick)
}

/// Spawns the autosave worker, persisting every jail and live record once
/// per interval.
pub fn spawn_autosave(stockade: Arc<Mutex<Stockade>>, interval: Duration) -> ClockWorker {
    spawn_periodic(stockade, interval, WorkerTask::Autosave)
}

/// Spawns the workers the configuration asks for: always the sentence
/// clock, plus the autosave worker when an autosave interval is set.
pub async fn spawn_workers(stockade: Arc<Mutex<Stockade>>) -> Vec<ClockWorker> {
    let (tick_interval, autosave_interval) = {
        let guard = stockade.lock().await;
        (
            guard.config().tick_interval,
            guard.config().autosave_interval,
        )
    };

    let mut workers = vec![spawn_sentence_clock(stockade.clone(), tick_interval)];
    if let Some(interval) = autosave_interval {
        workers.push(spawn_autosave(stockade, interval));
    }
    workers
}

fn spawn_periodic(
    stockade: Arc<Mutex<Stockade>>,
    interval: Duration,
    task: WorkerTask,
) -> ClockWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    let mut guard = stockade.lock().await;
                    match task {
                        WorkerTask::Tick => guard.tick(),
                        WorkerTask::Autosave => guard.save_all(),
                    }
                }
            }
        }
    });

    ClockWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::config::StockadeConfig;
    use crate::core::Location;
    use crate::events::{ConsumerId, Event, EventKind};
    use crate::facade::Stockade;
    use crate::host::NoopHost;

    #[tokio::test]
    async fn autosave_worker_publishes_data_saved() {
        let dir = TempDir::new().unwrap();
        let config = StockadeConfig::new(dir.path()).autosave_interval(None);
        let mut stockade = Stockade::open(config, Arc::new(NoopHost), Vec::new())
            .await
            .unwrap();
        stockade
            .create_jail("cell", Location::new("world0", 0.0, 64.0, 0.0))
            .unwrap();

        let saves = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = saves.clone();
        stockade.events_mut().subscribe_fn(
            &ConsumerId::new("test"),
            EventKind::DataSaved,
            move |_event: &Event| {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            },
        );

        let stockade = Arc::new(Mutex::new(stockade));
        let worker = spawn_autosave(stockade.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;
        worker.stop().await;

        assert!(saves.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stopped_worker_stops_ticking() {
        let dir = TempDir::new().unwrap();
        let config = StockadeConfig::new(dir.path()).autosave_interval(None);
        let stockade = Stockade::open(config, Arc::new(NoopHost), Vec::new())
            .await
            .unwrap();

        let stockade = Arc::new(Mutex::new(stockade));
        let worker = spawn_sentence_clock(stockade.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.stop().await;

        // the lock is free once the worker is gone
        let guard = stockade.lock().await;
        assert_eq!(guard.prisoner_count(), 0);
    }
}
