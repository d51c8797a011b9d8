//! Best-effort persistence queue.
//!
//! The hub hands records over without waiting; a single worker writes them
//! in order on the blocking pool. Failures are logged and never reach the
//! client path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vicinity_store::{Record, Store};

#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<Record>,
    dropped: Arc<AtomicU64>,
}

impl PersistQueue {
    /// Start the writer. On cancellation it drains what is already queued.
    pub fn spawn(store: Arc<dyn Store>, capacity: usize, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(write_loop(store, rx, cancel));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    pub fn submit(&self, record: Record) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = record.kind(), "persist queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                debug!(kind = record.kind(), "persist queue closed");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn write_loop(store: Arc<dyn Store>, mut rx: mpsc::Receiver<Record>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => write_one(&store, record).await,
                None => return,
            },
        }
    }

    rx.close();
    while let Some(record) = rx.recv().await {
        write_one(&store, record).await;
    }
    debug!("persist worker stopped");
}

async fn write_one(store: &Arc<dyn Store>, record: Record) {
    let kind = record.kind();
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.write(&record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(kind, error = %e, "persist write failed"),
        Err(e) => warn!(kind, error = %e, "persist task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use vicinity_core::VehicleId;
    use vicinity_store::StoreError;

    #[derive(Default)]
    struct Recorder {
        ids: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Store for Recorder {
        fn write(&self, record: &Record) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Io("disk full".into()));
            }
            if let Record::VehicleOffline { vehicle_id, .. } = record {
                self.ids.lock().unwrap().push(vehicle_id.to_string());
            }
            Ok(())
        }
    }

    fn offline(id: &str) -> Record {
        Record::VehicleOffline {
            vehicle_id: VehicleId::from_raw(id),
            reason: "disconnect".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_in_order_and_drains_on_cancel() {
        let store = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let (queue, handle) = PersistQueue::spawn(store.clone(), 16, cancel.clone());

        queue.submit(offline("a"));
        queue.submit(offline("b"));
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*store.ids.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_worker() {
        let store = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let (queue, handle) = PersistQueue::spawn(store, 4, cancel.clone());
        queue.submit(offline("a"));
        queue.submit(offline("b"));
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn full_queue_counts_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = PersistQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        queue.submit(offline("a"));
        queue.submit(offline("b"));
        assert_eq!(queue.dropped(), 1);
    }
}
