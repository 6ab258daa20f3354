use crate::store::{execute, StoreReply, StoreRequest, TerritoryStore};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Runs store requests on a small thread pool so the UI loop never blocks.
///
/// Requests are independent: nothing here orders or cancels them. Replies
/// come back in completion order through [`StoreWorker::drain`].
pub struct StoreWorker {
    pool: ThreadPool,
    store: Arc<dyn TerritoryStore>,
    tx: Sender<StoreReply>,
    rx: Receiver<StoreReply>,
}

impl StoreWorker {
    pub fn new(store: Arc<dyn TerritoryStore>, threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("turf-store-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self { pool, store, tx, rx })
    }

    pub fn submit(&self, request: StoreRequest) {
        trace!(?request, "submitting store request");
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let reply = execute(store.as_ref(), request);
            // Receiver gone means the map was torn down; nothing to tell
            let _ = tx.send(reply);
        });
    }

    /// Replies that have arrived so far, without waiting
    pub fn drain(&self) -> Vec<StoreReply> {
        self.rx.try_iter().collect()
    }

    /// Block for the next reply, up to `timeout`
    pub fn wait(&self, timeout: Duration) -> Option<StoreReply> {
        self.rx.recv_timeout(timeout).ok()
    }
}
