use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};
use wiretap_events::panic_message;

pub type SyncTask<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Hands work to the tick thread or to the blocking worker pool.
///
/// Subscribers run on transport threads and must not block them; anything slow goes
/// through `run_async`, and anything that touches tick-owned state `C` goes through
/// `run_sync`. There is no ordering between the two queues.
pub struct TaskScheduler<C> {
    sync_tx: mpsc::UnboundedSender<SyncTask<C>>,
    runtime: Handle,
}

impl<C> Clone for TaskScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            sync_tx: self.sync_tx.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<C: 'static> TaskScheduler<C> {
    /// Create a scheduler and the queue the tick loop drains.
    pub fn new(runtime: Handle) -> (Self, SyncQueue<C>) {
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        (Self { sync_tx, runtime }, SyncQueue { sync_rx })
    }

    /// Queue a task for the next tick boundary. Returns false if the tick loop is gone.
    pub fn run_sync<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sync_tx.send(Box::new(task)).is_ok()
    }

    /// Run a task on the blocking worker pool. Panics are logged, not propagated.
    pub fn run_async<F>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.runtime.spawn_blocking(move || {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                error!("Async task panicked: {}", panic_message(panic.as_ref()));
            }
        })
    }
}

/// The tick thread's end of [`TaskScheduler::run_sync`].
pub struct SyncQueue<C> {
    sync_rx: mpsc::UnboundedReceiver<SyncTask<C>>,
}

impl<C> SyncQueue<C> {
    /// Run every task queued before this call, in submission order. Tasks queued while
    /// the batch runs wait for the next call. Returns how many ran.
    pub fn run_pending(&mut self, context: &mut C) -> usize {
        let mut batch = Vec::new();
        while let Ok(task) = self.sync_rx.try_recv() {
            batch.push(task);
        }

        let count = batch.len();
        for task in batch {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task(context))) {
                error!("Sync task panicked: {}", panic_message(panic.as_ref()));
            }
        }
        if count > 0 {
            trace!("Ran {} sync task(s)", count);
        }
        count
    }
}
