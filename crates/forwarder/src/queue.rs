//! The Forwarder's queue front-end (spec §5): a bounded channel sized by
//! `forwarder_queue_capacity`, read by a single dispatch task that spawns
//! one [`Pipeline::run`] task per record. Spawning per-record rather than
//! running a small fixed worker pool inline keeps a slow target from
//! blocking dispatch of the next record — the dispatch loop itself never
//! awaits anything slower than a channel receive.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::ForwardingSink;
use store::model::MessageRecord;
use tokio::sync::{mpsc, Notify};

use crate::pipeline::Pipeline;

struct QueueItem {
    record: MessageRecord,
    raw_message: Vec<u8>,
}

/// Implements [`ForwardingSink`] for the SMTP Receiver; owns the worker
/// side that drains the channel into the pipeline.
pub struct ForwarderQueue {
    tx: mpsc::Sender<QueueItem>,
}

impl ForwarderQueue {
    /// Spawns the dispatch task and returns the sink handle. `capacity`
    /// should come from `Config::forwarder_queue_capacity`.
    pub fn spawn(pipeline: Arc<Pipeline>, capacity: usize) -> (Arc<Self>, ForwarderHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let active = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(Notify::new());

        let dispatch_active = Arc::clone(&active);
        let dispatch_shutdown = Arc::clone(&shutdown);
        tokio::spawn(Self::dispatch(rx, pipeline, dispatch_active, dispatch_shutdown));

        (Arc::new(Self { tx }), ForwarderHandle { active, shutdown })
    }

    async fn dispatch(mut rx: mpsc::Receiver<QueueItem>, pipeline: Arc<Pipeline>, active: Arc<AtomicUsize>, shutdown: Arc<Notify>) {
        while let Some(item) = rx.recv().await {
            let pipeline = Arc::clone(&pipeline);
            let active = Arc::clone(&active);
            active.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                pipeline.run(item.record, item.raw_message).await;
                if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                    shutdown.notify_waiters();
                }
            });
        }
    }
}

#[async_trait::async_trait]
impl ForwardingSink for ForwarderQueue {
    fn has_capacity(&self) -> bool {
        self.tx.capacity() > 0
    }

    async fn submit_for_forwarding(&self, record: MessageRecord, raw_message: Vec<u8>) {
        if self.tx.send(QueueItem { record, raw_message }).await.is_err() {
            trc::event!(trc::Event::DeliveryFailed, "detail" => "forwarder queue dispatcher has shut down".to_string());
        }
    }
}

/// Held by the main binary to drain in-flight forwarding tasks on shutdown
/// (spec §5: "in-flight Forwarder tasks run to completion up to their own
/// deadline").
pub struct ForwarderHandle {
    active: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

impl ForwarderHandle {
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every in-flight task completes, or `deadline` elapses.
    pub async fn drain(&self, deadline: std::time::Duration) {
        if self.active_count() == 0 {
            return;
        }
        let _ = tokio::time::timeout(deadline, self.shutdown.notified()).await;
    }
}
