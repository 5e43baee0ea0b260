// Background prefetch queue. The cache only queues keys and counts them;
// deciding what to fetch for a key is the caller's business.
use crate::error::Result;
use crate::metrics::CacheMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Bounded queue drained by one worker thread for the lifetime of the cache
pub struct PrefetchQueue {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<CacheMetrics>,
}

impl PrefetchQueue {
    pub fn spawn(backend: &'static str, capacity: usize, metrics: Arc<CacheMetrics>) -> Result<Self> {
        let (sender, mut receiver) = mpsc::channel::<String>(capacity.max(1));
        let worker_metrics = Arc::clone(&metrics);

        // A plain thread, so the cache works with or without a tokio runtime around it
        let worker = std::thread::Builder::new()
            .name(format!("{}-prefetch", backend))
            .spawn(move || {
                while let Some(key) = receiver.blocking_recv() {
                    trace!("Prefetch processed key: {}", key);
                    worker_metrics.record_prefetch_processed();
                }
                debug!("{} prefetch worker stopped", backend);
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            metrics,
        })
    }

    /// Queue a key without blocking. Returns false when the queue is full or closed.
    pub fn enqueue(&self, key: &str) -> bool {
        self.metrics.record_prefetch();

        let queued = match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(key.to_string()).is_ok(),
            None => false,
        };

        if !queued {
            self.metrics.record_prefetch_dropped();
        }
        queued
    }

    /// Stop accepting keys, let the worker drain what's queued, then join it
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PrefetchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
