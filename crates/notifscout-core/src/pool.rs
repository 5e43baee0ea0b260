// Bounded worker pool shared by the filter engine and the scorer.
//
// Workers run on tokio's blocking pool and claim slots from a shared cursor.
// Matches go through one bounded channel to a single draining consumer; the
// channel closes on its own once the last worker drops its sender. On deadline
// the consumer flips the cancel flag and closes the channel, so a worker is at
// most one item away from noticing.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

pub(crate) struct PoolRun<R> {
    pub results: Vec<R>,
    pub processed: usize,
    pub timed_out: bool,
}

/// Run `work` over slots `0..len` on up to `workers` threads
///
/// Result order follows completion, not slot order.
pub(crate) async fn run<R, F>(
    len: usize,
    workers: usize,
    channel_capacity: usize,
    timeout: Duration,
    work: F,
) -> PoolRun<R>
where
    R: Send + 'static,
    F: Fn(usize) -> Option<R> + Send + Sync + 'static,
{
    let deadline = Instant::now() + timeout;
    let work = Arc::new(work);
    let cursor = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicBool::new(false));
    let (sender, mut receiver) = mpsc::channel::<R>(channel_capacity.max(1));

    let workers = workers.clamp(1, len.max(1));
    debug!("Fanning {} items out to {} workers", len, workers);

    for _ in 0..workers {
        let work = Arc::clone(&work);
        let cursor = Arc::clone(&cursor);
        let processed = Arc::clone(&processed);
        let cancelled = Arc::clone(&cancelled);
        let sender = sender.clone();

        tokio::task::spawn_blocking(move || {
            while !cancelled.load(Ordering::Relaxed) {
                let slot = cursor.fetch_add(1, Ordering::Relaxed);
                if slot >= len {
                    break;
                }

                let result = work(slot);
                processed.fetch_add(1, Ordering::Relaxed);

                if let Some(result) = result {
                    // Err means the consumer hung up (deadline), nothing left to do
                    if sender.blocking_send(result).is_err() {
                        break;
                    }
                }
            }
        });
    }
    drop(sender);

    let mut results = Vec::new();
    loop {
        match timeout_at(deadline, receiver.recv()).await {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {
                return PoolRun {
                    results,
                    processed: processed.load(Ordering::Relaxed),
                    timed_out: false,
                };
            }
            Err(_) => {
                cancelled.store(true, Ordering::Relaxed);
                receiver.close();
                // Keep whatever was already in flight
                while let Ok(result) = receiver.try_recv() {
                    results.push(result);
                }
                return PoolRun {
                    results,
                    processed: processed.load(Ordering::Relaxed),
                    timed_out: true,
                };
            }
        }
    }
}

/// Logical CPU count, the default fan-out width
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_slot_is_visited_once() {
        let outcome = run(500, 4, 16, Duration::from_secs(5), Some).await;
        assert!(!outcome.timed_out);
        assert_eq!(outcome.processed, 500);

        let mut slots = outcome.results;
        slots.sort_unstable();
        assert_eq!(slots, (0..500).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_none_results_are_dropped() {
        let outcome = run(100, 3, 8, Duration::from_secs(5), |i| (i % 2 == 0).then_some(i)).await;
        assert_eq!(outcome.results.len(), 50);
        assert_eq!(outcome.processed, 100);
    }

    #[tokio::test]
    async fn test_deadline_stops_workers() {
        let outcome = run(1000, 2, 8, Duration::from_millis(10), |i| {
            std::thread::sleep(Duration::from_millis(5));
            Some(i)
        })
        .await;

        assert!(outcome.timed_out);
        assert!(outcome.processed < 1000);
    }
}
