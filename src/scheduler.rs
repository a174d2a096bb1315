//! Generation scheduler
//!
//! Deduplicates concurrent identical requests into one in-flight generation
//! per cache key and admits only a bounded number of generations at once.
//! The first caller for a key spawns the work as a detached task gated on a
//! fair semaphore (FIFO admission); every later caller joins the pending
//! entry and awaits the same broadcast result. Because the task is
//! detached, a caller that disconnects abandons only its own wait: the
//! generation still completes and the cache still benefits.

use crate::identity::CacheKey;
use crate::placeholder::placeholder;
use crate::Preview;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::debug;

pub struct Scheduler {
    slots: Arc<Semaphore>,
    pending: Arc<Mutex<HashMap<CacheKey, broadcast::Sender<Preview>>>>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of generations currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run `work` for `key`, or join an already-pending generation for the
    /// same key. All callers observe the identical result; success and
    /// failure are both terminal for the pending entry.
    pub async fn run<F>(&self, key: CacheKey, work: F) -> Preview
    where
        F: Future<Output = Preview> + Send + 'static,
    {
        let mut rx = {
            let mut pending = self.pending.lock();
            if let Some(tx) = pending.get(&key) {
                debug!(key = key.as_str(), "joining in-flight generation");
                tx.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                pending.insert(key.clone(), tx);

                let slots = Arc::clone(&self.slots);
                let table = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    // Fair acquisition keeps queued generations FIFO.
                    let _permit = slots
                        .acquire_owned()
                        .await
                        .expect("generation semaphore never closes");
                    let result = work.await;

                    // Remove the entry before broadcasting, under the same
                    // lock joiners subscribe through, so a subscriber either
                    // sees the entry and gets the broadcast or misses it and
                    // starts a fresh generation.
                    let tx = table.lock().remove(&key);
                    if let Some(tx) = tx {
                        let _ = tx.send(result);
                    }
                });
                rx
            }
        };

        // The sender can only drop without sending if the generation task
        // panicked; honor the always-displayable contract regardless.
        rx.recv().await.unwrap_or_else(|_| placeholder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::resolve(name, 64, 64).unwrap()
    }

    fn preview(data: &[u8]) -> Preview {
        Preview {
            bytes: data.to_vec(),
            content_type: "image/jpeg",
            token: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_requests_generate_once() {
        let scheduler = Arc::new(Scheduler::new(3));
        let generations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let scheduler = Arc::clone(&scheduler);
            let generations = Arc::clone(&generations);
            handles.push(tokio::spawn(async move {
                scheduler
                    .run(key("same"), async move {
                        generations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        preview(b"result")
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(generations.load(Ordering::SeqCst), 1);
        for result in &results {
            assert_eq!(result.bytes, b"result");
        }
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_running_generations_never_exceed_ceiling() {
        let scheduler = Arc::new(Scheduler::new(3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..50 {
            let scheduler = Arc::clone(&scheduler);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                scheduler
                    .run(key(&format!("distinct-{i}")), async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        preview(b"x")
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_result_is_terminal() {
        let scheduler = Scheduler::new(3);

        let first = scheduler.run(key("bad"), async { placeholder() }).await;
        assert!(first.token.is_none());
        // The pending entry is gone; nothing retries within the wave.
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_caller_does_not_cancel_generation() {
        let scheduler = Arc::new(Scheduler::new(1));
        let completed = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                scheduler
                    .run(key("durable"), async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        completed.fetch_add(1, Ordering::SeqCst);
                        preview(b"done")
                    })
                    .await
            })
        };

        // Abort the only caller while the generation is still running.
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        // The detached task still completes and clears the pending table.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let scheduler = Scheduler::new(3);

        let a = scheduler.run(key("a"), async { preview(b"a") }).await;
        let b = scheduler.run(key("b"), async { preview(b"b") }).await;
        assert_eq!(a.bytes, b"a");
        assert_eq!(b.bytes, b"b");
    }
}
