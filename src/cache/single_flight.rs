//! Per-key coalescing of cold-key loads.
//!
//! Two concurrent reads on a cold key would both fall through to the store
//! and both backfill the cache. That is idempotent but wasteful on popular
//! keys, so the first caller becomes the leader and everyone else waits for
//! its result.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::{broadcast, Mutex};

/// Coalesces concurrent calls with the same key into a single execution.
///
/// The leader runs the provided future, followers subscribe to its result.
/// `None` results (the load failed) are shared as well, so followers don't
/// pile onto a struggling upstream.
pub(crate) struct SingleFlight<V> {
    inflight: Mutex<HashMap<String, broadcast::Sender<Option<V>>>>,
}

impl<V: Clone + Send + 'static> SingleFlight<V> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `load` for `key`, unless another task is already doing so.
    pub(crate) async fn run<F, Fut>(&self, key: &str, load: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    drop(inflight);

                    let value = load().await;

                    let mut inflight = self.inflight.lock().await;
                    if let Some(tx) = inflight.remove(key) {
                        // Errors just mean there are no followers
                        let _ = tx.send(value.clone());
                    }
                    return value;
                }
            }
        };

        rx.recv().await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::SingleFlight;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_loads_are_coalesced() {
        let flight = Arc::new(SingleFlight::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = flight.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("popular", || async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Some(42u64)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(42));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let flight: SingleFlight<u64> = SingleFlight::new();

        let a = flight.run("a", || async { Some(1) }).await;
        let b = flight.run("b", || async { Some(2) }).await;
        assert_eq!(a, Some(1));
        assert_eq!(b, Some(2));
    }

    #[tokio::test]
    async fn failed_loads_are_shared() {
        let flight: SingleFlight<u64> = SingleFlight::new();
        assert_eq!(flight.run("gone", || async { None }).await, None);
        // A later call may retry
        assert_eq!(flight.run("gone", || async { Some(3) }).await, Some(3));
    }
}
