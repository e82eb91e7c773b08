//! Keyed request coalescing: concurrent callers sharing the same key await
//! one in-flight computation instead of each starting their own.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;

/// A process-wide, keyed in-flight-call registry.
///
/// The first caller for a key builds and runs the future; concurrent callers
/// for the same key are hung off the same [`Shared`] future and receive its
/// cloned result rather than recomputing it. Once the future resolves the key
/// is evicted, so a later call starts a fresh round.
pub struct Singleflight<T: Clone + Send + Sync + 'static> {
    inflight: DashMap<String, Shared<BoxFuture<'static, T>>>,
}

impl<T: Clone + Send + Sync + 'static> Singleflight<T> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Runs `make_future` for `key`, or shares an already in-flight call.
    ///
    /// `make_future` is only invoked when this caller is the one that starts
    /// the round; other concurrent callers never construct theirs.
    pub async fn run<F, Fut>(&self, key: &str, make_future: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let shared: Shared<BoxFuture<'static, T>> = make_future().boxed().shared();
                entry.insert(shared.clone());
                shared
            }
        };

        let result = shared.await;
        self.inflight.remove(key);
        result
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let singleflight: Arc<Singleflight<u32>> = Arc::new(Singleflight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let singleflight = singleflight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                singleflight
                    .run("instance-1", || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            42
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_later_call_starts_a_fresh_round() {
        let singleflight: Singleflight<u32> = Singleflight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            singleflight
                .run("instance-1", || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        1
                    }
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
