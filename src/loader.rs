//! Request-scoped batching key loader
//!
//! A [`BatchLoader`] coalesces the key lookups issued during one burst of
//! resolver execution into a single batched fetch, solving the N+1 query
//! problem when a resolver graph fans out. Within one unit of work it also
//! caches every resolved outcome, so repeated lookups of the same key never
//! touch the data layer twice.
//!
//! One loader instance belongs to exactly one unit of work (one incoming API
//! request). Construct fresh loaders per request and call
//! [`retire`](BatchLoader::retire) when the request completes; sharing an
//! instance across requests would leak cached results between unrelated
//! callers, so a retired loader fails fast instead.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::{oneshot, Mutex};
use tokio::task::yield_now;
use tracing::{debug, trace};

use crate::error::{LoadError, LoadResult};
use crate::fetch::BatchFetch;

/// Outcome cached per key: the resolved value, not-found, or the batch error.
type Outcome<V, E> = Result<Option<V>, LoadError<E>>;

/// A batching, deduplicating, unit-of-work-scoped key loader.
///
/// Cloning is cheap and shares the same window and cache; clones are how the
/// loader is threaded through the resolvers of one unit of work.
pub struct BatchLoader<K, F>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    F: BatchFetch<K>,
{
    shared: Arc<Shared<K, F>>,
}

impl<K, F> Clone for BatchLoader<K, F>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    F: BatchFetch<K>,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<K, F>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    F: BatchFetch<K>,
{
    fetcher: F,
    state: Mutex<State<K, F::Value, F::Error>>,
}

struct State<K, V, E> {
    cache: HashMap<K, Outcome<V, E>>,
    window: Option<Window<K, V, E>>,
    retired: bool,
}

/// The open accumulation window: distinct keys in first-registration order,
/// and the parked waiters per key.
struct Window<K, V, E> {
    keys: Vec<K>,
    waiters: HashMap<K, Vec<oneshot::Sender<Outcome<V, E>>>>,
}

impl<K, F> BatchLoader<K, F>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    F: BatchFetch<K>,
{
    /// Create a loader for one unit of work.
    ///
    /// Must be used within a tokio runtime: dispatching a window spawns a
    /// short-lived task.
    pub fn new(fetcher: F) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                state: Mutex::new(State {
                    cache: HashMap::new(),
                    window: None,
                    retired: false,
                }),
            }),
        }
    }

    /// Load one key, batching with every other load issued before the
    /// current scheduler turn ends.
    ///
    /// Returns `Ok(None)` when the key matched nothing and the fetcher keeps
    /// the default [`missing`](BatchFetch::missing) policy (single-entity
    /// lookups); collection fetchers resolve absent keys to an empty
    /// collection instead. A cached outcome is returned immediately without
    /// scheduling any fetch.
    pub async fn load(&self, key: K) -> LoadResult<Option<F::Value>, F::Error> {
        let rx = {
            let mut state = self.shared.state.lock().await;
            if state.retired {
                return Err(LoadError::Retired);
            }
            if let Some(outcome) = state.cache.get(&key) {
                trace!("cache hit, returning resolved outcome");
                return outcome.clone();
            }

            let (tx, rx) = oneshot::channel();
            match state.window.as_mut() {
                Some(window) => match window.waiters.entry(key.clone()) {
                    // Key already enqueued this window: share its outcome.
                    Entry::Occupied(mut occupied) => occupied.get_mut().push(tx),
                    Entry::Vacant(vacant) => {
                        vacant.insert(vec![tx]);
                        window.keys.push(key);
                    }
                },
                None => {
                    // First key after the previous dispatch opens a new
                    // window and schedules its dispatcher. The dispatcher
                    // yields once so the rest of the current resolver burst
                    // can enqueue keys before the window closes.
                    let mut waiters = HashMap::new();
                    waiters.insert(key.clone(), vec![tx]);
                    state.window = Some(Window {
                        keys: vec![key],
                        waiters,
                    });
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        yield_now().await;
                        shared.dispatch().await;
                    });
                }
            }
            rx
        };

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(LoadError::WindowDropped),
        }
    }

    /// Load several keys at once.
    ///
    /// The loads run concurrently so all keys land in the same batch window.
    /// Results come back in input order; duplicates each receive the shared
    /// outcome. The first error wins, which for a failed batch is the same
    /// error every key would report.
    pub async fn load_many<I>(&self, keys: I) -> LoadResult<Vec<Option<F::Value>>, F::Error>
    where
        I: IntoIterator<Item = K>,
    {
        try_join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Seed the cache with an already-known value.
    ///
    /// A later `load` of the key returns the primed value without fetching.
    /// Never overwrites an outcome that is already cached.
    pub async fn prime(&self, key: K, value: F::Value) -> LoadResult<(), F::Error> {
        let mut state = self.shared.state.lock().await;
        if state.retired {
            return Err(LoadError::Retired);
        }
        state.cache.entry(key).or_insert(Ok(Some(value)));
        Ok(())
    }

    /// Tear the loader down at the end of its unit of work.
    ///
    /// Discards the cache, fails every parked waiter of an open window with
    /// [`LoadError::Retired`], and makes all subsequent calls fail fast. A
    /// fetch already in flight has its result discarded rather than cached.
    pub async fn retire(&self) {
        let mut state = self.shared.state.lock().await;
        if state.retired {
            return;
        }
        state.retired = true;
        state.cache.clear();
        if let Some(window) = state.window.take() {
            debug!(keys = window.keys.len(), "retiring loader with an open window");
            for senders in window.waiters.into_values() {
                for tx in senders {
                    let _ = tx.send(Err(LoadError::Retired));
                }
            }
        }
    }
}

impl<K, F> Shared<K, F>
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
    F: BatchFetch<K>,
{
    /// Close the current window, run the batch fetch once, and distribute
    /// the per-key outcomes to every waiter.
    async fn dispatch(self: Arc<Self>) {
        let window = {
            let mut state = self.state.lock().await;
            match state.window.take() {
                Some(window) => window,
                // Retirement already drained the window.
                None => return,
            }
        };

        // If every waiter has gone away the unit of work no longer cares
        // about this batch; skip the fetch entirely.
        let any_live = window.waiters.values().flatten().any(|tx| !tx.is_closed());
        if !any_live {
            debug!(
                keys = window.keys.len(),
                "all waiters dropped before dispatch, skipping fetch"
            );
            return;
        }

        debug!(keys = window.keys.len(), "dispatching batch fetch");
        let fetched = self.fetcher.fetch_many(&window.keys).await;

        let mut outcomes: HashMap<K, Outcome<F::Value, F::Error>> =
            HashMap::with_capacity(window.keys.len());
        match fetched {
            Ok(mut values) => {
                for key in &window.keys {
                    let value = values.remove(key).or_else(|| self.fetcher.missing(key));
                    outcomes.insert(key.clone(), Ok(value));
                }
            }
            Err(err) => {
                // One failure fails the whole batch uniformly.
                for key in &window.keys {
                    outcomes.insert(key.clone(), Err(LoadError::Fetch(err.clone())));
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            if state.retired {
                // The unit of work ended while the fetch was in flight; its
                // result must not outlive it.
                debug!("loader retired mid-fetch, discarding batch result");
                for senders in window.waiters.into_values() {
                    for tx in senders {
                        let _ = tx.send(Err(LoadError::Retired));
                    }
                }
                return;
            }
            for (key, outcome) in &outcomes {
                state.cache.insert(key.clone(), outcome.clone());
            }
        }

        for (key, senders) in window.waiters {
            let outcome = outcomes
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(LoadError::WindowDropped));
            for tx in senders {
                // A dropped receiver just means that caller went away.
                let _ = tx.send(outcome.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;
    use std::sync::Mutex as StdMutex;

    use assert_matches::assert_matches;
    use tokio::sync::Notify;

    #[derive(Clone)]
    struct MapFetch {
        values: HashMap<u32, &'static str>,
        calls: Arc<StdMutex<usize>>,
    }

    impl MapFetch {
        fn new(values: &[(u32, &'static str)]) -> Self {
            Self {
                values: values.iter().copied().collect(),
                calls: Arc::new(StdMutex::new(0)),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl BatchFetch<u32> for MapFetch {
        type Value = &'static str;
        type Error = Infallible;

        async fn fetch_many(
            &self,
            keys: &[u32],
        ) -> Result<HashMap<u32, &'static str>, Infallible> {
            *self.calls.lock().unwrap() += 1;
            Ok(keys
                .iter()
                .filter_map(|k| self.values.get(k).map(|v| (*k, *v)))
                .collect())
        }
    }

    /// Fetcher that parks until the test releases it, for exercising
    /// retirement while a fetch is in flight.
    #[derive(Clone)]
    struct GatedFetch {
        gate: Arc<Notify>,
    }

    impl BatchFetch<u32> for GatedFetch {
        type Value = &'static str;
        type Error = Infallible;

        async fn fetch_many(
            &self,
            keys: &[u32],
        ) -> Result<HashMap<u32, &'static str>, Infallible> {
            self.gate.notified().await;
            Ok(keys.iter().map(|k| (*k, "gated")).collect())
        }
    }

    #[tokio::test]
    async fn test_cached_reread_skips_second_fetch() {
        let fetch = MapFetch::new(&[(1, "resistor")]);
        let loader: BatchLoader<u32, _> = BatchLoader::new(fetch.clone());

        assert_eq!(loader.load(1).await.unwrap(), Some("resistor"));
        assert_eq!(loader.load(1).await.unwrap(), Some("resistor"));
        assert_eq!(fetch.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sequential_loads_open_separate_windows() {
        let fetch = MapFetch::new(&[(1, "resistor"), (2, "capacitor")]);
        let loader: BatchLoader<u32, _> = BatchLoader::new(fetch.clone());

        assert_eq!(loader.load(1).await.unwrap(), Some("resistor"));
        assert_eq!(loader.load(2).await.unwrap(), Some("capacitor"));
        assert_eq!(fetch.call_count(), 2);
    }

    #[tokio::test]
    async fn test_prime_suppresses_fetch() {
        let fetch = MapFetch::new(&[(1, "from-db")]);
        let loader: BatchLoader<u32, _> = BatchLoader::new(fetch.clone());

        loader.prime(1, "primed").await.unwrap();
        assert_eq!(loader.load(1).await.unwrap(), Some("primed"));
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn test_prime_never_overwrites_resolved_outcome() {
        let fetch = MapFetch::new(&[(1, "from-db")]);
        let loader: BatchLoader<u32, _> = BatchLoader::new(fetch.clone());

        assert_eq!(loader.load(1).await.unwrap(), Some("from-db"));
        loader.prime(1, "primed").await.unwrap();
        assert_eq!(loader.load(1).await.unwrap(), Some("from-db"));
    }

    #[tokio::test]
    async fn test_retired_loader_fails_fast() {
        let fetch = MapFetch::new(&[(1, "resistor")]);
        let loader: BatchLoader<u32, _> = BatchLoader::new(fetch.clone());

        loader.retire().await;
        assert_matches!(loader.load(1).await, Err(LoadError::Retired));
        assert_matches!(loader.prime(1, "late").await, Err(LoadError::Retired));
        assert_eq!(fetch.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retire_wakes_parked_waiters() {
        let loader: BatchLoader<u32, _> = BatchLoader::new(GatedFetch {
            gate: Arc::new(Notify::new()),
        });

        let handle = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        // Let the load register in the window before retiring.
        yield_now().await;
        loader.retire().await;

        assert_matches!(handle.await.unwrap(), Err(LoadError::Retired));
    }

    #[tokio::test]
    async fn test_retire_discards_in_flight_fetch() {
        let gate = Arc::new(Notify::new());
        let loader: BatchLoader<u32, _> = BatchLoader::new(GatedFetch {
            gate: Arc::clone(&gate),
        });

        let handle = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load(1).await }
        });
        // Let the window dispatch and park inside fetch_many.
        for _ in 0..5 {
            yield_now().await;
        }
        loader.retire().await;
        gate.notify_one();

        assert_matches!(handle.await.unwrap(), Err(LoadError::Retired));
        assert_matches!(loader.load(1).await, Err(LoadError::Retired));
    }

    #[tokio::test]
    async fn test_retire_is_idempotent() {
        let loader: BatchLoader<u32, _> = BatchLoader::new(MapFetch::new(&[]));
        loader.retire().await;
        loader.retire().await;
        assert_matches!(loader.load(1).await, Err(LoadError::Retired));
    }
}
