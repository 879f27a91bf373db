//! Batch fetch contract between the loader and the data layer
//!
//! The loader itself performs no I/O. All data access goes through a
//! caller-supplied [`BatchFetch`] implementation, which receives the
//! deduplicated keys of one batch window and returns whatever it found.
//! This is the only integration point with the persistence layer.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// A batched fetch function for one key shape.
///
/// `fetch_many` receives a non-empty slice of distinct keys in
/// first-registration order and returns a map from key to resolved value.
/// Keys with no matching data are simply left out of the map; the loader
/// turns absence into an outcome via [`missing`](BatchFetch::missing).
///
/// There are two kinds of fetchers, mirroring the two kinds of lookups a
/// resolver graph performs:
/// - Single-entity fetchers (entity by id): keep the default `missing`, so
///   absent keys resolve to not-found (`None`).
/// - Collection fetchers (entities by category, by manufacturer, by range):
///   override `missing` to return an empty collection, so absent keys resolve
///   to "no rows" rather than not-found.
pub trait BatchFetch<K>: Send + Sync + 'static
where
    K: Send + Sync + Hash + Eq + Clone + 'static,
{
    /// Value resolved for a single key. Cloned once per waiter.
    type Value: Send + Sync + Clone + 'static;

    /// Error for a failed batch. The same error is handed to every waiter,
    /// so non-cloneable sources should be wrapped in `Arc`.
    type Error: Send + Sync + Clone + 'static;

    /// Fetch all given keys in one round trip.
    ///
    /// A failure here fails the whole batch uniformly; the loader never
    /// retries on its own.
    fn fetch_many(
        &self,
        keys: &[K],
    ) -> impl Future<Output = Result<HashMap<K, Self::Value>, Self::Error>> + Send;

    /// Value substituted for a key absent from the `fetch_many` result.
    ///
    /// Defaults to `None` (not-found). Collection fetchers override this to
    /// produce an empty collection.
    fn missing(&self, _key: &K) -> Option<Self::Value> {
        None
    }
}
