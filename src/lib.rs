//! Request-scoped batch data loading for inventory resolver graphs
//!
//! When a resolver graph fans out — fifty components each resolving their
//! supplier, say — naive per-node lookups turn into an N+1 query storm. A
//! [`BatchLoader`] coalesces the lookups issued during one burst of resolver
//! execution into a single batched fetch against the data layer, deduplicates
//! keys, and caches every outcome for the rest of the unit of work.
//!
//! The loader performs no I/O itself. All data access goes through a
//! caller-supplied [`BatchFetch`] implementation, one per key shape: entity
//! by id, components by category or manufacturer, components by price or
//! stock band (see [`keys`] for the composite key shapes).
//!
//! # Unit-of-work scoping
//!
//! One loader instance belongs to exactly one unit of work (one incoming API
//! request). Construct fresh loaders per request, thread clones into the
//! resolvers that need them, and call [`BatchLoader::retire`] when the
//! request completes. There is no ambient registry; scoping is explicit by
//! construction.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::convert::Infallible;
//!
//! use partsbin_loader::{BatchFetch, BatchLoader};
//!
//! struct PartNames;
//!
//! impl BatchFetch<i32> for PartNames {
//!     type Value = String;
//!     type Error = Infallible;
//!
//!     async fn fetch_many(&self, keys: &[i32]) -> Result<HashMap<i32, String>, Infallible> {
//!         // One round trip for the whole batch, e.g. `WHERE id = ANY($1)`.
//!         Ok(keys.iter().map(|id| (*id, format!("part-{id}"))).collect())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = BatchLoader::new(PartNames);
//!
//! // Both loads land in the same batch window; `fetch_many` runs once.
//! let (a, b) = tokio::join!(loader.load(3), loader.load(7));
//! assert_eq!(a?.as_deref(), Some("part-3"));
//! assert_eq!(b?.as_deref(), Some("part-7"));
//!
//! loader.retire().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
pub mod keys;
mod loader;

pub use error::{LoadError, LoadResult};
pub use fetch::BatchFetch;
pub use keys::{ComponentId, PriceAndStockRange, PriceRange, StockRange};
pub use loader::BatchLoader;
