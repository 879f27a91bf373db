//! Error types for batch loading

use thiserror::Error;

/// Errors a caller can observe from a loader.
///
/// Absence of data is not represented here: a single-entity key that matches
/// nothing resolves to `Ok(None)`, and a collection key that matches nothing
/// resolves to an empty collection. Only fetch failures and loader misuse are
/// errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError<E> {
    /// The batch fetch function failed. The same error is handed to every
    /// waiter of the failed batch; the loader does not retry.
    #[error("batch fetch failed: {0}")]
    Fetch(E),

    /// The loader was retired at the end of its unit of work. A loader
    /// instance is scoped to exactly one unit of work; reusing it afterwards
    /// fails fast instead of serving stale cached results.
    #[error("loader already retired for its unit of work")]
    Retired,

    /// The batch window went away before a result was distributed, e.g. the
    /// owning unit of work was dropped mid-flight.
    #[error("batch window dropped before results were distributed")]
    WindowDropped,
}

impl<E> LoadError<E> {
    /// Check whether this error came from the fetch function rather than
    /// from loader lifecycle misuse.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, LoadError::Fetch(_))
    }
}

/// Result type for loader operations
pub type LoadResult<T, E> = Result<T, LoadError<E>>;
