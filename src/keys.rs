//! Lookup key shapes for inventory queries
//!
//! Every key shape the loader is used with must compare by value, since key
//! equality is what defines "same request" within a batch window. Scalar ids
//! and strings already do; the composite range keys here cover the banded
//! lookups (price band, stock band, both at once) that would otherwise need
//! ad-hoc tuples at every call site.

use std::fmt;

/// Identifier of a single component row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub i32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ComponentId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Inclusive price band, in minor currency units.
///
/// Prices are carried as cents so the key stays `Eq + Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceRange {
    pub min_cents: i64,
    pub max_cents: i64,
}

impl PriceRange {
    pub fn new(min_cents: i64, max_cents: i64) -> Self {
        Self {
            min_cents,
            max_cents,
        }
    }

    /// Whether a price falls inside the band (both ends inclusive).
    pub fn contains(&self, price_cents: i64) -> bool {
        price_cents >= self.min_cents && price_cents <= self.max_cents
    }
}

/// Inclusive stock-quantity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StockRange {
    pub min: i32,
    pub max: i32,
}

impl StockRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Whether a quantity falls inside the band (both ends inclusive).
    pub fn contains(&self, quantity: i32) -> bool {
        quantity >= self.min && quantity <= self.max
    }
}

/// Combined price and stock band, matched as a conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceAndStockRange {
    pub price: PriceRange,
    pub stock: StockRange,
}

impl PriceAndStockRange {
    pub fn new(price: PriceRange, stock: StockRange) -> Self {
        Self { price, stock }
    }

    pub fn matches(&self, price_cents: i64, quantity: i32) -> bool {
        self.price.contains(price_cents) && self.stock.contains(quantity)
    }
}
