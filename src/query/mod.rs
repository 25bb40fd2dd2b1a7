//! Query construction for the nfdump flow-query engine.
//!
//! Symbolic names (`SOURCE ADDRESS`, `PACKETS`, ...) are translated through
//! fixed tables into nfdump tokens and assembled into an argument list.

pub mod builder;
pub mod symbols;

// Re-export commonly used types
pub use builder::{QueryBuilder, QuerySpec, StoreKind, FIELD_DELIMITER};
pub use symbols::{Aggregator, Filter, Unit, Variable};
