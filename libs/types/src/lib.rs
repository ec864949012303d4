//! Types library for depth-of-market replication
//!
//! This library provides the core type definitions shared by the feed
//! pipeline, keeping prices exact and sides unambiguous.
//!
//! # Modules
//! - `ids`: Instrument identifiers (Symbol)
//! - `numeric`: Fixed-point decimal types (Price, Quantity, BinSize)
//! - `side`: Book side (bid/ask)
//! - `trade`: Public trade prints
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod side;
pub mod trade;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::side::*;
    pub use crate::trade::*;
    pub use crate::errors::*;
}
