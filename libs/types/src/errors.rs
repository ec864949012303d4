//! Error types for the shared kernel
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Validation and parsing errors for core types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid bin size: {0}")]
    InvalidBinSize(String),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Cannot parse decimal {input:?}: {reason}")]
    ParseDecimal { input: String, reason: String },
}

impl TypesError {
    /// Whether the error came from unparseable text rather than a range check.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, TypesError::ParseDecimal { .. })
    }
}
