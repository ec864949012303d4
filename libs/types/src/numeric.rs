//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for exact arithmetic. Exchange prices arrive as decimal
//! strings and are kept as `Decimal` end to end, so two prints of the same
//! price always compare (and hash) equal regardless of trailing zeros, and
//! rolling sums return to exactly zero when every contribution is removed.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TypesError;

/// Parse an exchange decimal string ("99.50", "0.00100000", "1e-3").
pub fn parse_decimal(input: &str) -> Result<Decimal, TypesError> {
    let trimmed = input.trim();
    let parsed = if trimmed.contains(|c: char| c == 'e' || c == 'E') {
        Decimal::from_scientific(trimmed)
    } else {
        Decimal::from_str(trimmed)
    };
    parsed.map_err(|e| TypesError::ParseDecimal {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// A strictly positive price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Validate and wrap a decimal price.
    pub fn try_new(value: Decimal) -> Result<Self, TypesError> {
        if value <= Decimal::ZERO {
            return Err(TypesError::InvalidPrice(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = TypesError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative quantity. Zero is meaningful on the wire: it removes a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Validate and wrap a decimal quantity.
    pub fn try_new(value: Decimal) -> Result<Self, TypesError> {
        if value < Decimal::ZERO {
            return Err(TypesError::InvalidQuantity(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether this quantity is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Quantity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = TypesError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(qty: Quantity) -> Self {
        qty.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width of a price bin used to aggregate raw levels into display rows.
///
/// A price `p` belongs to the bin centered at
/// `floor(p / size) * size + size / 2`. Bins are half-open `[lo, lo + size)`,
/// so every price maps to exactly one bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct BinSize(Decimal);

impl BinSize {
    pub const ONE: BinSize = BinSize(Decimal::ONE);

    /// Validate and wrap a bin width.
    pub fn try_new(value: Decimal) -> Result<Self, TypesError> {
        if value <= Decimal::ZERO {
            return Err(TypesError::InvalidBinSize(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Inner decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Center of the bin containing `price`.
    #[inline]
    pub fn bin_center(&self, price: Decimal) -> Decimal {
        (price / self.0).floor() * self.0 + self.0 / Decimal::TWO
    }

    /// Center of the bin `steps` bins away from `center` (negative = lower).
    #[inline]
    pub fn offset(&self, center: Decimal, steps: i64) -> Decimal {
        center + self.0 * Decimal::from(steps)
    }
}

impl FromStr for BinSize {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl TryFrom<Decimal> for BinSize {
    type Error = TypesError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<BinSize> for Decimal {
    fn from(size: BinSize) -> Self {
        size.0
    }
}

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
