//! Fixed-point money stored as integer minor units (cents).
//!
//! Prices are persisted as `INTEGER` cents so sums never drift, and exposed
//! over JSON as two-decimal strings (`"20.00"`).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of fractional digits carried by every amount
pub const SCALE: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must not be negative")]
    Negative,
    #[error("amount may have at most 2 decimal places")]
    TooPrecise,
    #[error("amount is out of range")]
    Overflow,
}

/// A non-negative amount in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const MAX: Money = Money(i64::MAX);

    pub fn from_cents(cents: i64) -> Result<Self, MoneyError> {
        if cents < 0 {
            return Err(MoneyError::Negative);
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    /// Parse a decimal amount, rejecting negatives and sub-cent precision.
    pub fn try_from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }
        if value.normalize().scale() > SCALE {
            return Err(MoneyError::TooPrecise);
        }
        let cents = value
            .checked_mul(Decimal::from(100))
            .and_then(|c| c.to_i64())
            .ok_or(MoneyError::Overflow)?;
        Ok(Self(cents))
    }

    /// `self * quantity`, `None` on overflow or a negative quantity.
    pub fn checked_times(self, quantity: i64) -> Option<Money> {
        if quantity < 0 {
            return None;
        }
        self.0.checked_mul(quantity).map(Money)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Money::try_from_decimal(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_decimal_conversion() {
        let money = Money::try_from_decimal(Decimal::from_str("10.5").unwrap()).unwrap();
        assert_eq!(money.cents(), 1050);
        assert_eq!(money.to_string(), "10.50");
    }

    #[test]
    fn test_rejects_negative_and_sub_cent() {
        assert_eq!(
            Money::try_from_decimal(Decimal::from_str("-1").unwrap()),
            Err(MoneyError::Negative)
        );
        assert_eq!(
            Money::try_from_decimal(Decimal::from_str("1.005").unwrap()),
            Err(MoneyError::TooPrecise)
        );
        assert!(Money::from_cents(-1).is_err());
    }

    #[test]
    fn test_trailing_zeros_are_not_extra_precision() {
        let money = Money::try_from_decimal(Decimal::from_str("3.1000").unwrap()).unwrap();
        assert_eq!(money.cents(), 310);
    }

    #[test]
    fn test_checked_arithmetic() {
        let price = Money::from_cents(1000).unwrap();
        assert_eq!(price.checked_times(2), Some(Money(2000)));
        assert_eq!(Money(i64::MAX).checked_times(2), None);
        assert_eq!(price.checked_times(-1), None);
        assert_eq!(Money(i64::MAX).checked_add(Money(1)), None);
    }

    #[test]
    fn test_json_accepts_strings_and_numbers() {
        let from_str: Money = serde_json::from_str("\"12.34\"").unwrap();
        let from_num: Money = serde_json::from_str("12.34").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"12.34\"");
        assert!(serde_json::from_str::<Money>("\"-2\"").is_err());
    }

    #[test]
    fn test_serializes_inside_json_values() {
        let value = serde_json::json!({ "total": Money::from_cents(2000).unwrap() });
        assert_eq!(value["total"], "20.00");
    }
}
