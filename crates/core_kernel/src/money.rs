//! Money in integer minor units
//!
//! All amounts in the billing system are integer minor units (cents).
//! Percent adjustments go through rust_decimal so that rounding to the
//! cent is exact rather than floating-point.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use thiserror::Error;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Overflow during calculation")]
    Overflow,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// A monetary amount in integer minor units (cents)
///
/// The sign carries meaning throughout the ledger: charges are positive,
/// discounts and credits negative. Arithmetic saturating or panicking on
/// overflow is never acceptable here, so the fallible paths use
/// `checked_*` and the operator impls are reserved for amounts already
/// validated by the domain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Creates a Money value from integer minor units (e.g. cents)
    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    /// Returns the amount in minor units
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Checked addition
    pub fn checked_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction
    pub fn checked_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by an integer quantity
    pub fn checked_mul(&self, quantity: i64) -> Result<Money, MoneyError> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Applies a percentage to this amount, rounded to the nearest minor
    /// unit (half away from zero)
    ///
    /// `Money::from_minor(2000).percent_of(-10)` is `-200`:
    /// the contribution a `-10%` discount entry makes against a 20.00
    /// reference amount.
    pub fn percent_of(&self, percent: i64) -> Money {
        let raw = Decimal::from(self.0) * Decimal::from(percent) / Decimal::from(100);
        let rounded = raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Money(rounded.to_i64().unwrap_or(i64::MAX))
    }

    /// Scales this amount by `numerator / denominator`, rounding toward
    /// zero. Used for proration of a charge over a partial period.
    pub fn prorate(&self, numerator: i64, denominator: i64) -> Result<Money, MoneyError> {
        if denominator <= 0 {
            return Err(MoneyError::InvalidAmount(format!(
                "cannot prorate over a non-positive denominator: {denominator}"
            )));
        }
        let scaled = i128::from(self.0) * i128::from(numerator) / i128::from(denominator);
        i64::try_from(scaled).map(Money).map_err(|_| MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_minor() {
        let m = Money::from_minor(10050);
        assert_eq!(m.minor_units(), 10050);
        assert_eq!(m.to_string(), "$100.50");
    }

    #[test]
    fn test_money_display_negative() {
        assert_eq!(Money::from_minor(-216).to_string(), "-$2.16");
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_minor(10000);
        let b = Money::from_minor(5000);

        assert_eq!((a + b).minor_units(), 15000);
        assert_eq!((a - b).minor_units(), 5000);
        assert_eq!((-a).minor_units(), -10000);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(Money::from_minor(2000).percent_of(-10).minor_units(), -200);
        assert_eq!(Money::from_minor(-200).percent_of(8).minor_units(), -16);
        // rounds half away from zero
        assert_eq!(Money::from_minor(25).percent_of(50).minor_units(), 13);
        assert_eq!(Money::from_minor(-25).percent_of(50).minor_units(), -13);
    }

    #[test]
    fn test_prorate_floors() {
        // 1000 over a 30-day period with 20 days remaining
        let credit = Money::from_minor(1000).prorate(20, 30).unwrap();
        assert_eq!(credit.minor_units(), 666);
    }

    #[test]
    fn test_prorate_rejects_bad_denominator() {
        assert!(Money::from_minor(1000).prorate(1, 0).is_err());
    }

    #[test]
    fn test_checked_overflow() {
        let max = Money::from_minor(i64::MAX);
        assert_eq!(max.checked_add(Money::from_minor(1)), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, 250, -50].into_iter().map(Money::from_minor).sum();
        assert_eq!(total.minor_units(), 300);
    }
}
