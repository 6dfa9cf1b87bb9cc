//! Billable products
//!
//! A product is a priced, optionally recurring offering. Its period
//! drives subscription renewal windows.

use chrono::{DateTime, Months, Utc};
use core_kernel::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// Unit of a product's billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Month,
    Year,
}

/// A billable product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique identifier
    pub id: ProductId,
    /// Lookup key (unique)
    pub key: String,
    /// Display name
    pub name: String,
    /// Unit price in minor units
    pub price: Money,
    /// Billing period length, e.g. 1 month
    pub period_interval: u32,
    pub period_unit: PeriodUnit,
    /// Whether the product can currently be purchased
    pub is_available: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new monthly product
    pub fn new(key: impl Into<String>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: ProductId::new_v7(),
            key: key.into(),
            name: name.into(),
            price,
            period_interval: 1,
            period_unit: PeriodUnit::Month,
            is_available: true,
            created_at: Utc::now(),
        }
    }

    /// Sets the billing period
    pub fn with_period(mut self, interval: u32, unit: PeriodUnit) -> Self {
        self.period_interval = interval;
        self.period_unit = unit;
        self
    }

    /// Returns the period length in whole months
    pub fn period_months(&self) -> u32 {
        match self.period_unit {
            PeriodUnit::Month => self.period_interval,
            PeriodUnit::Year => self.period_interval * 12,
        }
    }

    /// Advances a timestamp by one billing period
    pub fn advance_period(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(Months::new(self.period_months()))
            .unwrap_or(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_months() {
        let monthly = Product::new("basic", "Basic", Money::from_minor(1000));
        assert_eq!(monthly.period_months(), 1);

        let yearly = Product::new("pro", "Pro", Money::from_minor(10000))
            .with_period(1, PeriodUnit::Year);
        assert_eq!(yearly.period_months(), 12);
    }

    #[test]
    fn test_advance_period() {
        let product = Product::new("basic", "Basic", Money::from_minor(1000));
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let end = product.advance_period(start);
        // clamped to the end of February
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
    }
}
