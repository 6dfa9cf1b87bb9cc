//! Pre-built test data for common billing entities

use core_kernel::Money;
use domain_billing::coupon::{Coupon, CouponStyle};
use domain_billing::product::{PeriodUnit, Product};

/// Common money amounts
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// $10.00 - a typical monthly plan price
    pub fn plan_price() -> Money {
        Money::from_minor(1000)
    }

    /// $2.00 - the payment floor
    pub fn payment_floor() -> Money {
        Money::from_minor(200)
    }

    /// $5.00 - an account-style coupon credit
    pub fn coupon_credit() -> Money {
        Money::from_minor(-500)
    }
}

/// Common products
pub struct ProductFixtures;

impl ProductFixtures {
    /// A $10.00/month plan
    pub fn basic_monthly() -> Product {
        Product::new("basic", "Basic Plan", MoneyFixtures::plan_price())
    }

    /// A $120.00/year plan
    pub fn pro_yearly() -> Product {
        Product::new("pro", "Pro Plan", Money::from_minor(12000)).with_period(1, PeriodUnit::Year)
    }
}

/// Common coupons
pub struct CouponFixtures;

impl CouponFixtures {
    /// -10% recurring subscription discount, one use per account
    pub fn subscription_percent_off() -> Coupon {
        Coupon::new("Ten percent off", CouponStyle::Subscription)
            .with_code("TENOFF")
            .with_percent(-10)
    }

    /// -$5.00 one-shot account credit, one use per account
    pub fn account_credit() -> Coupon {
        Coupon::new("Five dollars back", CouponStyle::Account)
            .with_code("FIVEBACK")
            .with_amount(MoneyFixtures::coupon_credit())
    }
}
