//! Billing configuration
//!
//! Collaborators (store, gateway, dispatcher) are injected into services
//! explicitly; the tunable policy knobs live here as a plain value type
//! so deployments can load them from whatever configuration source they
//! already use.

use core_kernel::Money;
use serde::{Deserialize, Serialize};

/// Policy knobs for the billing services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Days of grace before a positive balance counts as delinquent
    pub grace_period_days: i64,
    /// Minimum chargeable payment amount in minor units
    pub payment_floor: Money,
    /// Hours to wait between automatic payment attempts on an account
    pub payment_retry_cooldown_hours: i64,
    /// Description used for subscription invoices without one
    pub default_invoice_description: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 3,
            payment_floor: Money::from_minor(200),
            payment_retry_cooldown_hours: 24,
            default_invoice_description: "Subscription invoice".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.grace_period_days, 3);
        assert_eq!(config.payment_floor, Money::from_minor(200));
        assert_eq!(config.payment_retry_cooldown_hours, 24);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: BillingConfig = serde_json::from_str(r#"{"grace_period_days": 14}"#).unwrap();
        assert_eq!(config.grace_period_days, 14);
        assert_eq!(config.payment_floor, Money::from_minor(200));
    }
}
