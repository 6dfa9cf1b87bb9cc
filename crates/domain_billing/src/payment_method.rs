//! Stored payment methods
//!
//! A payment method row mirrors an instrument vaulted at the gateway.
//! The row never stores raw card data, only the gateway token and the
//! masked display fields the gateway hands back.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, PaymentMethodId};
use serde::{Deserialize, Serialize};

/// Kind of payment instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    CreditCard,
    BankAccount,
}

/// The gateway's view of a vaulted instrument
///
/// Returned by `PaymentGateway::save_payment_method` and embedded into
/// Payments and Transactions so the ledger keeps a point-in-time record
/// of what was charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodSnapshot {
    pub platform: String,
    pub token: String,
    pub kind: PaymentMethodKind,
    pub masked_number: Option<String>,
    pub last_4: Option<String>,
    pub expiration_date: Option<String>,
}

/// A payment instrument owned by an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// Unique identifier
    pub id: PaymentMethodId,
    pub account_id: AccountId,
    /// Gateway the instrument is vaulted with
    pub platform: String,
    /// Gateway token (unique per row)
    pub token: String,
    pub kind: PaymentMethodKind,
    pub masked_number: Option<String>,
    pub last_4: Option<String>,
    pub expiration_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Builds a local row from a gateway snapshot
    pub fn from_snapshot(account_id: AccountId, snapshot: PaymentMethodSnapshot) -> Self {
        Self {
            id: PaymentMethodId::new_v7(),
            account_id,
            platform: snapshot.platform,
            token: snapshot.token,
            kind: snapshot.kind,
            masked_number: snapshot.masked_number,
            last_4: snapshot.last_4,
            expiration_date: snapshot.expiration_date,
            created_at: Utc::now(),
        }
    }

    /// Point-in-time snapshot for embedding in ledger records
    pub fn snapshot(&self) -> PaymentMethodSnapshot {
        PaymentMethodSnapshot {
            platform: self.platform.clone(),
            token: self.token.clone(),
            kind: self.kind,
            masked_number: self.masked_number.clone(),
            last_4: self.last_4.clone(),
            expiration_date: self.expiration_date.clone(),
        }
    }
}
