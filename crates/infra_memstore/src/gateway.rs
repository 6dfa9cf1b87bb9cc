//! Mock payment gateway
//!
//! Behaves like a vaulting processor: customers, tokenized instruments,
//! charges with ids, and voids. Failure modes (declined tokens, a
//! scripted one-shot failure) are settable from tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use core_kernel::Money;

use domain_billing::payment_method::{PaymentMethodKind, PaymentMethodSnapshot};
use domain_billing::ports::{
    CustomerInfo, GatewayCharge, GatewayCustomer, GatewayError, PaymentGateway,
};

/// A charge the mock gateway has accepted
#[derive(Debug, Clone)]
pub struct MockCharge {
    pub amount: Money,
    pub token: String,
    pub voided: bool,
}

#[derive(Default)]
struct GatewayState {
    customers: HashMap<String, Vec<PaymentMethodSnapshot>>,
    charges: HashMap<String, MockCharge>,
    declined_tokens: HashSet<String>,
    fail_next_payment: Option<GatewayError>,
    counter: u64,
}

impl GatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}_{}", prefix, self.counter)
    }
}

/// In-memory gateway for tests and local development
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every payment with this token decline
    pub fn decline_token(&self, token: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .declined_tokens
            .insert(token.into());
    }

    /// Fails the next `send_payment` with the given error
    pub fn fail_next_payment(&self, error: GatewayError) {
        self.state.lock().unwrap().fail_next_payment = Some(error);
    }

    /// Looks up an accepted charge
    pub fn charge(&self, id: &str) -> Option<MockCharge> {
        self.state.lock().unwrap().charges.get(id).cloned()
    }

    /// Ids of charges that have been voided
    pub fn voided_charge_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .charges
            .iter()
            .filter(|(_, c)| c.voided)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn charge_count(&self) -> usize {
        self.state.lock().unwrap().charges.len()
    }
}

impl core_kernel::DomainPort for MockGateway {}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn platform_name(&self) -> &str {
        "mock"
    }

    async fn create_customer(&self, _info: &CustomerInfo) -> Result<GatewayCustomer, GatewayError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("cus");
        state.customers.insert(id.clone(), Vec::new());
        Ok(GatewayCustomer { id })
    }

    async fn save_payment_method(
        &self,
        customer_id: &str,
        token: Option<&str>,
        nonce: &str,
    ) -> Result<PaymentMethodSnapshot, GatewayError> {
        let mut state = self.state.lock().unwrap();
        let token = match token {
            Some(existing) => existing.to_string(),
            None => state.next_id("tok"),
        };
        let snapshot = PaymentMethodSnapshot {
            platform: "mock".to_string(),
            token: token.clone(),
            kind: PaymentMethodKind::CreditCard,
            masked_number: Some(format!("411111******{}", &nonce_last4(nonce))),
            last_4: Some(nonce_last4(nonce)),
            expiration_date: Some("12/2030".to_string()),
        };
        let methods = state
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| GatewayError::not_found("Customer not found"))?;
        methods.retain(|m| m.token != token);
        methods.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_payment_method(&self, token: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let mut deleted = false;
        for methods in state.customers.values_mut() {
            let before = methods.len();
            methods.retain(|m| m.token != token);
            deleted |= methods.len() != before;
        }
        if deleted {
            Ok(())
        } else {
            Err(GatewayError::not_found("Payment method not found"))
        }
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethodSnapshot>, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Customer not found"))
    }

    async fn send_payment(
        &self,
        amount: Money,
        payment_method_token: &str,
    ) -> Result<GatewayCharge, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next_payment.take() {
            return Err(error);
        }
        if state.declined_tokens.contains(payment_method_token) {
            return Err(GatewayError::declined("Payment was declined"));
        }

        let id = state.next_id("ch");
        state.charges.insert(
            id.clone(),
            MockCharge {
                amount,
                token: payment_method_token.to_string(),
                voided: false,
            },
        );
        Ok(GatewayCharge {
            id,
            status: "settled".to_string(),
        })
    }

    async fn void_payment(&self, charge_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        match state.charges.get_mut(charge_id) {
            Some(charge) => {
                charge.voided = true;
                Ok(())
            }
            None => Err(GatewayError::not_found("Charge not found")),
        }
    }
}

fn nonce_last4(nonce: &str) -> String {
    let digits: String = nonce.chars().filter(char::is_ascii_digit).collect();
    if digits.len() >= 4 {
        digits[digits.len() - 4..].to_string()
    } else {
        "1111".to_string()
    }
}
