//! The wired in-memory harness
//!
//! Bundles the full service stack over the in-memory adapters so
//! integration tests can drive real billing flows and then assert
//! against the store, the gateway, and the task queue directly.

use std::sync::Arc;

use domain_billing::account::Account;
use domain_billing::config::BillingConfig;
use domain_billing::coupon::Coupon;
use domain_billing::payment_method::PaymentMethod;
use domain_billing::product::Product;
use domain_billing::services::BillingServices;
use infra_memstore::{MemoryStore, MockGateway, RecordingDispatcher};

/// A fully wired billing stack over in-memory adapters
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub services: BillingServices,
}

impl TestHarness {
    /// Wires the stack with the default configuration
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default())
    }

    pub fn with_config(config: BillingConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let services = BillingServices::new(
            store.clone(),
            gateway.clone(),
            dispatcher.clone(),
            config,
        );
        Self {
            store,
            gateway,
            dispatcher,
            services,
        }
    }

    /// Creates an account with one vaulted payment method
    pub async fn account_with_method(&self) -> (Account, PaymentMethod) {
        let account = self
            .services
            .accounts
            .create_account()
            .await
            .expect("create account");
        let method = self
            .services
            .accounts
            .save_payment_method(account.id, "nonce-4242")
            .await
            .expect("save payment method");
        let account = self.reload_account(account.id).await;
        (account, method)
    }

    /// Re-reads an account from the store
    pub async fn reload_account(&self, id: core_kernel::AccountId) -> Account {
        use domain_billing::ports::AccountRepository;
        self.store
            .find_account(id)
            .await
            .expect("find account")
            .expect("account exists")
    }

    /// Persists a product fixture
    pub async fn seed_product(&self, product: &Product) {
        use domain_billing::ports::ProductRepository;
        self.store.save_product(product).await.expect("seed product");
    }

    /// Persists a coupon fixture
    pub async fn seed_coupon(&self, coupon: &Coupon) {
        use domain_billing::ports::CouponRepository;
        coupon.validate().expect("coupon fixture valid");
        self.store.save_coupon(coupon).await.expect("seed coupon");
    }

    /// Runs every queued background task once, returning how many ran
    pub async fn run_queued_tasks(&self) -> usize {
        let tasks = self.dispatcher.drain();
        let count = tasks.len();
        for task in tasks {
            self.services.run_task(&task).await.expect("task handler");
        }
        count
    }

    /// Runs queued tasks until the queue stays empty (handlers may
    /// schedule follow-up work)
    pub async fn settle_tasks(&self) {
        while self.run_queued_tasks().await > 0 {}
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
