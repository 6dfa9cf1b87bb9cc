//! Subscription and invoice flows over the in-memory adapters

use chrono::{Duration, Utc};
use core_kernel::Money;

use domain_billing::entry::{Entry, EntrySource, EntryState};
use domain_billing::invoice::{Invoice, InvoiceState};
use domain_billing::ports::{EntryRepository, InvoiceRepository};
use domain_billing::subscription::SubscriptionState;
use domain_billing::transaction::{TransactionKind, TransactionState};
use domain_billing::BillingError;

use test_utils::{CouponFixtures, ProductFixtures, TestHarness};

// ============================================================================
// Invoice charging
// ============================================================================

async fn open_invoice(h: &TestHarness, amount: i64) -> Invoice {
    let account = h.services.accounts.create_account().await.unwrap();
    let entry = Entry::new("One-off charge", EntrySource::General)
        .with_amount(Money::from_minor(amount))
        .for_account(account.id);
    h.store.save_entry(&entry).await.unwrap();

    let invoice = Invoice::from_entries(account.id, "Ad-hoc invoice", vec![entry]);
    h.store.save_invoice(&invoice).await.unwrap();
    invoice
}

#[tokio::test]
async fn invoice_charges_exactly_once() {
    let h = TestHarness::new();
    let invoice = open_invoice(&h, 1500).await;

    let transaction = h
        .services
        .invoices
        .charge_to_account(invoice.id)
        .await
        .unwrap();
    assert_eq!(transaction.amount, Money::from_minor(1500));
    assert_eq!(transaction.invoice_id, Some(invoice.id));

    let charged = h.store.find_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(charged.state, InvoiceState::Charged);
    assert_eq!(charged.charged_amount, Some(Money::from_minor(1500)));

    let err = h
        .services
        .invoices
        .charge_to_account(invoice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::StateTransition { .. }));

    // one completed charge on the ledger, balance moved once
    assert_eq!(
        h.reload_account(invoice.account_id).await.balance,
        Money::from_minor(1500)
    );
}

#[tokio::test]
async fn voiding_a_charged_invoice_reverses_its_transaction() {
    let h = TestHarness::new();
    let invoice = open_invoice(&h, 1200).await;
    h.services
        .invoices
        .charge_to_account(invoice.id)
        .await
        .unwrap();

    let voided = h.services.invoices.void(invoice.id).await.unwrap();
    assert_eq!(voided.state, InvoiceState::Voided);

    let transaction = h
        .store
        .all_transactions()
        .into_iter()
        .find(|t| t.invoice_id == Some(invoice.id))
        .unwrap();
    assert_eq!(transaction.state, TransactionState::Void);

    h.settle_tasks().await;
    assert_eq!(h.reload_account(invoice.account_id).await.balance, Money::ZERO);

    // voiding again is an error
    let err = h.services.invoices.void(invoice.id).await.unwrap_err();
    assert!(matches!(err, BillingError::StateTransition { .. }));
}

#[tokio::test]
async fn charged_invoice_can_settle_as_paid() {
    let h = TestHarness::new();
    let invoice = open_invoice(&h, 300).await;
    h.services
        .invoices
        .charge_to_account(invoice.id)
        .await
        .unwrap();

    let paid = h.services.invoices.mark_paid(invoice.id).await.unwrap();
    assert_eq!(paid.state, InvoiceState::Paid);

    // a paid invoice can no longer be voided
    assert!(h.services.invoices.void(invoice.id).await.is_err());
}

#[tokio::test]
async fn entry_count_refresh_consumes_limited_entries() {
    let h = TestHarness::new();
    let account = h.services.accounts.create_account().await.unwrap();
    let coupon = CouponFixtures::subscription_percent_off();
    let entry = Entry::from_coupon(&coupon).for_account(account.id);
    let product_entry = Entry::new("Plan", EntrySource::Product)
        .with_amount(Money::from_minor(1000))
        .for_account(account.id);
    h.store.save_entry(&entry).await.unwrap();
    h.store.save_entry(&product_entry).await.unwrap();

    let invoice = Invoice::from_entries(
        account.id,
        "First month",
        vec![product_entry.clone(), entry.clone()],
    );
    h.store.save_invoice(&invoice).await.unwrap();
    h.services
        .invoices
        .charge_to_account(invoice.id)
        .await
        .unwrap();
    h.settle_tasks().await;

    let refreshed = h.store.find_entry(entry.id).await.unwrap().unwrap();
    assert_eq!(refreshed.invoiced_count, 1);
    // max_uses was 1, so the discount is spent
    assert!(!refreshed.is_invoiceable());

    // an unlimited entry stays invoiceable
    let refreshed = h.store.find_entry(product_entry.id).await.unwrap().unwrap();
    assert_eq!(refreshed.invoiced_count, 1);
    assert!(refreshed.is_invoiceable());
}

// ============================================================================
// Subscribe / renew
// ============================================================================

#[tokio::test]
async fn subscribe_charges_the_first_period() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();

    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    assert_eq!(subscription.state, SubscriptionState::Active);
    assert!(subscription.period_start.is_some());
    assert!(subscription.period_end.unwrap() > Utc::now());
    assert_eq!(subscription.last_charged_amount, Some(Money::from_minor(1000)));
    assert!(subscription.last_invoice_id.is_some());

    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000)
    );
}

#[tokio::test]
async fn renewal_is_blocked_while_active_and_unexpired() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    let err = h
        .services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::StateTransition { .. }));

    // nothing changed and no second charge landed
    let reloaded = h
        .services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(reloaded, BillingError::StateTransition { .. }));
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000)
    );
}

#[tokio::test]
async fn expired_subscription_renews_from_the_old_period_end() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();
    let old_end = Utc::now() - Duration::hours(2);
    h.store.with_subscription_mut(subscription.id, |s| {
        s.period_end = Some(old_end);
    });

    let renewed = h
        .services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap();

    assert_eq!(renewed.state, SubscriptionState::Active);
    assert_eq!(renewed.period_start, Some(old_end));
    assert!(renewed.period_end.unwrap() > old_end);
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(2000)
    );
}

#[tokio::test]
async fn failed_renewal_voids_the_invoice_and_goes_inactive() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();
    h.store.with_subscription_mut(subscription.id, |s| {
        s.period_end = Some(Utc::now() - Duration::hours(1));
    });

    h.store.fail_next_transaction_save();
    let err = h
        .services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Storage(_)));

    use domain_billing::ports::SubscriptionRepository;
    let parked = h
        .store
        .find_subscription(subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.state, SubscriptionState::Inactive);

    // only the original charge is on the ledger
    let completed_charges = h
        .store
        .all_transactions()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Charge && t.is_completed())
        .count();
    assert_eq!(completed_charges, 1);
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000)
    );

    // a later renewal succeeds and reactivates
    let renewed = h
        .services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap();
    assert_eq!(renewed.state, SubscriptionState::Active);
}

#[tokio::test]
async fn renewal_sweep_renews_expired_autorenewable_subscriptions() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();
    h.store.with_subscription_mut(subscription.id, |s| {
        s.period_end = Some(Utc::now() - Duration::days(1));
    });

    let renewed = h
        .services
        .subscriptions
        .process_expired_subscriptions()
        .await
        .unwrap();
    assert_eq!(renewed, 1);

    // an immediate second sweep finds nothing expired
    let renewed = h
        .services
        .subscriptions
        .process_expired_subscriptions()
        .await
        .unwrap();
    assert_eq!(renewed, 0);
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(2000)
    );
}

// ============================================================================
// Cancellation and proration
// ============================================================================

#[tokio::test]
async fn cancel_credits_unused_time_when_prorateable() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    // 10 of 30 days used
    let now = Utc::now();
    h.store.with_subscription_mut(subscription.id, |s| {
        s.is_prorateable = true;
        s.period_start = Some(now - Duration::days(10));
        s.period_end = Some(now + Duration::days(20));
    });

    let cancelled = h
        .services
        .subscriptions
        .cancel(subscription.id)
        .await
        .unwrap();
    assert_eq!(cancelled.state, SubscriptionState::Cancelled);
    assert!(cancelled.period_end.unwrap() <= Utc::now());

    let credit = h
        .store
        .all_transactions()
        .into_iter()
        .find(|t| t.kind == TransactionKind::Credit)
        .expect("prorated credit issued");
    assert_eq!(credit.amount, Money::from_minor(666));
    assert_eq!(credit.subscription_id, Some(subscription.id));

    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000 - 666)
    );

    // cancellation is terminal
    let err = h
        .services
        .subscriptions
        .cancel(subscription.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::StateTransition { .. }));
}

#[tokio::test]
async fn cancel_without_proration_issues_no_credit() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    h.services
        .subscriptions
        .cancel(subscription.id)
        .await
        .unwrap();

    let credits = h
        .store
        .all_transactions()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Credit)
        .count();
    assert_eq!(credits, 0);
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000)
    );
}

// ============================================================================
// Entry management
// ============================================================================

#[tokio::test]
async fn never_invoiced_entry_is_deleted_outright() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    let addon = h
        .services
        .subscriptions
        .add_entry(
            subscription.id,
            Entry::new("Add-on seat", EntrySource::General).with_amount(Money::from_minor(250)),
        )
        .await
        .unwrap();

    h.services
        .subscriptions
        .remove_entry(subscription.id, addon.id)
        .await
        .unwrap();
    assert!(h.store.find_entry(addon.id).await.unwrap().is_none());
}

#[tokio::test]
async fn invoiced_entry_is_voided_not_deleted() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();
    h.settle_tasks().await;

    // the product entry was consumed by the first invoice
    let entries = h
        .store
        .entries_for_subscription(subscription.id)
        .await
        .unwrap();
    let plan_entry = entries.first().unwrap().clone();
    assert!(plan_entry.is_invoiced());

    h.services
        .subscriptions
        .remove_entry(subscription.id, plan_entry.id)
        .await
        .unwrap();

    let kept = h.store.find_entry(plan_entry.id).await.unwrap().unwrap();
    assert_eq!(kept.state, EntryState::Voided);
}

#[tokio::test]
async fn removing_a_foreign_entry_is_rejected() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let sub_a = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();
    let entry = h
        .services
        .subscriptions
        .add_entry(
            sub_a.id,
            Entry::new("Add-on", EntrySource::General).with_amount(Money::from_minor(100)),
        )
        .await
        .unwrap();

    let pro = ProductFixtures::pro_yearly();
    h.seed_product(&pro).await;
    let sub_b = h
        .services
        .subscriptions
        .subscribe(account.id, "pro")
        .await
        .unwrap();

    let err = h
        .services
        .subscriptions
        .remove_entry(sub_b.id, entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

// ============================================================================
// Coupon attachment
// ============================================================================

#[tokio::test]
async fn coupon_attaches_once_and_discounts_renewal() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    h.seed_coupon(&CouponFixtures::subscription_percent_off()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    let entry = h
        .services
        .subscriptions
        .attach_coupon(subscription.id, "TENOFF")
        .await
        .unwrap();
    assert_eq!(entry.source, EntrySource::Discount);
    assert_eq!(entry.percent, Some(-10));

    // attaching the same coupon again is refused
    let err = h
        .services
        .subscriptions
        .attach_coupon(subscription.id, "TENOFF")
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::IneligibleCoupon(_)));

    // the next renewal bills 1000 - 10%
    h.store.with_subscription_mut(subscription.id, |s| {
        s.period_end = Some(Utc::now() - Duration::hours(1));
    });
    h.services
        .subscriptions
        .renew(subscription.id)
        .await
        .unwrap();
    assert_eq!(
        h.reload_account(account.id).await.balance,
        Money::from_minor(1000 + 900)
    );
}

#[tokio::test]
async fn account_style_coupon_cannot_attach_to_a_subscription() {
    let h = TestHarness::new();
    h.seed_product(&ProductFixtures::basic_monthly()).await;
    h.seed_coupon(&CouponFixtures::account_credit()).await;
    let account = h.services.accounts.create_account().await.unwrap();
    let subscription = h
        .services
        .subscriptions
        .subscribe(account.id, "basic")
        .await
        .unwrap();

    let err = h
        .services
        .subscriptions
        .attach_coupon(subscription.id, "FIVEBACK")
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::IneligibleCoupon(_)));
}
