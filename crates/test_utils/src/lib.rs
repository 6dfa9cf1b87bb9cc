//! Test Utilities Crate
//!
//! Shared infrastructure for the billing test suite:
//!
//! - `fixtures`: pre-built products, coupons, and amounts
//! - `harness`: the fully wired in-memory billing stack
//! - `init_tracing`: opt-in log output for debugging test runs

use std::sync::Once;

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::TestHarness;

static TRACING: Once = Once::new();

/// Initializes tracing output once per test binary, honoring RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
