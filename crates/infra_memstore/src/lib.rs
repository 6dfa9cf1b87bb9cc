//! In-memory adapters for the billing ports
//!
//! `MemoryStore` implements every repository trait over guarded maps,
//! `MockGateway` plays the payment processor, and
//! `RecordingDispatcher` captures background tasks for explicit
//! execution. Together they let the full service stack run without any
//! external system, which is how the integration tests in this crate
//! exercise it.

pub mod dispatcher;
pub mod gateway;
pub mod store;

pub use dispatcher::RecordingDispatcher;
pub use gateway::{MockCharge, MockGateway};
pub use store::MemoryStore;
