//! Recording task dispatcher
//!
//! Captures scheduled tasks instead of running them, letting tests
//! drain and execute the queue explicitly. Duplicate deliveries can be
//! simulated by running a drained task twice; handlers must tolerate
//! that.

use std::sync::Mutex;

use async_trait::async_trait;
use core_kernel::PortError;

use domain_billing::ports::{BillingTask, TaskDispatcher};

/// Dispatcher that appends every task to an in-memory queue
#[derive(Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<BillingTask>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything scheduled so far
    pub fn tasks(&self) -> Vec<BillingTask> {
        self.tasks.lock().unwrap().clone()
    }

    /// Removes and returns all queued tasks
    pub fn drain(&self) -> Vec<BillingTask> {
        self.tasks.lock().unwrap().drain(..).collect()
    }

    /// Whether a matching task has been scheduled
    pub fn was_scheduled(&self, task: &BillingTask) -> bool {
        self.tasks.lock().unwrap().iter().any(|t| t == task)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }
}

impl core_kernel::DomainPort for RecordingDispatcher {}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn schedule(&self, task: BillingTask) -> Result<(), PortError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}
