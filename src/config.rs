//! Monitor configuration.

use std::time::Duration;

use crate::error::SyncError;

/// Configuration for a [WaitableMonitor](crate::monitor::WaitableMonitor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Name used in logs and fatal reports
    pub name: Option<String>,

    /// Upper bound of the wakeup semaphore, caps the number of simultaneous waiters
    pub semaphore_capacity: u32,

    /// How long a notifier waits on the wake event before re-checking the waiter count
    pub poll_interval: Duration,

    /// Polls in a row without a single waiter acknowledging, after which a notifier gives up
    /// on the rendezvous and terminates the process
    pub max_rendezvous_polls: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: None,
            semaphore_capacity: 0xFFFF,
            poll_interval: Duration::from_millis(1000),
            max_rendezvous_polls: 60,
        }
    }
}

impl MonitorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_semaphore_capacity(mut self, capacity: u32) -> Self {
        self.semaphore_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_rendezvous_polls(mut self, polls: u32) -> Self {
        self.max_rendezvous_polls = polls;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.semaphore_capacity == 0 {
            return Err(SyncError::InvalidConfig("semaphore capacity is zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig("poll interval is zero"));
        }
        if self.max_rendezvous_polls == 0 {
            return Err(SyncError::InvalidConfig("no rendezvous polls allowed"));
        }
        Ok(())
    }
}
