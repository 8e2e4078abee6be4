//! Engine and scheduler configuration.

use std::time::Duration;

use txweave_core::RetryPolicy;

use crate::error::EngineError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff between passes over a non-terminal transaction.
    pub retry: RetryPolicy,
    /// Per-call timeout; a call exceeding it counts as ongoing.
    pub request_timeout: Duration,
    /// How long a claimed transaction stays reserved for one worker.
    ///
    /// Renewed before every branch call, so it must outlast `request_timeout`.
    pub lease: Duration,
    /// Applied to definitions that do not set their own.
    pub default_timeout_to_fail: Option<Duration>,
    /// Prepared transactions without a `timeout_to_fail` expire after this.
    pub prepared_timeout: Duration,
    /// Upper bound on how long `wait_result` submissions block.
    pub wait_timeout: Duration,
    pub wait_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            lease: Duration::from_secs(30),
            default_timeout_to_fail: None,
            prepared_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_secs(30),
            wait_poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_default_timeout_to_fail(mut self, timeout: Duration) -> Self {
        self.default_timeout_to_fail = Some(timeout);
        self
    }

    pub fn with_prepared_timeout(mut self, timeout: Duration) -> Self {
        self.prepared_timeout = timeout;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Reject settings under which one branch call can outlive its lease.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.request_timeout.is_zero() {
            return Err(EngineError::Config("request_timeout must be positive".into()));
        }
        if self.lease <= self.request_timeout {
            return Err(EngineError::Config(format!(
                "lease ({}ms) must be longer than request_timeout ({}ms)",
                self.lease.as_millis(),
                self.request_timeout.as_millis()
            )));
        }
        Ok(())
    }
}

/// Retry scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll for due transactions
    pub poll_interval: Duration,
    /// Transactions claimed per poll
    pub batch_size: usize,
    /// Transactions driven at the same time
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 64,
            max_concurrent: 16,
            name: "txweave-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}
