use txweave_core::{CoreError, Gid, GlobalStatus};
use txweave_infra::StoreError;

/// Engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed definition or an illegal status change.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("invalid engine config: {0}")]
    Config(String),

    #[error("transaction not found: {0}")]
    NotFound(Gid),

    #[error("transaction already exists: {0}")]
    AlreadyExists(Gid),

    #[error("transaction {gid} is {status}")]
    InvalidState { gid: Gid, status: GlobalStatus },

    /// Another worker holds the lease.
    #[error("transaction {0} is being driven by another worker")]
    Busy(Gid),

    /// The lease expired mid-pass and another worker took over.
    #[error("lost lease on transaction {0}")]
    LeaseLost(Gid),

    #[error("transaction {gid} rolled back: {reason}")]
    RolledBack { gid: Gid, reason: String },

    /// Waiting gave up; the transaction keeps running.
    #[error("transaction {gid} still {status} after waiting")]
    WaitTimeout { gid: Gid, status: GlobalStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}
