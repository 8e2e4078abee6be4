use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use txweave_core::{Branch, BranchOp, BranchStatus, Gid, GlobalStatus, GlobalTransaction};

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("transaction already exists: {0}")]
    AlreadyExists(String),
    /// A conditional update lost against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable record of every global transaction and its branch operations.
///
/// All status writes are conditional so that two workers racing on the
/// same transaction cannot both advance it.
#[async_trait]
pub trait TransStore: Send + Sync {
    /// Persist a new transaction together with all of its branch records.
    async fn create_transaction(
        &self,
        trans: &GlobalTransaction,
        branches: &[Branch],
    ) -> Result<(), StoreError>;

    async fn get(&self, gid: &Gid) -> Result<Option<GlobalTransaction>, StoreError>;

    /// Branch records ordered by `(branch_index, op)`.
    async fn load_branches(&self, gid: &Gid) -> Result<Vec<Branch>, StoreError>;

    async fn update_branch_status(
        &self,
        gid: &Gid,
        branch_index: u32,
        op: BranchOp,
        status: BranchStatus,
    ) -> Result<(), StoreError>;

    /// Move the global status `from -> to`.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored status is not
    /// `from`. Entering a terminal status stamps `finished_at` and clears
    /// the lease.
    async fn transition(
        &self,
        gid: &Gid,
        from: GlobalStatus,
        to: GlobalStatus,
        rollback_reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Take the lease on one non-terminal transaction regardless of its due time.
    ///
    /// `owner` is a per-claim lease token. Returns `None` while any live
    /// lease holds the transaction, even one taken by the same worker, or
    /// when it is terminal.
    async fn try_claim(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<GlobalTransaction>, StoreError>;

    /// Lease up to `limit` non-terminal transactions whose `next_retry_at`
    /// has passed, bumping their retry counters.
    async fn claim_due_for_retry(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<GlobalTransaction>, StoreError>;

    /// Extend the lease held under `owner`.
    ///
    /// Returns `false` when the transaction is terminal or the lease has
    /// passed to another token.
    async fn renew(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// Drop `owner`'s lease and schedule the next attempt.
    async fn release(
        &self,
        gid: &Gid,
        owner: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Transactions currently in `status`, oldest first.
    async fn list_by_status(
        &self,
        status: GlobalStatus,
        limit: usize,
    ) -> Result<Vec<GlobalTransaction>, StoreError>;
}

pub(crate) fn lease_until(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now + chrono::Duration::days(1))
}
