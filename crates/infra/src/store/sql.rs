//! SQL-backed transaction store.
//!
//! Runs on MySQL, Postgres or SQLite through `sqlx::AnyPool`. Statements are
//! written with `?` placeholders and passed through the injected
//! [`Dialect`]. Timestamps are stored as epoch milliseconds so that every
//! backend compares them the same way.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | unique violation on insert | `AlreadyExists` |
//! | row decode failure | `Decode` |
//! | anything else | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::instrument;

use txweave_core::{
    Branch, BranchOp, BranchStatus, Gid, GlobalStatus, GlobalTransaction, TransProtocol,
};

use super::r#trait::{StoreError, TransStore, lease_until};
use crate::dialect::Dialect;

const GLOBAL_COLUMNS: &str = "gid, protocol, status, wait_result, retry_count, created_at, \
     updated_at, last_retry_at, next_retry_at, lease_owner, lease_expires_at, \
     timeout_to_fail_ms, rollback_reason, finished_at";

const BRANCH_COLUMNS: &str = "gid, branch_index, op, endpoint, payload, status, updated_at";

/// DDL for the coordinator tables, idempotent on every supported backend.
pub fn schema_statements(dialect: &dyn Dialect) -> Vec<String> {
    let mysql = dialect.name() == "mysql";
    let due_index_inline = if mysql {
        ",\n    INDEX idx_trans_global_due (status, next_retry_at)"
    } else {
        ""
    };

    let mut statements = vec![
        format!(
            r#"CREATE TABLE IF NOT EXISTS trans_global (
    gid VARCHAR(128) NOT NULL PRIMARY KEY,
    protocol VARCHAR(16) NOT NULL,
    status VARCHAR(16) NOT NULL,
    wait_result BIGINT NOT NULL,
    retry_count BIGINT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    last_retry_at BIGINT NULL,
    next_retry_at BIGINT NOT NULL,
    lease_owner VARCHAR(128) NULL,
    lease_expires_at BIGINT NULL,
    timeout_to_fail_ms BIGINT NULL,
    rollback_reason TEXT NULL,
    finished_at BIGINT NULL{due_index_inline}
)"#
        ),
        r#"CREATE TABLE IF NOT EXISTS trans_branch (
    gid VARCHAR(128) NOT NULL,
    branch_index BIGINT NOT NULL,
    op VARCHAR(16) NOT NULL,
    endpoint VARCHAR(1024) NOT NULL,
    payload TEXT NOT NULL,
    status VARCHAR(16) NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (gid, branch_index, op)
)"#
        .to_string(),
    ];
    if !mysql {
        statements.push(
            "CREATE INDEX IF NOT EXISTS idx_trans_global_due ON trans_global (status, next_retry_at)"
                .to_string(),
        );
    }
    statements
}

/// Transaction store over any sqlx-supported database.
#[derive(Debug, Clone)]
pub struct SqlTransStore {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
}

impl SqlTransStore {
    pub fn new(pool: AnyPool, dialect: Arc<dyn Dialect>) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Create the coordinator tables if they do not exist.
    #[instrument(skip(self), fields(dialect = self.dialect.name()), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in schema_statements(self.dialect.as_ref()) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    fn sql(&self, text: &str) -> String {
        self.dialect.placeholder_sql(text)
    }

    async fn fetch_global(&self, gid: &str) -> Result<Option<GlobalTransaction>, StoreError> {
        let sql = self.sql(&format!(
            "SELECT {GLOBAL_COLUMNS} FROM trans_global WHERE gid = ?"
        ));
        let row = sqlx::query(&sql)
            .bind(gid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(global_from_row).transpose()
    }
}

#[async_trait]
impl TransStore for SqlTransStore {
    #[instrument(skip(self, trans, branches), fields(gid = %trans.gid, branch_count = branches.len()), err)]
    async fn create_transaction(
        &self,
        trans: &GlobalTransaction,
        branches: &[Branch],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let sql = self.sql(&format!(
            "INSERT INTO trans_global ({GLOBAL_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ));
        sqlx::query(&sql)
            .bind(trans.gid.as_str())
            .bind(trans.protocol.as_str())
            .bind(trans.status.as_str())
            .bind(i64::from(trans.wait_result))
            .bind(i64::from(trans.retry_count))
            .bind(to_millis(trans.created_at))
            .bind(to_millis(trans.updated_at))
            .bind(trans.last_retry_at.map(to_millis))
            .bind(to_millis(trans.next_retry_at))
            .bind(trans.owner.clone())
            .bind(trans.lease_expires_at.map(to_millis))
            .bind(trans.timeout_to_fail.map(duration_millis))
            .bind(trans.rollback_reason.clone())
            .bind(trans.finished_at.map(to_millis))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(trans.gid.to_string())
                } else {
                    map_sqlx_error("create_transaction", e)
                }
            })?;

        let sql = self.sql(&format!(
            "INSERT INTO trans_branch ({BRANCH_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ));
        for branch in branches {
            sqlx::query(&sql)
                .bind(branch.gid.as_str())
                .bind(i64::from(branch.branch_index))
                .bind(branch.op.as_str())
                .bind(branch.endpoint.as_str())
                .bind(branch.payload.to_string())
                .bind(branch.status.as_str())
                .bind(to_millis(branch.updated_at))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("create_branch", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(gid = %gid), err)]
    async fn get(&self, gid: &Gid) -> Result<Option<GlobalTransaction>, StoreError> {
        self.fetch_global(gid.as_str()).await
    }

    #[instrument(skip(self), fields(gid = %gid), err)]
    async fn load_branches(&self, gid: &Gid) -> Result<Vec<Branch>, StoreError> {
        let sql = self.sql(&format!(
            "SELECT {BRANCH_COLUMNS} FROM trans_branch WHERE gid = ?"
        ));
        let rows = sqlx::query(&sql)
            .bind(gid.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_branches", e))?;

        let mut branches = rows
            .iter()
            .map(branch_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // op is stored as text; order by the enum, not the string.
        branches.sort_by_key(|b| (b.branch_index, b.op));
        Ok(branches)
    }

    #[instrument(skip(self), fields(gid = %gid, op = %op, status = %status), err)]
    async fn update_branch_status(
        &self,
        gid: &Gid,
        branch_index: u32,
        op: BranchOp,
        status: BranchStatus,
    ) -> Result<(), StoreError> {
        let sql = self.sql(
            "UPDATE trans_branch SET status = ?, updated_at = ? \
             WHERE gid = ? AND branch_index = ? AND op = ?",
        );
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(to_millis(Utc::now()))
            .bind(gid.as_str())
            .bind(i64::from(branch_index))
            .bind(op.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_branch_status", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{gid}/{branch_index}/{op}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(gid = %gid, from = %from, to = %to), err)]
    async fn transition(
        &self,
        gid: &Gid,
        from: GlobalStatus,
        to: GlobalStatus,
        rollback_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = to_millis(Utc::now());
        let finished_at = to.is_terminal().then_some(now);
        let sql = if to.is_terminal() {
            "UPDATE trans_global SET status = ?, updated_at = ?, \
             rollback_reason = COALESCE(?, rollback_reason), finished_at = ?, \
             lease_owner = NULL, lease_expires_at = NULL \
             WHERE gid = ? AND status = ?"
        } else {
            "UPDATE trans_global SET status = ?, updated_at = ?, \
             rollback_reason = COALESCE(?, rollback_reason), finished_at = ? \
             WHERE gid = ? AND status = ?"
        };
        let sql = self.sql(sql);
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(now)
            .bind(rollback_reason.map(str::to_string))
            .bind(finished_at)
            .bind(gid.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;

        if result.rows_affected() == 0 {
            return match self.fetch_global(gid.as_str()).await? {
                None => Err(StoreError::NotFound(gid.to_string())),
                Some(current) => Err(StoreError::Conflict(format!(
                    "{gid} is {}, expected {from}",
                    current.status
                ))),
            };
        }
        Ok(())
    }

    #[instrument(skip(self, lease), fields(gid = %gid), err)]
    async fn try_claim(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<GlobalTransaction>, StoreError> {
        let sql = self.sql(
            "UPDATE trans_global SET lease_owner = ?, lease_expires_at = ? \
             WHERE gid = ? AND status NOT IN (?, ?) \
             AND (lease_expires_at IS NULL OR lease_expires_at <= ?)",
        );
        let result = sqlx::query(&sql)
            .bind(owner)
            .bind(to_millis(lease_until(now, lease)))
            .bind(gid.as_str())
            .bind(GlobalStatus::Failed.as_str())
            .bind(GlobalStatus::Finished.as_str())
            .bind(to_millis(now))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_claim", e))?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_global(gid.as_str()).await
    }

    #[instrument(skip(self, lease), err)]
    async fn claim_due_for_retry(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<GlobalTransaction>, StoreError> {
        let now_ms = to_millis(now);
        let [a, b, c, d] = GlobalStatus::driveable();

        let sql = self.sql(
            "SELECT gid FROM trans_global \
             WHERE status IN (?, ?, ?, ?) AND next_retry_at <= ? \
             AND (lease_expires_at IS NULL OR lease_expires_at <= ?) \
             ORDER BY next_retry_at LIMIT ?",
        );
        let candidates = sqlx::query(&sql)
            .bind(a.as_str())
            .bind(b.as_str())
            .bind(c.as_str())
            .bind(d.as_str())
            .bind(now_ms)
            .bind(now_ms)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_due_for_retry", e))?;

        // Each candidate is taken with its own conditional update; losing the
        // race to another worker simply skips it.
        let sql = self.sql(
            "UPDATE trans_global SET lease_owner = ?, lease_expires_at = ?, \
             retry_count = retry_count + 1, last_retry_at = ?, updated_at = ? \
             WHERE gid = ? AND status IN (?, ?, ?, ?) AND next_retry_at <= ? \
             AND (lease_expires_at IS NULL OR lease_expires_at <= ?)",
        );
        let lease_expires_at = to_millis(lease_until(now, lease));
        let mut claimed = Vec::with_capacity(candidates.len());
        for row in &candidates {
            let gid: String = row
                .try_get("gid")
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            let result = sqlx::query(&sql)
                .bind(owner)
                .bind(lease_expires_at)
                .bind(now_ms)
                .bind(now_ms)
                .bind(gid.as_str())
                .bind(a.as_str())
                .bind(b.as_str())
                .bind(c.as_str())
                .bind(d.as_str())
                .bind(now_ms)
                .bind(now_ms)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("claim_due_for_retry", e))?;
            if result.rows_affected() == 1 {
                if let Some(trans) = self.fetch_global(&gid).await? {
                    claimed.push(trans);
                }
            }
        }
        Ok(claimed)
    }

    #[instrument(skip(self, lease), fields(gid = %gid), err)]
    async fn renew(
        &self,
        gid: &Gid,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let sql = self.sql(
            "UPDATE trans_global SET lease_expires_at = ? \
             WHERE gid = ? AND lease_owner = ? AND status NOT IN (?, ?)",
        );
        let result = sqlx::query(&sql)
            .bind(to_millis(lease_until(now, lease)))
            .bind(gid.as_str())
            .bind(owner)
            .bind(GlobalStatus::Failed.as_str())
            .bind(GlobalStatus::Finished.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("renew", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(gid = %gid), err)]
    async fn release(
        &self,
        gid: &Gid,
        owner: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = self.sql(
            "UPDATE trans_global SET lease_owner = NULL, lease_expires_at = NULL, next_retry_at = ? \
             WHERE gid = ? AND lease_owner = ?",
        );
        let result = sqlx::query(&sql)
            .bind(to_millis(next_retry_at))
            .bind(gid.as_str())
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("release", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("{gid} is not leased by {owner}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(status = %status), err)]
    async fn list_by_status(
        &self,
        status: GlobalStatus,
        limit: usize,
    ) -> Result<Vec<GlobalTransaction>, StoreError> {
        let sql = self.sql(&format!(
            "SELECT {GLOBAL_COLUMNS} FROM trans_global WHERE status = ? \
             ORDER BY created_at LIMIT ?"
        ));
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_by_status", e))?;
        rows.iter().map(global_from_row).collect()
    }
}

fn global_from_row(row: &AnyRow) -> Result<GlobalTransaction, StoreError> {
    let gid: String = get(row, "gid")?;
    let protocol: String = get(row, "protocol")?;
    let status: String = get(row, "status")?;
    let wait_result: i64 = get(row, "wait_result")?;
    let retry_count: i64 = get(row, "retry_count")?;
    let timeout_ms: Option<i64> = get(row, "timeout_to_fail_ms")?;

    Ok(GlobalTransaction {
        gid: Gid::new(gid).map_err(decode)?,
        protocol: protocol.parse::<TransProtocol>().map_err(decode)?,
        status: status.parse::<GlobalStatus>().map_err(decode)?,
        wait_result: wait_result != 0,
        retry_count: u32::try_from(retry_count).map_err(decode)?,
        created_at: from_millis(get(row, "created_at")?)?,
        updated_at: from_millis(get(row, "updated_at")?)?,
        last_retry_at: get::<Option<i64>>(row, "last_retry_at")?
            .map(from_millis)
            .transpose()?,
        next_retry_at: from_millis(get(row, "next_retry_at")?)?,
        owner: get(row, "lease_owner")?,
        lease_expires_at: get::<Option<i64>>(row, "lease_expires_at")?
            .map(from_millis)
            .transpose()?,
        timeout_to_fail: timeout_ms
            .map(|ms| u64::try_from(ms).map(Duration::from_millis).map_err(decode))
            .transpose()?,
        rollback_reason: get(row, "rollback_reason")?,
        finished_at: get::<Option<i64>>(row, "finished_at")?
            .map(from_millis)
            .transpose()?,
    })
}

fn branch_from_row(row: &AnyRow) -> Result<Branch, StoreError> {
    let gid: String = get(row, "gid")?;
    let branch_index: i64 = get(row, "branch_index")?;
    let op: String = get(row, "op")?;
    let payload: String = get(row, "payload")?;
    let status: String = get(row, "status")?;

    Ok(Branch {
        gid: Gid::new(gid).map_err(decode)?,
        branch_index: u32::try_from(branch_index).map_err(decode)?,
        op: op.parse::<BranchOp>().map_err(decode)?,
        endpoint: get(row, "endpoint")?,
        payload: serde_json::from_str(&payload).map_err(decode)?,
        status: status.parse::<BranchStatus>().map_err(decode)?,
        updated_at: from_millis(get(row, "updated_at")?)?,
    })
}

fn get<T>(row: &AnyRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn decode(err: impl std::fmt::Display) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {ms}")))
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;
    use serde_json::json;

    async fn store() -> SqlTransStore {
        let (pool, dialect) = connect("sqlite::memory:", 1).await.unwrap();
        let store = SqlTransStore::new(pool, dialect);
        store.migrate().await.unwrap();
        store
    }

    fn tcc(gid: &Gid) -> (GlobalTransaction, Vec<Branch>) {
        let mut trans = GlobalTransaction::new(gid.clone(), TransProtocol::Tcc, GlobalStatus::Submitted);
        trans.wait_result = true;
        trans.timeout_to_fail = Some(Duration::from_secs(90));
        let mut branches = Vec::new();
        for idx in 0..2 {
            for op in [BranchOp::Cancel, BranchOp::Confirm, BranchOp::Try] {
                branches.push(Branch::new(
                    gid.clone(),
                    idx,
                    op,
                    format!("http://svc/{idx}/{op}"),
                    json!({"amount": 30}),
                ));
            }
        }
        (trans, branches)
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = store().await;
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn round_trips_transactions_and_branches() {
        let store = store().await;
        let gid = Gid::new("sql-1").unwrap();
        let (trans, branches) = tcc(&gid);
        store.create_transaction(&trans, &branches).await.unwrap();

        let loaded = store.get(&gid).await.unwrap().unwrap();
        assert_eq!(loaded.protocol, TransProtocol::Tcc);
        assert!(loaded.wait_result);
        assert_eq!(loaded.timeout_to_fail, Some(Duration::from_secs(90)));
        assert_eq!(loaded.created_at.timestamp_millis(), trans.created_at.timestamp_millis());

        let loaded = store.load_branches(&gid).await.unwrap();
        let order: Vec<_> = loaded.iter().map(|b| (b.branch_index, b.op)).collect();
        assert_eq!(
            order,
            vec![
                (0, BranchOp::Try),
                (0, BranchOp::Confirm),
                (0, BranchOp::Cancel),
                (1, BranchOp::Try),
                (1, BranchOp::Confirm),
                (1, BranchOp::Cancel),
            ]
        );
        assert_eq!(loaded[0].payload, json!({"amount": 30}));

        assert!(matches!(
            store.create_transaction(&trans, &branches).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(store.get(&Gid::new("missing").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn branch_and_global_updates() {
        let store = store().await;
        let gid = Gid::new("sql-2").unwrap();
        let (trans, branches) = tcc(&gid);
        store.create_transaction(&trans, &branches).await.unwrap();

        store
            .update_branch_status(&gid, 1, BranchOp::Try, BranchStatus::Ongoing)
            .await
            .unwrap();
        let loaded = store.load_branches(&gid).await.unwrap();
        assert_eq!(loaded[3].status, BranchStatus::Ongoing);
        assert!(matches!(
            store
                .update_branch_status(&gid, 7, BranchOp::Try, BranchStatus::Succeeded)
                .await,
            Err(StoreError::NotFound(_))
        ));

        store
            .transition(&gid, GlobalStatus::Submitted, GlobalStatus::Aborting, Some("try failed"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .transition(&gid, GlobalStatus::Submitted, GlobalStatus::Succeeding, None)
                .await,
            Err(StoreError::Conflict(_))
        ));
        store
            .transition(&gid, GlobalStatus::Aborting, GlobalStatus::Failed, None)
            .await
            .unwrap();

        let loaded = store.get(&gid).await.unwrap().unwrap();
        assert_eq!(loaded.status, GlobalStatus::Failed);
        assert_eq!(loaded.rollback_reason.as_deref(), Some("try failed"));
        assert!(loaded.finished_at.is_some());
        assert_eq!(
            store.list_by_status(GlobalStatus::Failed, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn claims_respect_due_time_and_leases() {
        let store = store().await;
        let gid = Gid::new("sql-3").unwrap();
        let (trans, branches) = tcc(&gid);
        store.create_transaction(&trans, &branches).await.unwrap();
        let now = Utc::now();
        let lease = Duration::from_secs(10);

        let claimed = store.claim_due_for_retry("w1", now, 5, lease).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retry_count, 1);
        assert_eq!(claimed[0].owner.as_deref(), Some("w1"));

        assert!(store.claim_due_for_retry("w2", now, 5, lease).await.unwrap().is_empty());
        assert!(store.try_claim(&gid, "w2", now, lease).await.unwrap().is_none());
        assert!(store.try_claim(&gid, "w1", now, lease).await.unwrap().is_none());
        assert!(store.renew(&gid, "w1", now, lease).await.unwrap());
        assert!(!store.renew(&gid, "w2", now, lease).await.unwrap());

        let next = now + chrono::Duration::seconds(3);
        store.release(&gid, "w1", next).await.unwrap();
        assert!(matches!(
            store.release(&gid, "w1", next).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.claim_due_for_retry("w2", now, 5, lease).await.unwrap().is_empty());
        let claimed = store.claim_due_for_retry("w2", next, 5, lease).await.unwrap();
        assert_eq!(claimed[0].retry_count, 2);
    }

    #[tokio::test]
    async fn renew_follows_the_lease_token_not_the_worker() {
        let store = store().await;
        let gid = Gid::new("sql-4").unwrap();
        let (trans, branches) = tcc(&gid);
        store.create_transaction(&trans, &branches).await.unwrap();
        let now = Utc::now();
        let lease = Duration::from_millis(100);

        store.try_claim(&gid, "w1/a", now, lease).await.unwrap().unwrap();
        let lapsed = now + chrono::Duration::seconds(1);
        let taken = store.try_claim(&gid, "w1/b", lapsed, lease).await.unwrap().unwrap();
        assert_eq!(taken.owner.as_deref(), Some("w1/b"));

        assert!(!store.renew(&gid, "w1/a", lapsed, lease).await.unwrap());
        assert!(store.renew(&gid, "w1/b", lapsed, lease).await.unwrap());

        store
            .transition(&gid, GlobalStatus::Submitted, GlobalStatus::Finished, None)
            .await
            .unwrap();
        assert!(!store.renew(&gid, "w1/b", lapsed, lease).await.unwrap());
    }
}
