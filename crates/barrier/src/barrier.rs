//! Idempotency and anomaly guard for branch handlers.
//!
//! Every guarded call inserts up to two rows into the barrier table inside
//! the caller's local transaction, keyed by
//! `(gid, branch_id, op, barrier_id)`:
//!
//! 1. for undo operations (compensate / cancel / rollback), a row for the
//!    operation being undone, tagged with the undo as its reason;
//! 2. a row for the current operation.
//!
//! Inserts ignore duplicates, so the affected-row counts tell the story:
//!
//! | origin row inserted | current row inserted | meaning |
//! |---|---|---|
//! | yes | - | undo arrived before its forward op: null compensation |
//! | - | no | slot already taken: duplicate, or forward op after its undo |
//! | otherwise | | first delivery, run the business closure |
//!
//! Because the rows share the caller's transaction, a failing business
//! closure takes the barrier rows down with it.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::{debug, info, warn};

use txweave_core::{BranchCall, BranchOp, Gid, TransProtocol};
use txweave_infra::Dialect;

use crate::error::BarrierError;

/// Default barrier table name.
pub const DEFAULT_TABLE: &str = "barrier";

/// What a guarded call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// First delivery; the business closure ran.
    Executed,
    /// The slot was already taken by an earlier delivery.
    Duplicate,
    /// Undo arrived for a forward op that never ran.
    NullCompensation,
    /// Forward op arrived after its undo was recorded.
    Suspended,
}

impl BarrierOutcome {
    pub fn is_skipped(&self) -> bool {
        !matches!(self, BarrierOutcome::Executed)
    }
}

/// Location and SQL of the barrier table in a participant database.
#[derive(Debug, Clone)]
pub struct BarrierTable {
    name: String,
    dialect: Arc<dyn Dialect>,
}

impl BarrierTable {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            name: DEFAULT_TABLE.to_string(),
            dialect,
        }
    }

    /// Use a different table, optionally schema-qualified (`txweave.barrier`).
    pub fn with_name(mut self, name: impl Into<String>) -> Result<Self, BarrierError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(BarrierError::InvalidTable(name));
        }
        self.name = name;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    fn constraint(&self) -> String {
        format!("uniq_{}", self.name.replace('.', "_"))
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {name} (
    trans_type VARCHAR(45) NOT NULL,
    gid VARCHAR(128) NOT NULL,
    branch_id VARCHAR(128) NOT NULL,
    op VARCHAR(45) NOT NULL,
    barrier_id VARCHAR(45) NOT NULL,
    reason VARCHAR(45) NOT NULL,
    CONSTRAINT {constraint} UNIQUE (gid, branch_id, op, barrier_id)
)"#,
            name = self.name,
            constraint = self.constraint(),
        )
    }

    pub async fn migrate(&self, pool: &AnyPool) -> Result<(), BarrierError> {
        sqlx::query(&self.create_sql()).execute(pool).await?;
        Ok(())
    }

    fn insert_sql(&self) -> String {
        let insert = self.dialect.insert_ignore_sql(
            &format!(
                "{}(trans_type, gid, branch_id, op, barrier_id, reason) values(?, ?, ?, ?, ?, ?)",
                self.name
            ),
            &self.constraint(),
        );
        self.dialect.placeholder_sql(&insert)
    }

    fn reason_sql(&self) -> String {
        self.dialect.placeholder_sql(&format!(
            "select reason from {} where gid = ? and branch_id = ? and op = ? and barrier_id = ?",
            self.name
        ))
    }
}

/// Guard for one delivery of one branch operation.
///
/// Build a fresh barrier per incoming request. Each guarded call made
/// through the same barrier gets the next sub-barrier id (`01`, `02`, ...),
/// so one handler may guard several local steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchBarrier {
    pub trans_type: TransProtocol,
    pub gid: Gid,
    pub branch_id: String,
    pub op: BranchOp,
    barrier_id: u32,
}

impl BranchBarrier {
    pub fn new(trans_type: TransProtocol, gid: Gid, branch_id: impl Into<String>, op: BranchOp) -> Self {
        Self {
            trans_type,
            gid,
            branch_id: branch_id.into(),
            op,
            barrier_id: 0,
        }
    }

    pub fn from_call(call: &BranchCall) -> Self {
        Self::new(call.protocol, call.gid.clone(), call.branch_id.clone(), call.op)
    }

    /// Build from the `trans_type`, `gid`, `branch_id` and `op` request
    /// parameters sent with every branch call.
    pub fn from_params<'a, I>(params: I) -> Result<Self, BarrierError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (mut trans_type, mut gid, mut branch_id, mut op) = (None, None, None, None);
        for (key, value) in params {
            match key {
                "trans_type" => trans_type = Some(value),
                "gid" => gid = Some(value),
                "branch_id" => branch_id = Some(value),
                "op" => op = Some(value),
                _ => {}
            }
        }

        let branch_id = branch_id
            .filter(|b| !b.is_empty())
            .ok_or(BarrierError::MissingParam("branch_id"))?;
        Ok(Self::new(
            trans_type
                .ok_or(BarrierError::MissingParam("trans_type"))?
                .parse()?,
            Gid::new(gid.ok_or(BarrierError::MissingParam("gid"))?)?,
            branch_id,
            op.ok_or(BarrierError::MissingParam("op"))?.parse()?,
        ))
    }

    /// Number of guarded calls made through this barrier so far.
    pub fn barrier_id(&self) -> u32 {
        self.barrier_id
    }

    /// Run `busi` at most once for this operation slot, inside the caller's
    /// open transaction on `conn`.
    ///
    /// On `Err` the caller must roll the transaction back; the barrier rows
    /// are part of it.
    pub async fn call<F>(
        &mut self,
        table: &BarrierTable,
        conn: &mut AnyConnection,
        busi: F,
    ) -> Result<BarrierOutcome, BarrierError>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, anyhow::Result<()>> + Send,
    {
        self.barrier_id += 1;
        let bid = format!("{:02}", self.barrier_id);

        let origin_affected = match self.op.undoes() {
            Some(origin) => self.insert(table, conn, &bid, origin).await?,
            None => 0,
        };
        let current_affected = self.insert(table, conn, &bid, self.op).await?;

        let outcome = if self.op.undoes().is_some() && origin_affected > 0 {
            BarrierOutcome::NullCompensation
        } else if current_affected == 0 {
            match self.recorded_reason(table, conn, &bid).await?.as_deref() {
                Some(reason) if reason != self.op.as_str() => BarrierOutcome::Suspended,
                _ => BarrierOutcome::Duplicate,
            }
        } else {
            BarrierOutcome::Executed
        };

        match outcome {
            BarrierOutcome::Executed => {
                busi(conn).await.map_err(BarrierError::Business)?;
                debug!(gid = %self.gid, branch_id = %self.branch_id, op = %self.op, barrier_id = %bid, "guarded call executed");
            }
            skipped => {
                info!(
                    gid = %self.gid,
                    branch_id = %self.branch_id,
                    op = %self.op,
                    barrier_id = %bid,
                    outcome = ?skipped,
                    "guarded call skipped"
                );
            }
        }
        Ok(outcome)
    }

    /// Like [`call`](Self::call), but opens the local transaction itself and
    /// commits it on success or rolls it back on error.
    pub async fn call_with_pool<F>(
        &mut self,
        table: &BarrierTable,
        pool: &AnyPool,
        busi: F,
    ) -> Result<BarrierOutcome, BarrierError>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, anyhow::Result<()>> + Send,
    {
        let mut tx = pool.begin().await?;
        match self.call(table, &mut *tx, busi).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(gid = %self.gid, branch_id = %self.branch_id, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn insert(
        &self,
        table: &BarrierTable,
        conn: &mut AnyConnection,
        barrier_id: &str,
        op: BranchOp,
    ) -> Result<u64, BarrierError> {
        let sql = table.insert_sql();
        let result = sqlx::query(&sql)
            .bind(self.trans_type.as_str())
            .bind(self.gid.as_str())
            .bind(self.branch_id.as_str())
            .bind(op.as_str())
            .bind(barrier_id)
            .bind(self.op.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn recorded_reason(
        &self,
        table: &BarrierTable,
        conn: &mut AnyConnection,
        barrier_id: &str,
    ) -> Result<Option<String>, BarrierError> {
        let sql = table.reason_sql();
        let row = sqlx::query(&sql)
            .bind(self.gid.as_str())
            .bind(self.branch_id.as_str())
            .bind(self.op.as_str())
            .bind(barrier_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("reason")).transpose()?)
    }
}
