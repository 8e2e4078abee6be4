//! XA participant helper.
//!
//! Phase 1 runs `start`, the business closure, `end` and `prepare` on one
//! pooled connection, which is closed afterwards instead of going back to
//! the pool. Phase 2 issues `commit` or `rollback` for the same xid,
//! possibly from another connection or process.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::{AnyConnection, AnyPool};
use tracing::{info, warn};

use txweave_core::{BranchCall, Gid};
use txweave_infra::{Dialect, XaOp};

use crate::error::BarrierError;

/// A participant database taking part in XA transactions.
#[derive(Debug, Clone)]
pub struct XaResource {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
}

impl XaResource {
    pub fn new(pool: AnyPool, dialect: Arc<dyn Dialect>) -> Self {
        Self { pool, dialect }
    }

    /// XA transaction id of one branch.
    pub fn xid(gid: &Gid, branch_id: &str) -> String {
        format!("{gid}-{branch_id}")
    }

    pub fn xid_for(call: &BranchCall) -> String {
        Self::xid(&call.gid, &call.branch_id)
    }

    /// Phase 1: run `busi` inside a new XA branch and prepare it.
    ///
    /// A failing closure abandons the branch before it is prepared. A
    /// redelivered prepare whose xid is already in use succeeds without
    /// preparing again.
    pub async fn prepare<F>(&self, xid: &str, busi: F) -> Result<(), BarrierError>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, anyhow::Result<()>> + Send,
    {
        let start = self.dialect.xa_sql(XaOp::Start, xid)?;
        let end = self.dialect.xa_sql(XaOp::End, xid)?;
        let prepare = self.dialect.xa_sql(XaOp::Prepare, xid)?;
        let abort = self.dialect.xa_sql(XaOp::Abort, xid)?;

        let mut conn = self.pool.acquire().await?;
        // Any early return or cancellation can leave the session inside an
        // open branch.
        conn.close_on_drop();

        if already_prepared(xid, exec(&mut conn, &start).await)? {
            return Ok(());
        }

        if let Err(err) = busi(&mut *conn).await {
            for sql in [&end, &abort] {
                if let Err(abandon) = exec(&mut conn, sql).await {
                    warn!(xid, error = %abandon, "failed to abandon xa branch");
                }
            }
            return Err(BarrierError::Business(err));
        }

        exec(&mut conn, &end).await?;
        if already_prepared(xid, exec(&mut conn, &prepare).await)? {
            return Ok(());
        }
        info!(xid, "xa branch prepared");
        Ok(())
    }

    /// Phase 2 commit. Committing an xid the database no longer knows is a no-op.
    pub async fn commit(&self, xid: &str) -> Result<(), BarrierError> {
        self.finish(XaOp::Commit, xid).await
    }

    /// Phase 2 rollback. Rolling back an unknown xid (never prepared, or
    /// already rolled back) is a no-op.
    pub async fn rollback(&self, xid: &str) -> Result<(), BarrierError> {
        self.finish(XaOp::Rollback, xid).await
    }

    async fn finish(&self, op: XaOp, xid: &str) -> Result<(), BarrierError> {
        let sql = self.dialect.xa_sql(op, xid)?;
        let mut conn = self.pool.acquire().await?;
        match exec(&mut conn, &sql).await {
            Ok(()) => {
                info!(xid, ?op, "xa branch finished");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if is_unknown_xid(db.code().as_deref(), db.message()) => {
                info!(xid, ?op, "xa branch already finished");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

async fn exec(conn: &mut AnyConnection, sql: &str) -> Result<(), sqlx::Error> {
    if sql.is_empty() {
        return Ok(());
    }
    sqlx::raw_sql(sql).execute(conn).await?;
    Ok(())
}

/// `Ok(true)` when `result` failed only because `xid` is already in use.
fn already_prepared(xid: &str, result: Result<(), sqlx::Error>) -> Result<bool, sqlx::Error> {
    match result {
        Ok(()) => Ok(false),
        Err(sqlx::Error::Database(db)) if is_duplicate_xid(db.code().as_deref(), db.message()) => {
            info!(xid, "xa branch already prepared");
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// MySQL reports `XAER_NOTA` (`XAE04`), Postgres `42704` for unknown xids.
fn is_unknown_xid(code: Option<&str>, message: &str) -> bool {
    match code {
        Some("XAE04") => true,
        Some("42704") => message.starts_with("prepared transaction with identifier"),
        _ => message.contains("XAER_NOTA"),
    }
}

/// MySQL reports `XAER_DUPID` (`XAE08`), Postgres `42710` for an xid in use.
fn is_duplicate_xid(code: Option<&str>, message: &str) -> bool {
    match code {
        Some("XAE08") => true,
        Some("42710") => message.starts_with("transaction identifier"),
        _ => message.contains("XAER_DUPID"),
    }
}
