//! SQL dialect adapters.
//!
//! Statements inside the workspace are written once, with `?` placeholders
//! and portable SQL. The handful of constructs that differ between backends
//! are produced by a [`Dialect`] instance, injected into whatever issues the
//! SQL (store, barrier, XA resource).

mod mysql;
mod postgres;
mod sqlite;

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// XA transaction-control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaOp {
    Start,
    End,
    Prepare,
    Commit,
    Rollback,
    /// Abandon an active branch that was never prepared (issued after `End`).
    Abort,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialectError {
    #[error("unknown database dialect: {0}")]
    Unknown(String),

    #[error("{dialect} does not support {feature}")]
    Unsupported {
        dialect: &'static str,
        feature: &'static str,
    },

    #[error("invalid xa transaction id: {0}")]
    InvalidXid(String),
}

/// Backend-specific SQL fragments.
pub trait Dialect: Send + Sync + Debug {
    /// Short backend name (`mysql`, `postgres`, `sqlite`).
    fn name(&self) -> &'static str;

    /// Rewrite `?` placeholders into the backend's parameter syntax.
    fn placeholder_sql(&self, sql: &str) -> String {
        sql.to_string()
    }

    /// Build an insert that silently skips rows violating `unique_constraint`.
    ///
    /// `table_and_values` is everything after `insert into`, e.g.
    /// `barrier(gid, op) values(?, ?)`.
    fn insert_ignore_sql(&self, table_and_values: &str, unique_constraint: &str) -> String;

    /// Statement text for an XA operation on `xid`.
    ///
    /// An empty string means the backend needs no statement for `op`.
    fn xa_sql(&self, op: XaOp, xid: &str) -> Result<String, DialectError>;

    /// SQL expression for "now plus `seconds`".
    fn timestamp_add(&self, seconds: i64) -> String;
}

/// Look up a dialect by name.
pub fn dialect_for(name: &str) -> Result<Arc<dyn Dialect>, DialectError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mysql" | "mariadb" => Ok(Arc::new(MysqlDialect)),
        "postgres" | "postgresql" | "pg" => Ok(Arc::new(PostgresDialect)),
        "sqlite" => Ok(Arc::new(SqliteDialect)),
        other => Err(DialectError::Unknown(other.to_string())),
    }
}

/// Pick the dialect from a connection url scheme (`postgres://...`).
pub fn dialect_for_url(url: &str) -> Result<Arc<dyn Dialect>, DialectError> {
    let scheme = url
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| DialectError::Unknown(url.to_string()))?;
    dialect_for(scheme)
}

/// XA ids are embedded as quoted literals.
pub(crate) fn checked_xid(xid: &str) -> Result<&str, DialectError> {
    if xid.is_empty() || xid.contains(['\'', '\\']) || xid.len() > 128 {
        return Err(DialectError::InvalidXid(xid.to_string()));
    }
    Ok(xid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_url() {
        assert_eq!(dialect_for("MySQL").unwrap().name(), "mysql");
        assert_eq!(dialect_for("postgresql").unwrap().name(), "postgres");
        assert_eq!(dialect_for_url("sqlite::memory:").unwrap().name(), "sqlite");
        assert_eq!(
            dialect_for_url("postgres://u:p@localhost/db").unwrap().name(),
            "postgres"
        );
        assert_eq!(
            dialect_for("oracle").unwrap_err(),
            DialectError::Unknown("oracle".into())
        );
        assert!(dialect_for_url("no-scheme").is_err());
    }

    #[test]
    fn mysql_fragments() {
        let d = dialect_for("mysql").unwrap();
        assert_eq!(d.placeholder_sql("? ?"), "? ?");
        assert_eq!(d.xa_sql(XaOp::Start, "xa1").unwrap(), "xa start 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Prepare, "xa1").unwrap(), "xa prepare 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Commit, "xa1").unwrap(), "xa commit 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Abort, "xa1").unwrap(), "xa rollback 'xa1'");
        assert_eq!(d.timestamp_add(1000), "date_add(now(), interval 1000 second)");
        assert_eq!(
            d.insert_ignore_sql("a(f) values(?)", "c"),
            "insert ignore into a(f) values(?)"
        );
    }

    #[test]
    fn postgres_fragments() {
        let d = dialect_for("postgres").unwrap();
        assert_eq!(d.placeholder_sql("? ?"), "$1 $2");
        assert_eq!(d.xa_sql(XaOp::Start, "xa1").unwrap(), "begin");
        assert_eq!(d.xa_sql(XaOp::End, "xa1").unwrap(), "");
        assert_eq!(d.xa_sql(XaOp::Prepare, "xa1").unwrap(), "prepare transaction 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Commit, "xa1").unwrap(), "commit prepared 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Rollback, "xa1").unwrap(), "rollback prepared 'xa1'");
        assert_eq!(d.xa_sql(XaOp::Abort, "xa1").unwrap(), "rollback");
        assert_eq!(d.timestamp_add(1000), "current_timestamp + interval '1000 second'");
        assert_eq!(
            d.insert_ignore_sql("a(f) values(?)", "c"),
            "insert into a(f) values(?) on conflict ON CONSTRAINT c do nothing"
        );
    }

    #[test]
    fn sqlite_fragments() {
        let d = dialect_for("sqlite").unwrap();
        assert_eq!(d.placeholder_sql("? ?"), "? ?");
        assert_eq!(
            d.insert_ignore_sql("a(f) values(?)", "c"),
            "insert or ignore into a(f) values(?)"
        );
        assert_eq!(d.timestamp_add(30), "datetime('now', '+30 seconds')");
        assert!(matches!(
            d.xa_sql(XaOp::Prepare, "xa1"),
            Err(DialectError::Unsupported { .. })
        ));
    }

    #[test]
    fn xids_with_quotes_are_rejected() {
        let d = dialect_for("mysql").unwrap();
        assert!(matches!(
            d.xa_sql(XaOp::Commit, "x'; drop table t; --"),
            Err(DialectError::InvalidXid(_))
        ));
    }
}
