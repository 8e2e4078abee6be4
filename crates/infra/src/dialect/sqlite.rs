use super::{Dialect, DialectError, XaOp};

/// SQLite. Used for embedded participants and tests; it has no XA support.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn insert_ignore_sql(&self, table_and_values: &str, _unique_constraint: &str) -> String {
        format!("insert or ignore into {table_and_values}")
    }

    fn xa_sql(&self, _op: XaOp, _xid: &str) -> Result<String, DialectError> {
        Err(DialectError::Unsupported {
            dialect: "sqlite",
            feature: "xa transactions",
        })
    }

    fn timestamp_add(&self, seconds: i64) -> String {
        format!("datetime('now', '{seconds:+} seconds')")
    }
}
