use super::{Dialect, DialectError, XaOp, checked_xid};

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn insert_ignore_sql(&self, table_and_values: &str, _unique_constraint: &str) -> String {
        format!("insert ignore into {table_and_values}")
    }

    fn xa_sql(&self, op: XaOp, xid: &str) -> Result<String, DialectError> {
        let xid = checked_xid(xid)?;
        let verb = match op {
            XaOp::Start => "start",
            XaOp::End => "end",
            XaOp::Prepare => "prepare",
            XaOp::Commit => "commit",
            XaOp::Rollback | XaOp::Abort => "rollback",
        };
        Ok(format!("xa {verb} '{xid}'"))
    }

    fn timestamp_add(&self, seconds: i64) -> String {
        format!("date_add(now(), interval {seconds} second)")
    }
}
