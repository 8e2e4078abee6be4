use super::{Dialect, DialectError, XaOp, checked_xid};

/// PostgreSQL. XA maps onto prepared transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    /// `?` becomes `$1`, `$2`, ...; question marks inside quoted literals are kept.
    fn placeholder_sql(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        let mut in_literal = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn insert_ignore_sql(&self, table_and_values: &str, unique_constraint: &str) -> String {
        format!(
            "insert into {table_and_values} on conflict ON CONSTRAINT {unique_constraint} do nothing"
        )
    }

    fn xa_sql(&self, op: XaOp, xid: &str) -> Result<String, DialectError> {
        let xid = checked_xid(xid)?;
        Ok(match op {
            XaOp::Start => "begin".to_string(),
            XaOp::End => String::new(),
            XaOp::Prepare => format!("prepare transaction '{xid}'"),
            XaOp::Commit => format!("commit prepared '{xid}'"),
            XaOp::Rollback => format!("rollback prepared '{xid}'"),
            XaOp::Abort => "rollback".to_string(),
        })
    }

    fn timestamp_add(&self, seconds: i64) -> String {
        format!("current_timestamp + interval '{seconds} second'")
    }
}
