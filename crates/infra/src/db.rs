//! Connection pools.

use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use thiserror::Error;

use crate::dialect::{Dialect, DialectError, dialect_for_url};

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Dialect(#[from] DialectError),
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Open an `AnyPool` for `url` and pick the matching dialect.
///
/// In-memory SQLite databases live only as long as their connection, so
/// the pool keeps its connections open indefinitely. Every connection to
/// such a url opens a separate database, so the pool is held to one.
pub async fn connect(
    url: &str,
    max_connections: u32,
) -> Result<(AnyPool, Arc<dyn Dialect>), DbError> {
    sqlx::any::install_default_drivers();
    let dialect = dialect_for_url(url)?;

    let mut max_connections = max_connections.max(1);
    if is_sqlite_memory(url) && max_connections > 1 {
        tracing::debug!(
            requested = max_connections,
            "in-memory sqlite pool limited to one connection"
        );
        max_connections = 1;
    }

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(url)
        .await
        .map_err(|source| DbError::Connect {
            url: redact(url),
            source,
        })?;

    tracing::info!(dialect = dialect.name(), max_connections, "database pool ready");
    Ok((pool, dialect))
}

fn is_sqlite_memory(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.starts_with("sqlite:") && (url.contains(":memory:") || url.contains("mode=memory"))
}

/// Strip credentials from a connection url before it reaches a log line.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
