use txweave_core::CoreError;
use txweave_infra::DialectError;

/// Barrier error.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    #[error("missing request parameter: {0}")]
    MissingParam(&'static str),

    #[error(transparent)]
    InvalidParam(#[from] CoreError),

    #[error("invalid barrier table name: {0}")]
    InvalidTable(String),

    #[error(transparent)]
    Dialect(#[from] DialectError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The guarded business closure failed; its local transaction was rolled back.
    #[error("business operation failed: {0:#}")]
    Business(anyhow::Error),
}
