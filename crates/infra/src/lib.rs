//! Infrastructure layer: SQL dialects, connection pools, the transaction
//! store and participant transports.

pub mod db;
pub mod dialect;
pub mod store;
pub mod transport;

pub use db::{DbError, connect};
pub use dialect::{Dialect, DialectError, XaOp, dialect_for, dialect_for_url};
pub use store::{InMemoryTransStore, SqlTransStore, StoreError, TransStore};
pub use transport::{HttpTransport, InProcessTransport, Transport};
