//! Persistence of global transaction and branch records.

mod in_memory;
mod sql;
mod r#trait;

pub use in_memory::InMemoryTransStore;
pub use r#trait::{StoreError, TransStore};
pub use sql::{SqlTransStore, schema_statements};
