//! `txweave-core`: shared building blocks for the transaction coordinator.
//!
//! This crate contains the **pure** model (no IO): identifiers, the global
//! transaction / branch records, the participant status protocol, and the
//! retry policy used by the scheduler.

pub mod error;
pub mod id;
pub mod model;
pub mod retry;
pub mod status;

pub use error::{CoreError, CoreResult};
pub use id::{Gid, branch_id};
pub use model::{
    Branch, BranchCall, BranchOp, BranchStatus, GlobalStatus, GlobalTransaction, TransProtocol,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use status::{Outcome, RawResponse, TransportError, classify};
