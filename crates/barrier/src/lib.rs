//! Participant-side guards.
//!
//! A participant wraps each branch handler's local database transaction in
//! a [`BranchBarrier`] so that repeated, reordered or orphaned deliveries
//! from the coordinator apply their business effect at most once. XA
//! participants use [`XaResource`] instead.

pub mod barrier;
pub mod error;
pub mod xa;

pub use barrier::{BarrierOutcome, BarrierTable, BranchBarrier, DEFAULT_TABLE};
pub use error::BarrierError;
pub use xa::XaResource;
