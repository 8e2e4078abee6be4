//! Delivery of branch operations to participants.

mod http;
mod in_process;

use async_trait::async_trait;

use txweave_core::{BranchCall, RawResponse, TransportError};

pub use http::HttpTransport;
pub use in_process::InProcessTransport;

/// Sends one branch operation and returns the participant's raw reply.
///
/// Implementations never interpret the reply; classification into
/// success / failure / ongoing happens in `txweave_core::classify`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, call: &BranchCall) -> Result<RawResponse, TransportError>;
}
