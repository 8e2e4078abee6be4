//! Participant status protocol.
//!
//! Every branch call ends in one of three outcomes. Participants report them
//! through a structured `tx_result` field (or a bare marker body); anything
//! the coordinator cannot interpret is treated as still in progress so the
//! call is re-checked rather than guessed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field carrying the structured result in a participant's JSON body.
pub const RESULT_FIELD: &str = "tx_result";

pub const RESULT_SUCCESS: &str = "SUCCESS";
pub const RESULT_FAILURE: &str = "FAILURE";
pub const RESULT_ONGOING: &str = "ONGOING";

/// HTTP 425 Too Early: the participant asks to be called again later.
pub const STATUS_TOO_EARLY: u16 = 425;

/// Interpreted result of one branch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    /// The participant rejected the operation and rolled back its effect.
    Failure,
    /// In progress or unknown; call again after a backoff.
    Ongoing,
}

/// Raw response of a participant, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// HTTP-style status code (transports without one report 200).
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn with_result(status: u16, result: &str) -> Self {
        Self::new(status, serde_json::json!({ RESULT_FIELD: result }).to_string())
    }

    pub fn success() -> Self {
        Self::with_result(200, RESULT_SUCCESS)
    }

    pub fn failure() -> Self {
        Self::with_result(409, RESULT_FAILURE)
    }

    pub fn ongoing() -> Self {
        Self::with_result(STATUS_TOO_EARLY, RESULT_ONGOING)
    }

    pub fn is_success_status(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response from a participant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("no route for endpoint {0}")]
    UnknownEndpoint(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Read an explicit result marker from a response body.
///
/// Only a structured `tx_result` field or a body that *is* a marker counts;
/// a marker appearing somewhere inside business data does not.
pub fn body_marker(body: &str) -> Option<Outcome> {
    let trimmed = body.trim();
    match trimmed {
        RESULT_FAILURE => return Some(Outcome::Failure),
        RESULT_ONGOING => return Some(Outcome::Ongoing),
        RESULT_SUCCESS => return Some(Outcome::Success),
        _ => {}
    }

    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    match value.get(RESULT_FIELD)?.as_str()? {
        RESULT_SUCCESS => Some(Outcome::Success),
        RESULT_FAILURE => Some(Outcome::Failure),
        RESULT_ONGOING => Some(Outcome::Ongoing),
        _ => None,
    }
}

/// Classify a call result into an [`Outcome`].
pub fn classify(result: Result<&RawResponse, &TransportError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(_) => return Outcome::Ongoing,
    };

    if let Some(outcome) = body_marker(&response.body) {
        // A failing status code cannot be overridden into a success.
        if outcome == Outcome::Success && !response.is_success_status() {
            return Outcome::Failure;
        }
        return outcome;
    }

    match response.status {
        STATUS_TOO_EARLY => Outcome::Ongoing,
        s if (200..300).contains(&s) => Outcome::Success,
        _ => Outcome::Failure,
    }
}
