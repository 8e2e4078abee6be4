use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use txweave_core::status::{RESULT_FAILURE, RESULT_ONGOING, RESULT_FIELD};
use txweave_engine::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "invalid_definition", e.to_string()),
        EngineError::NotFound(gid) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("transaction {gid} not found"))
        }
        e @ EngineError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "already_exists", e.to_string()),
        e @ EngineError::InvalidState { .. } => json_error(StatusCode::CONFLICT, "invalid_state", e.to_string()),
        e @ (EngineError::Busy(_) | EngineError::LeaseLost(_)) => {
            json_error(StatusCode::CONFLICT, "busy", e.to_string())
        }
        EngineError::RolledBack { gid, reason } => with_result(
            StatusCode::CONFLICT,
            RESULT_FAILURE,
            json!({ "gid": gid, "error": "rolled_back", "message": reason }),
        ),
        EngineError::WaitTimeout { gid, status } => with_result(
            StatusCode::ACCEPTED,
            RESULT_ONGOING,
            json!({ "gid": gid, "status": status }),
        ),
        e @ EngineError::Config(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "config_error", e.to_string())
        }
        EngineError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// A JSON response carrying the participant-style `tx_result` marker.
pub fn with_result(
    status: StatusCode,
    result: &'static str,
    mut body: serde_json::Value,
) -> axum::response::Response {
    if let Some(fields) = body.as_object_mut() {
        fields.insert(RESULT_FIELD.to_string(), json!(result));
    }
    (status, axum::Json(body)).into_response()
}
