use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use txweave_core::Gid;
use txweave_core::status::RESULT_SUCCESS;
use txweave_engine::Engine;

use crate::app::{dto, errors};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn new_gid() -> Json<serde_json::Value> {
    Json(json!({ "gid": Gid::generate() }))
}

pub async fn submit(
    Extension(engine): Extension<Engine>,
    Json(body): Json<dto::SubmitRequest>,
) -> axum::response::Response {
    let def = match body.into_definition() {
        Ok(def) => def,
        Err(e) => return errors::engine_error_to_response(e.into()),
    };
    match engine.submit(def).await {
        Ok(gid) => accepted(&gid),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn prepare(
    Extension(engine): Extension<Engine>,
    Json(body): Json<dto::SubmitRequest>,
) -> axum::response::Response {
    let def = match body.into_definition() {
        Ok(def) => def,
        Err(e) => return errors::engine_error_to_response(e.into()),
    };
    match engine.prepare(def).await {
        Ok(gid) => accepted(&gid),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn submit_prepared(
    Extension(engine): Extension<Engine>,
    Path(gid): Path<String>,
) -> axum::response::Response {
    let gid = match parse_gid(gid) {
        Ok(gid) => gid,
        Err(resp) => return resp,
    };
    match engine.submit_prepared(&gid).await {
        Ok(()) => accepted(&gid),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn query(
    Extension(engine): Extension<Engine>,
    Path(gid): Path<String>,
) -> axum::response::Response {
    let gid = match parse_gid(gid) {
        Ok(gid) => gid,
        Err(resp) => return resp,
    };
    match engine.query(&gid).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Operator listing, e.g. `?status=aborting` to find stuck rollbacks.
pub async fn list(
    Extension(engine): Extension<Engine>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    match engine.list_by_status(query.status, query.limit).await {
        Ok(transactions) => Json(json!({ "transactions": transactions })).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

fn accepted(gid: &Gid) -> axum::response::Response {
    info!(gid = %gid, "request accepted");
    errors::with_result(StatusCode::OK, RESULT_SUCCESS, json!({ "gid": gid }))
}

fn parse_gid(raw: String) -> Result<Gid, axum::response::Response> {
    Gid::new(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_gid", e.to_string()))
}
