//! HTTP endpoint that relays signed transactions to the cluster.
//!
//! `POST /api/relay` with `{"transaction": [..bytes..]}` (or a base64 string)
//! answers `{"signature": ".."}` once the transaction is confirmed. Every
//! failure answers `{"error": ".."}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use outlay_core::relay::{
    RelayErrorBody, RelayResponse, TransactionPayload, JSON_BODY_REQUIRED, METHOD_NOT_ALLOWED,
    MISSING_TRANSACTION,
};
use outlay_core::{submit_with_backoff, RelayError, RetryPolicy, TransactionSubmitter};

pub const RELAY_PATH: &str = "/api/relay";

#[derive(Clone)]
pub struct RelayState {
    submitter: Arc<dyn TransactionSubmitter>,
    policy: RetryPolicy,
}

impl RelayState {
    pub fn new(submitter: Arc<dyn TransactionSubmitter>, policy: RetryPolicy) -> Self {
        Self { submitter, policy }
    }
}

/// Error response of the relay endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(RelayErrorBody { error: self.message });
        (self.status, body).into_response()
    }
}

pub fn router(state: RelayState) -> Router {
    // `any` so that other methods reach the handler and get the JSON error
    // body instead of axum's bare 405.
    Router::new().route(RELAY_PATH, any(relay)).with_state(state)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Validate the request and pull out the transaction bytes.
fn parse_transaction(method: &Method, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, ApiError> {
    if method != Method::POST {
        return Err(ApiError::bad_request(METHOD_NOT_ALLOWED));
    }
    if !is_json(headers) {
        return Err(ApiError::bad_request(JSON_BODY_REQUIRED));
    }
    let json: Value = serde_json::from_slice(body).map_err(|_| ApiError::bad_request(JSON_BODY_REQUIRED))?;
    let transaction = match json.get("transaction") {
        None | Some(Value::Null) => return Err(ApiError::bad_request(MISSING_TRANSACTION)),
        Some(v) => v.clone(),
    };
    let payload: TransactionPayload = serde_json::from_value(transaction)
        .map_err(|_| ApiError::bad_request("Transaction must be a byte array or base64 string"))?;
    Ok(payload.into_bytes()?)
}

async fn relay(
    State(state): State<RelayState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RelayResponse>, ApiError> {
    let transaction = parse_transaction(&method, &headers, &body).inspect_err(|e| {
        warn!(method = %method, error = %e.message, "Rejected relay request");
    })?;

    let signature = submit_with_backoff(state.submitter.as_ref(), &transaction, &state.policy).await?;
    info!(signature = %signature, "Relayed transaction");
    Ok(Json(RelayResponse { signature }))
}
