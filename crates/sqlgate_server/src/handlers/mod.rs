pub mod health;
pub mod query;
pub mod session;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use sqlgate_core::GateError;

/// Body-parse failures use the same `{"error": ...}` shape as every other
/// failure instead of axum's plain-text rejection.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GateError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| GateError::InvalidInput(e.body_text()))
}
