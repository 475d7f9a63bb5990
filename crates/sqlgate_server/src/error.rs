//! HTTP error mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlgate_core::GateError;

/// Wraps `GateError` so handlers can use `?`. The body is only ever
/// `{"error": <code>}`; detail goes to the log.
#[derive(Debug)]
pub struct AppError(pub GateError);

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "request failed: {}", self.0);
        } else {
            tracing::debug!(code = self.0.code(), "request rejected: {}", self.0);
        }

        let body = Json(serde_json::json!({ "error": self.0.code() }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(e: GateError) -> (StatusCode, serde_json::Value, Option<HeaderValue>) {
        let response = AppError(e).into_response();
        let status = response.status();
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).cloned();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap(), challenge)
    }

    #[tokio::test]
    async fn body_carries_only_the_code() {
        let (status, body, _) =
            render(GateError::ExecutionFailed("relation \"payroll\" does not exist".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({ "error": "execution_failed" }));
    }

    #[tokio::test]
    async fn unauthorized_carries_bearer_challenge() {
        let (status, body, challenge) = render(GateError::SessionInvalid).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "session_invalid");
        assert_eq!(challenge, Some(HeaderValue::from_static("Bearer")));
    }

    #[tokio::test]
    async fn policy_denial_is_forbidden() {
        let (status, body, challenge) =
            render(GateError::PolicyDenied("wildcard".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "policy_denied");
        assert!(challenge.is_none());
    }
}
