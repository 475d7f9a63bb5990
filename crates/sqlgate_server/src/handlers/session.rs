//! Session handlers.
//!
//! POST /v1/register   - create a principal (public)
//! POST /v1/login      - exchange email + password for a bearer token (public)
//! POST /v1/logout     - revoke the presented token
//! POST /v1/logout_all - revoke every session of the caller

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sqlgate_core::{NewPrincipal, Principal, SessionService};

use super::json_body;
use crate::error::AppError;
use crate::middleware::bearer::PresentedToken;

/// Settings the session handlers need from process configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: chrono::Duration,
    /// Role given to every self-registered principal.
    pub default_role: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

pub async fn register(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(settings): Extension<SessionSettings>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Principal>), AppError> {
    let body = json_body(payload)?;
    let new = NewPrincipal {
        display_name: body.display_name,
        email: body.email,
        database_role: settings.default_role.clone(),
    };
    let principal = sessions.register(new, &body.password).await?;
    Ok((StatusCode::CREATED, Json(principal)))
}

pub async fn login(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(settings): Extension<SessionSettings>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let body = json_body(payload)?;
    let issued = sessions
        .create(&body.email, &body.password, settings.ttl)
        .await?;
    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        principal_id: issued.principal.id,
    }))
}

pub async fn logout(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(token): Extension<PresentedToken>,
) -> Result<StatusCode, AppError> {
    sessions.revoke(&token.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<LogoutAllResponse>, AppError> {
    let revoked = sessions.revoke_all(principal.id).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}
