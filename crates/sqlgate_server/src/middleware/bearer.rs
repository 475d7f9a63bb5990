//! Bearer-session authentication middleware.
//!
//! Resolves `Authorization: Bearer <selector:secret>` through the session
//! service and inserts the [`Principal`] and the presented token into the
//! request extensions. Any failure is a 401 with `session_invalid`.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension,
};
use sqlgate_core::{GateError, SessionService};

use crate::error::AppError;

/// The raw token the request authenticated with. Logout needs it to revoke
/// exactly this session.
#[derive(Clone)]
pub struct PresentedToken(pub String);

impl fmt::Debug for PresentedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresentedToken(<redacted>)")
    }
}

pub async fn bearer_auth(
    Extension(sessions): Extension<Arc<SessionService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let raw = bearer_token(&req).ok_or(GateError::SessionInvalid)?;
    let principal = sessions.validate(&raw).await?;

    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(PresentedToken(raw));
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
