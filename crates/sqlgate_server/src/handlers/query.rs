//! Statement handlers.
//!
//! POST /v1/query - run a read (`SELECT`)
//! POST /v1/exec  - run a write (`INSERT` / `UPDATE` / `DELETE`)

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, Extension, Json};
use serde::Deserialize;

use sqlgate_core::{Principal, QueryGateway, QueryResult, StatementKind};

use super::json_body;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct StatementRequest {
    pub sql: String,
}

pub async fn query(
    Extension(principal): Extension<Principal>,
    Extension(gateway): Extension<Arc<QueryGateway>>,
    payload: Result<Json<StatementRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, AppError> {
    submit(&principal, &gateway, payload, StatementKind::Read).await
}

pub async fn exec(
    Extension(principal): Extension<Principal>,
    Extension(gateway): Extension<Arc<QueryGateway>>,
    payload: Result<Json<StatementRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, AppError> {
    submit(&principal, &gateway, payload, StatementKind::Write).await
}

async fn submit(
    principal: &Principal,
    gateway: &QueryGateway,
    payload: Result<Json<StatementRequest>, JsonRejection>,
    kind: StatementKind,
) -> Result<Json<QueryResult>, AppError> {
    let body = json_body(payload)?;
    let result = gateway.submit(principal, &body.sql, kind).await?;
    Ok(Json(result))
}
