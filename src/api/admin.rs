//! Admin API endpoints.
//!
//! All endpoints require the admin flag and are read-only.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::AdminUser;
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::usage::UsageClient;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub usage: Arc<UsageClient>,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/users", get(list_users))
        .route("/user/{user_id}/details", get(user_details))
        .route("/usage-cost", get(usage_cost))
        .with_state(state)
}

/// System-wide statistics.
async fn stats(
    State(state): State<AdminState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .stats()
        .overview()
        .await
        .db_err("Failed to retrieve stats")?;

    Ok(Json(stats))
}

/// All users with activity counts.
async fn list_users(
    State(state): State<AdminState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .stats()
        .list_users()
        .await
        .db_err("Failed to list users")?;

    Ok(Json(users))
}

async fn user_details(
    State(state): State<AdminState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&user_id)?;

    let details = state
        .db
        .stats()
        .user_details(&user_id)
        .await
        .db_err("Failed to retrieve user details")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(details))
}

#[derive(Deserialize)]
struct UsageQuery {
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    7
}

async fn usage_cost(
    State(state): State<AdminState>,
    _admin: AdminUser,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.usage.report(query.days).await?;
    Ok(Json(report))
}
