mod admin;
mod auth;
mod chat;
mod documents;
mod error;

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::accounts::AccountService;
use crate::chat::SessionFactory;
use crate::db::Database;
use crate::documents::DocumentLibrary;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;
use crate::usage::UsageClient;

pub use auth::UserResponse;
pub use error::{ApiError, ResultExt};

/// Everything the API routers need, built once at startup.
pub struct ApiContext {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub accounts: AccountService,
    pub sessions: Arc<SessionFactory>,
    pub library: Arc<DocumentLibrary>,
    pub usage: Arc<UsageClient>,
    pub rate_limit_config: Arc<RateLimitConfig>,
    pub no_signup: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
    })
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let auth_state = auth::AuthState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        accounts: ctx.accounts,
        no_signup: ctx.no_signup,
        rate_limit_config: ctx.rate_limit_config,
    };

    let chat_state = chat::ChatState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        sessions: ctx.sessions,
    };

    let admin_state = admin::AdminState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        usage: ctx.usage,
    };

    let documents_state = documents::DocumentsState {
        db: ctx.db,
        jwt: ctx.jwt,
        library: ctx.library,
    };

    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(auth_state))
        .nest("/chat", chat::router(chat_state))
        .nest("/admin", admin::router(admin_state))
        .nest("/documents", documents::router(documents_state))
}
