//! Signup, login, refresh, logout and the current user.

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::accounts::{AccountService, IssuedTokens};
use crate::auth::CurrentUser;
use crate::db::{Database, User};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_signup};

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub accounts: AccountService,
    pub no_signup: bool,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let router = Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state.clone())
        .merge(login_router);

    if state.no_signup {
        router
    } else {
        let signup_router = Router::new()
            .route("/signup", post(signup))
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(
                state.rate_limit_config,
                rate_limit_signup,
            ));
        router.merge(signup_router)
    }
}

/// Public view of a user.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_email_verified: bool,
    pub is_admin: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            is_email_verified: user.is_email_verified,
            is_admin: user.is_admin,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    email: String,
    password: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    message: &'static str,
    user: UserResponse,
    access_token: String,
    refresh_token: String,
}

impl AuthResponse {
    fn new(message: &'static str, issued: IssuedTokens) -> Self {
        Self {
            message,
            user: issued.user.into(),
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct MeResponse {
    user: UserResponse,
}

async fn signup(
    State(state): State<AuthState>,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .accounts
        .signup(
            &payload.email,
            &payload.password,
            payload.display_name.as_deref(),
        )
        .await?;

    Ok(Json(AuthResponse::new("User created successfully", issued)))
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .accounts
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(AuthResponse::new("Login successful", issued)))
}

async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = state.accounts.refresh(&payload.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token }))
}

async fn logout(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.accounts.logout(&payload.refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

async fn me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(MeResponse { user: user.into() })
}
