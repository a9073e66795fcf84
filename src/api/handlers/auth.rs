//! Authentication handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::user::{User, UserRole, UserStatus};
use crate::services::auth_service::AuthService;

/// Create public auth routes (no auth required)
pub fn public_router() -> Router<SharedState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
}

/// Create protected auth routes (auth required)
pub fn protected_router() -> Router<SharedState> {
    Router::new().route("/check", get(check_auth))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: User,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckAuthResponse {
    pub authenticated: bool,
    pub user: User,
}

/// Best-effort client address for the login trail. The reverse proxy in
/// front of this service sets `X-Forwarded-For`.
fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("127.0.0.1")
}

/// Login with credentials
#[utoipa::path(
    post,
    path = "/login",
    context_path = "/api/v1/auth",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials or inactive account")
    )
)]
pub async fn login(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let auth_service = AuthService::new(state.db.clone(), Arc::new(state.config.clone()));

    let (user, tokens) = auth_service
        .authenticate(&payload.username, &payload.password, client_ip(&headers))
        .await?;

    tracing::info!(user = %user.username, "login");

    Ok(Json(LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: tokens.expires_in,
        user,
    }))
}

/// Exchange a refresh token for a fresh token pair
#[utoipa::path(
    post,
    path = "/refresh",
    context_path = "/api/v1/auth",
    tag = "auth",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Tokens refreshed", body = LoginResponse),
        (status = 401, description = "Invalid or expired refresh token")
    )
)]
pub async fn refresh_token(
    State(state): State<SharedState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<LoginResponse>> {
    let auth_service = AuthService::new(state.db.clone(), Arc::new(state.config.clone()));

    let (user, tokens) = auth_service.refresh_tokens(&payload.refresh_token).await?;

    Ok(Json(LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: tokens.expires_in,
        user,
    }))
}

/// Validate the presented token and return the acting user
#[utoipa::path(
    get,
    path = "/check",
    context_path = "/api/v1/auth",
    tag = "auth",
    responses(
        (status = 200, description = "Token is valid", body = CheckAuthResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn check_auth(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<CheckAuthResponse> {
    Json(CheckAuthResponse {
        authenticated: true,
        user,
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(login, refresh_token, check_auth),
    components(schemas(
        LoginRequest,
        LoginResponse,
        RefreshTokenRequest,
        CheckAuthResponse,
        User,
        UserRole,
        UserStatus,
    ))
)]
pub struct AuthApiDoc;
