//! Authentication middleware.
//!
//! Validates the `Authorization: Bearer <jwt>` header and resolves it to
//! the live user row. The row is re-read on every request so suspending
//! an account takes effect immediately, not at token expiry.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::models::user::User;
use crate::services::auth_service::AuthService;

/// Extension holding the authenticated user for downstream handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Token extraction result
#[derive(Debug)]
enum ExtractedToken<'a> {
    Bearer(&'a str),
    None,
    Invalid,
}

/// Extract the bearer token from the Authorization header
fn extract_token(request: &Request) -> ExtractedToken<'_> {
    match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(token) => ExtractedToken::Bearer(token),
            None => ExtractedToken::Invalid,
        },
        None => ExtractedToken::None,
    }
}

/// Authentication middleware function - requires a valid access token
pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_token(&request) {
        ExtractedToken::Bearer(token) => token,
        ExtractedToken::None => {
            return AppError::Authentication("Missing authorization header".into())
                .into_response();
        }
        ExtractedToken::Invalid => {
            return AppError::Authentication("Invalid authorization header format".into())
                .into_response();
        }
    };

    match auth_service.current_user(token).await {
        Ok(user) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
