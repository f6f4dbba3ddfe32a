use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::{self, AuthError};
use crate::config;
use crate::error::ApiError;
use crate::models::Role;
use crate::AppState;

/// Authenticated caller context extracted from the bearer token and
/// re-fetched from the store. A structurally valid token for a deleted user
/// never passes.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub name: String,
}

/// Bearer-token guard applied to every route except register/login.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?;

    let claims = auth::verify_token(&token, &config::config().security.jwt_secret).map_err(
        |err| match err {
            AuthError::Expired => ApiError::unauthorized("Token expired"),
            AuthError::SecretMissing | AuthError::Signing(_) => {
                tracing::error!("token verification misconfigured: {}", err);
                ApiError::internal_server_error("Internal server error")
            }
            _ => ApiError::unauthorized("Invalid token"),
        },
    )?;

    // Re-fetch so a revoked or deleted user is rejected even with a valid token
    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let auth_user = AuthUser {
        id: user.id,
        email: user.email.clone(),
        role: user.role,
        name: user.full_name(),
    };
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| ApiError::unauthorized("Access token required"))?;

    let value = header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid authorization header"))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.to_string()),
        _ => Err(ApiError::unauthorized("Access token required")),
    }
}
