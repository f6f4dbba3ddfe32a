use axum::{extract::State, http::StatusCode, response::Json, Extension};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::auth::{self, AuthError, Claims};
use crate::config;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::models::{Role, User};
use crate::store::{NewUser, UserPatch};
use crate::validation::validate_payload;
use crate::AppState;

use super::user_payload;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100))]
    pub first_names: String,
    #[validate(length(min = 2, max = 100))]
    pub last_names: String,
    #[validate(email, length(max = 100))]
    pub email: String,
    pub role: Option<Role>,
    pub career_id: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub level: Option<i32>,
    #[validate(length(min = 8, max = 20))]
    pub mobile_phone: Option<String>,
    #[validate(length(min = 8, max = 20))]
    pub home_phone: Option<String>,
    #[validate(length(min = 10, max = 25))]
    pub id_card: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FederatedLoginRequest {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 100))]
    pub first_names: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub last_names: Option<String>,
    #[validate(email, length(max = 100))]
    pub email: Option<String>,
    pub career_id: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub level: Option<i32>,
    #[validate(length(min = 8, max = 20))]
    pub mobile_phone: Option<String>,
    #[validate(length(min = 8, max = 20))]
    pub home_phone: Option<String>,
    #[validate(length(min = 10, max = 25))]
    pub id_card: Option<String>,
}

fn mint_for(user: &User) -> Result<String, ApiError> {
    let security = &config::config().security;
    let claims = Claims::new(user, security.jwt_expiry_hours);
    auth::mint_token(&claims, &security.jwt_secret).map_err(|err| {
        tracing::error!("token minting failed: {}", err);
        ApiError::internal_server_error("Internal server error")
    })
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_payload(&payload)?;
    let email = payload.email.to_lowercase();

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::conflict("A user with this email already exists"));
    }
    if let Some(career_id) = payload.career_id {
        if state.store.find_career(career_id).await?.is_none() {
            return Err(ApiError::bad_request("Career not found"));
        }
    }

    let user = state
        .store
        .create_user(&NewUser {
            first_names: payload.first_names,
            last_names: payload.last_names,
            email,
            role: payload.role,
            career_id: payload.career_id,
            level: payload.level,
            mobile_phone: payload.mobile_phone,
            home_phone: payload.home_phone,
            id_card: payload.id_card,
        })
        .await?;

    let token = mint_for(&user)?;
    info!("user registered: {} (id {})", user.email, user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "data": { "user": user, "token": token },
        })),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_payload(&payload)?;
    let email = payload.email.to_lowercase();

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let token = mint_for(&user)?;
    info!("user logged in: {} (id {})", user.email, user.id);

    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "data": { "user": user_payload(&state, &user).await?, "token": token },
    })))
}

/// POST /api/auth/federated - exchange a verified identity-provider token
/// for a local session token, provisioning the user on first sight.
pub async fn federated_login(
    State(state): State<AppState>,
    Json(payload): Json<FederatedLoginRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_payload(&payload)?;
    let security = &config::config().security;

    let claims =
        auth::verify_federated_token(&payload.token, security).map_err(|err| match err {
            AuthError::Expired => ApiError::unauthorized("Federated token expired"),
            AuthError::FederatedKeyMissing => {
                tracing::error!("federated login attempted without a configured provider key");
                ApiError::service_unavailable("Federated login is not configured")
            }
            _ => ApiError::unauthorized("Invalid federated token"),
        })?;

    let email = claims.email.to_lowercase();

    // Domain gate comes before any lookup or mutation
    if !auth::email_in_domain(&email, &security.allowed_email_domain) {
        return Err(ApiError::forbidden(
            "Email is outside the institutional domain",
        ));
    }

    let user = match state.store.find_user_by_email(&email).await? {
        Some(existing) => {
            // Refresh stored names when the provider claim differs
            if !claims.name.is_empty() && existing.full_name() != claims.name {
                let (first_names, last_names) = auth::split_full_name(&claims.name);
                state
                    .store
                    .update_user(
                        existing.id,
                        &UserPatch {
                            first_names: Some(first_names),
                            last_names: Some(last_names),
                            ..Default::default()
                        },
                    )
                    .await?
            } else {
                existing
            }
        }
        None => {
            let (first_names, last_names) = auth::split_full_name(&claims.name);
            let user = state
                .store
                .create_user(&NewUser {
                    first_names,
                    last_names,
                    email: email.clone(),
                    role: Some(Role::Student),
                    ..Default::default()
                })
                .await?;
            info!("user provisioned from federated login: {} (id {})", user.email, user.id);
            user
        }
    };

    let token = mint_for(&user)?;

    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "data": { "user": user, "token": token },
    })))
}

/// GET /api/auth/profile
pub async fn profile_get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .store
        .find_user(auth.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": user_payload(&state, &user).await?,
    })))
}

/// PUT /api/auth/profile
pub async fn profile_update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_payload(&payload)?;

    let email = payload.email.map(|e| e.to_lowercase());
    if let Some(email) = &email {
        if let Some(other) = state.store.find_user_by_email(email).await? {
            if other.id != auth.id {
                return Err(ApiError::conflict("A user with this email already exists"));
            }
        }
    }
    if let Some(career_id) = payload.career_id {
        if state.store.find_career(career_id).await?.is_none() {
            return Err(ApiError::bad_request("Career not found"));
        }
    }

    let user = state
        .store
        .update_user(
            auth.id,
            &UserPatch {
                first_names: payload.first_names,
                last_names: payload.last_names,
                email,
                role: None,
                career_id: payload.career_id,
                level: payload.level,
                mobile_phone: payload.mobile_phone,
                home_phone: payload.home_phone,
                id_card: payload.id_card,
            },
        )
        .await?;

    info!("profile updated: {} (id {})", user.email, user.id);

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "data": user_payload(&state, &user).await?,
    })))
}
