pub mod auth;
pub mod careers;
pub mod groups;
pub mod invitations;
pub mod members;
pub mod users;

use serde_json::Value;

use crate::error::ApiError;
use crate::models::{Membership, User};
use crate::AppState;

/// User JSON with its career embedded when one is set.
pub(crate) async fn user_payload(state: &AppState, user: &User) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(user)
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    if let Some(career_id) = user.career_id {
        if let Some(career) = state.store.find_career(career_id).await? {
            value["career"] = serde_json::to_value(&career)
                .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
        }
    }
    Ok(value)
}

/// Membership JSON with the member's user record embedded.
pub(crate) async fn member_payload(
    state: &AppState,
    member: &Membership,
) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(member)
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    if let Some(user) = state.store.find_user(member.user_id).await? {
        value["user"] = serde_json::to_value(&user)
            .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    }
    Ok(value)
}
