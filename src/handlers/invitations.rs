use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::authorize::{require_role, require_sender_or_admin};
use crate::models::{Invitation, InvitationStatus, Role};
use crate::pagination::{page_envelope, Slice};
use crate::store::{InvitationFilter, NewInvitation};
use crate::validation::validate_payload;
use crate::AppState;

const READ_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Student, Role::Office];
const SEND_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Student];

const SORT_FIELDS: &[&str] = &["sent_at", "status", "group_id", "sender_id"];

#[derive(Debug, Deserialize)]
pub struct InvitationListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub status: Option<InvitationStatus>,
    pub group_id: Option<i32>,
    pub sender_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UserInvitationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<InvitationStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    pub group_id: i32,
    #[validate(email)]
    pub receiver: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInvitationRequest {
    pub status: InvitationStatus,
}

/// Invitation JSON with group and sender summaries embedded.
async fn invitation_payload(
    state: &AppState,
    invitation: &Invitation,
) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(invitation)
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    if let Some(group) = state.store.find_group(invitation.group_id).await? {
        value["group"] = json!({ "id": group.id, "name": group.name });
    }
    if let Some(sender) = state.store.find_user(invitation.sender_id).await? {
        value["sender"] = json!({
            "id": sender.id,
            "name": sender.full_name(),
            "email": sender.email,
        });
    }
    Ok(value)
}

/// GET /api/invitations
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<InvitationListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let slice = Slice::from_query(
        query.page,
        query.limit,
        query.sort_by.as_deref(),
        query.sort_order.as_deref(),
        SORT_FIELDS,
        "sent_at",
        true,
    );
    let filter = InvitationFilter {
        status: query.status,
        group_id: query.group_id,
        sender_id: query.sender_id,
    };
    let (invitations, total) = state.store.list_invitations(&filter, &slice).await?;

    Ok(Json(page_envelope(&invitations, &slice, total)))
}

/// GET /api/invitations/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let invitation = state
        .store
        .find_invitation(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;
    let data = invitation_payload(&state, &invitation).await?;

    Ok(Json(json!({ "success": true, "data": data })))
}

/// GET /api/invitations/user/:id. Invitations sent by a given user.
pub async fn list_by_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Query(query): Query<UserInvitationQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    if state.store.find_user(id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let slice = Slice::from_query(
        query.page,
        query.limit,
        None,
        None,
        SORT_FIELDS,
        "sent_at",
        true,
    );
    let filter = InvitationFilter {
        status: query.status,
        group_id: None,
        sender_id: Some(id),
    };
    let (invitations, total) = state.store.list_invitations(&filter, &slice).await?;

    Ok(Json(page_envelope(&invitations, &slice, total)))
}

/// POST /api/invitations. The authenticated caller is the sender.
///
/// Preconditions run in a fixed order so clients see stable failures:
/// missing group, then missing sender, then a duplicate pending
/// invitation, then a receiver who already belongs to the group.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, SEND_ROLES)?;
    validate_payload(&payload)?;

    let receiver = payload.receiver.trim().to_lowercase();

    if state.store.find_group(payload.group_id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }
    if state.store.find_user(auth.id).await?.is_none() {
        return Err(ApiError::not_found("Sender user not found"));
    }
    if state
        .store
        .find_pending_invitation(payload.group_id, &receiver)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(
            "A pending invitation for this receiver already exists in this group",
        ));
    }
    if let Some(receiver_user) = state.store.find_user_by_email(&receiver).await? {
        if state
            .store
            .find_membership(payload.group_id, receiver_user.id)
            .await?
            .is_some()
        {
            return Err(ApiError::conflict(
                "The receiver is already a member of this group",
            ));
        }
    }

    let invitation = state
        .store
        .create_invitation(&NewInvitation {
            group_id: payload.group_id,
            sender_id: auth.id,
            receiver,
        })
        .await?;

    info!(
        "invitation created: id {} for group {} by user {}",
        invitation.id, invitation.group_id, auth.id
    );
    let data = invitation_payload(&state, &invitation).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Invitation sent successfully",
            "data": data,
        })),
    ))
}

/// PUT /api/invitations/:id resolves the lifecycle.
///
/// Accepting also enrolls the sender in the group, atomically. Repeating
/// the same resolution is a no-op; switching a resolved invitation to a
/// different state is a conflict.
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateInvitationRequest>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, SEND_ROLES)?;

    let invitation = state
        .store
        .find_invitation(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    require_sender_or_admin(&auth, invitation.sender_id)?;

    if invitation.status == payload.status {
        let data = invitation_payload(&state, &invitation).await?;
        return Ok(Json(json!({
            "success": true,
            "message": "Invitation already in the requested status",
            "data": data,
        })));
    }
    if invitation.status.is_terminal() {
        return Err(ApiError::conflict("Invitation has already been resolved"));
    }

    let updated = match payload.status {
        InvitationStatus::Accepted => state.store.accept_invitation(id).await?,
        InvitationStatus::Rejected => {
            state
                .store
                .set_invitation_status(id, InvitationStatus::Rejected)
                .await?
        }
        InvitationStatus::Pending => {
            return Err(ApiError::bad_request(
                "An invitation cannot be moved back to pending",
            ));
        }
    };

    info!(
        "invitation {} resolved as {} by user {}",
        id,
        updated.status.as_str(),
        auth.id
    );
    let data = invitation_payload(&state, &updated).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Invitation {} successfully", updated.status.as_str()),
        "data": data,
    })))
}

/// DELETE /api/invitations/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, SEND_ROLES)?;

    let invitation = state
        .store
        .find_invitation(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    require_sender_or_admin(&auth, invitation.sender_id)?;

    state.store.delete_invitation(id).await?;
    info!("invitation deleted: id {} by user {}", id, auth.id);

    Ok(Json(json!({
        "success": true,
        "message": "Invitation deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, NewGroup, NewUser, Store};
    use std::sync::Arc;

    fn caller(id: i32, role: Role) -> AuthUser {
        AuthUser {
            id,
            email: format!("user{id}@uml.edu.ni"),
            role,
            name: format!("User {id}"),
        }
    }

    fn test_state() -> AppState {
        AppState::new(Arc::new(MemStore::new()))
    }

    async fn seed_user(state: &AppState, email: &str) -> i32 {
        state
            .store
            .create_user(&NewUser {
                first_names: "Test".into(),
                last_names: "User".into(),
                email: email.into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn seed_group(state: &AppState, creator_id: i32) -> i32 {
        state
            .store
            .create_group(&NewGroup {
                name: "Algorithms".into(),
                creator_id,
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn send(state: &AppState, sender_id: i32, group_id: i32, receiver: &str) -> i32 {
        let (_, Json(body)) = create(
            State(state.clone()),
            Extension(caller(sender_id, Role::Student)),
            Json(CreateInvitationRequest {
                group_id,
                receiver: receiver.into(),
            }),
        )
        .await
        .unwrap();
        body["data"]["id"].as_i64().unwrap() as i32
    }

    #[tokio::test]
    async fn create_checks_group_before_anything_else() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let err = create(
            State(state),
            Extension(caller(sender, Role::Student)),
            Json(CreateInvitationRequest {
                group_id: 999,
                receiver: "friend@uml.edu.ni".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Group not found");
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_conflicts() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        send(&state, sender, group, "friend@uml.edu.ni").await;

        let err = create(
            State(state),
            Extension(caller(sender, Role::Student)),
            Json(CreateInvitationRequest {
                group_id: group,
                receiver: "Friend@UML.EDU.NI".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn receiver_already_member_conflicts() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let friend = seed_user(&state, "friend@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        state.store.create_member(group, friend).await.unwrap();

        let err = create(
            State(state),
            Extension(caller(sender, Role::Student)),
            Json(CreateInvitationRequest {
                group_id: group,
                receiver: "friend@uml.edu.ni".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            err.message(),
            "The receiver is already a member of this group"
        );
    }

    #[tokio::test]
    async fn accept_enrolls_sender_and_is_idempotent() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        let id = send(&state, sender, group, "friend@uml.edu.ni").await;

        let Json(body) = update(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["data"]["status"], "accepted");
        assert!(state
            .store
            .find_membership(group, sender)
            .await
            .unwrap()
            .is_some());

        // Same resolution again: success, and still exactly one membership.
        let Json(body) = update(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["success"], true);
        let (members, total) = state
            .store
            .list_members(
                &crate::store::MemberFilter {
                    group_id: Some(group),
                    user_id: Some(sender),
                },
                &Slice::from_query(None, None, None, None, &["created_at"], "created_at", false),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn resolved_invitation_cannot_switch_state() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        let id = send(&state, sender, group, "friend@uml.edu.ni").await;

        update(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Rejected,
            }),
        )
        .await
        .unwrap();

        let err = update(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        // Rejection never creates a membership.
        assert!(state
            .store
            .find_membership(group, sender)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn only_sender_or_admin_may_resolve() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let other = seed_user(&state, "other@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        let id = send(&state, sender, group, "friend@uml.edu.ni").await;

        let err = update(
            State(state.clone()),
            Extension(caller(other, Role::Student)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        // Admins may act on any invitation.
        let admin = seed_user(&state, "admin@uml.edu.ni").await;
        update(
            State(state),
            Extension(caller(admin, Role::Admin)),
            Path(id),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_invitation_reported_before_permissions() {
        let state = test_state();
        let other = seed_user(&state, "other@uml.edu.ni").await;
        let err = update(
            State(state),
            Extension(caller(other, Role::Student)),
            Path(999),
            Json(UpdateInvitationRequest {
                status: InvitationStatus::Accepted,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_is_sender_scoped() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let other = seed_user(&state, "other@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        let id = send(&state, sender, group, "friend@uml.edu.ni").await;

        let err = delete(
            State(state.clone()),
            Extension(caller(other, Role::Student)),
            Path(id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        delete(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(id),
        )
        .await
        .unwrap();
        assert!(state.store.find_invitation(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_user_requires_existing_user() {
        let state = test_state();
        let sender = seed_user(&state, "sender@uml.edu.ni").await;
        let group = seed_group(&state, sender).await;
        send(&state, sender, group, "friend@uml.edu.ni").await;

        let err = list_by_user(
            State(state.clone()),
            Extension(caller(sender, Role::Student)),
            Path(999),
            Query(UserInvitationQuery {
                page: None,
                limit: None,
                status: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let Json(body) = list_by_user(
            State(state),
            Extension(caller(sender, Role::Student)),
            Path(sender),
            Query(UserInvitationQuery {
                page: None,
                limit: None,
                status: Some(InvitationStatus::Pending),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["pagination"]["total"], 1);
    }
}
