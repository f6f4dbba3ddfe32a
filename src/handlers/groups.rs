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
use crate::handlers::member_payload;
use crate::middleware::auth::AuthUser;
use crate::middleware::authorize::require_role;
use crate::models::{GroupStatus, Role};
use crate::pagination::{page_envelope, Slice};
use crate::store::{GroupFilter, GroupPatch, MemberFilter, NewGroup};
use crate::validation::validate_payload;
use crate::AppState;

const READ_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Student, Role::Office];
const MANAGE_ROLES: &[Role] = &[Role::Admin, Role::Faculty];
const DELETE_ROLES: &[Role] = &[Role::Admin];

const SORT_FIELDS: &[&str] = &["name", "status", "created_at"];

#[derive(Debug, Deserialize)]
pub struct GroupListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub status: Option<GroupStatus>,
    pub creator_id: Option<i32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MemberListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 3, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub status: Option<GroupStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 3, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub status: Option<GroupStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i32,
}

/// GET /api/groups
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<GroupListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let slice = Slice::from_query(
        query.page,
        query.limit,
        query.sort_by.as_deref(),
        query.sort_order.as_deref(),
        SORT_FIELDS,
        "name",
        false,
    );
    let filter = GroupFilter {
        status: query.status,
        creator_id: query.creator_id,
        search: query.search,
    };
    let (groups, total) = state.store.list_groups(&filter, &slice).await?;

    Ok(Json(page_envelope(&groups, &slice, total)))
}

/// GET /api/groups/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let group = state
        .store
        .find_group(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;
    let member_count = state.store.group_member_count(id).await?;

    let mut data = serde_json::to_value(&group)
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    data["member_count"] = json!(member_count);

    Ok(Json(json!({ "success": true, "data": data })))
}

/// POST /api/groups. The authenticated caller becomes the creator.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    let group = state
        .store
        .create_group(&NewGroup {
            name: payload.name,
            creator_id: auth.id,
            description: payload.description,
            status: payload.status,
        })
        .await?;

    info!("group created: {} (id {}) by user {}", group.name, group.id, auth.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Group created successfully",
            "data": group,
        })),
    ))
}

/// PUT /api/groups/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateGroupRequest>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    if state.store.find_group(id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }

    let group = state
        .store
        .update_group(
            id,
            &GroupPatch {
                name: payload.name,
                description: payload.description,
                status: payload.status,
            },
        )
        .await?;

    info!("group updated: {} (id {})", group.name, group.id);

    Ok(Json(json!({
        "success": true,
        "message": "Group updated successfully",
        "data": group,
    })))
}

/// DELETE /api/groups/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, DELETE_ROLES)?;

    let group = state
        .store
        .find_group(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;

    if state.store.group_member_count(id).await? > 0 {
        return Err(ApiError::conflict(
            "Cannot delete group because it has members",
        ));
    }

    state.store.delete_group(id).await?;
    info!("group deleted: {} (id {})", group.name, id);

    Ok(Json(json!({
        "success": true,
        "message": "Group deleted successfully",
    })))
}

/// GET /api/groups/:id/members
pub async fn list_members(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Query(query): Query<MemberListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    if state.store.find_group(id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }

    let slice = Slice::from_query(
        query.page,
        query.limit,
        None,
        query.sort_order.as_deref(),
        &["created_at"],
        "created_at",
        false,
    );
    let filter = MemberFilter {
        group_id: Some(id),
        user_id: None,
    };
    let (members, total) = state.store.list_members(&filter, &slice).await?;

    let mut data = Vec::with_capacity(members.len());
    for member in &members {
        data.push(member_payload(&state, member).await?);
    }

    Ok(Json(page_envelope(&data, &slice, total)))
}

/// POST /api/groups/:id/members
pub async fn add_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, MANAGE_ROLES)?;

    if state.store.find_group(id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }
    if state.store.find_user(payload.user_id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    if state
        .store
        .find_membership(id, payload.user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(
            "User is already a member of this group",
        ));
    }

    let member = state.store.create_member(id, payload.user_id).await?;
    info!("member added: user {} to group {}", payload.user_id, id);
    let data = member_payload(&state, &member).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Member added successfully",
            "data": data,
        })),
    ))
}

/// DELETE /api/groups/:id/members/:member_id
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((id, member_id)): Path<(i32, i32)>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;

    let member = state
        .store
        .find_member(member_id)
        .await?
        .filter(|m| m.group_id == id)
        .ok_or_else(|| ApiError::not_found("Member not found in this group"))?;

    state.store.delete_member(member.id).await?;
    info!("member removed: user {} from group {}", member.user_id, id);

    Ok(Json(json!({
        "success": true,
        "message": "Member removed successfully",
    })))
}
