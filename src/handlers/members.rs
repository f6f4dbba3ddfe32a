use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::handlers::member_payload;
use crate::middleware::auth::AuthUser;
use crate::middleware::authorize::require_role;
use crate::models::Role;
use crate::pagination::{page_envelope, Slice};
use crate::store::MemberFilter;
use crate::AppState;

const READ_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Office];
const CREATE_ROLES: &[Role] = &[Role::Admin, Role::Faculty];
const DELETE_ROLES: &[Role] = &[Role::Admin];

#[derive(Debug, Deserialize)]
pub struct MemberListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_order: Option<String>,
    pub group_id: Option<i32>,
    pub user_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemberRequest {
    pub group_id: i32,
    pub user_id: i32,
}

/// GET /api/members
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<MemberListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let slice = Slice::from_query(
        query.page,
        query.limit,
        None,
        query.sort_order.as_deref(),
        &["created_at"],
        "created_at",
        true,
    );
    let filter = MemberFilter {
        group_id: query.group_id,
        user_id: query.user_id,
    };
    let (members, total) = state.store.list_members(&filter, &slice).await?;

    let mut data = Vec::with_capacity(members.len());
    for member in &members {
        data.push(member_payload(&state, member).await?);
    }

    Ok(Json(page_envelope(&data, &slice, total)))
}

/// GET /api/members/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let member = state
        .store
        .find_member(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Member not found"))?;
    let data = member_payload(&state, &member).await?;

    Ok(Json(json!({ "success": true, "data": data })))
}

/// POST /api/members
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateMemberRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, CREATE_ROLES)?;

    if state.store.find_group(payload.group_id).await?.is_none() {
        return Err(ApiError::not_found("Group not found"));
    }
    if state.store.find_user(payload.user_id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    if state
        .store
        .find_membership(payload.group_id, payload.user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(
            "User is already a member of this group",
        ));
    }

    let member = state
        .store
        .create_member(payload.group_id, payload.user_id)
        .await?;
    info!(
        "member created: user {} in group {}",
        payload.user_id, payload.group_id
    );
    let data = member_payload(&state, &member).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Member created successfully",
            "data": data,
        })),
    ))
}

/// DELETE /api/members/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, DELETE_ROLES)?;

    let member = state
        .store
        .find_member(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Member not found"))?;

    state.store.delete_member(id).await?;
    info!(
        "member deleted: user {} from group {}",
        member.user_id, member.group_id
    );

    Ok(Json(json!({
        "success": true,
        "message": "Member deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, NewGroup, NewUser, Store};
    use std::sync::Arc;

    fn admin() -> AuthUser {
        AuthUser {
            id: 1,
            email: "admin@uml.edu.ni".into(),
            role: Role::Admin,
            name: "Admin".into(),
        }
    }

    fn faculty() -> AuthUser {
        AuthUser {
            id: 2,
            email: "prof@uml.edu.ni".into(),
            role: Role::Faculty,
            name: "Prof".into(),
        }
    }

    fn test_state() -> AppState {
        AppState::new(Arc::new(MemStore::new()))
    }

    async fn seed(state: &AppState) -> (i32, i32) {
        let user = state
            .store
            .create_user(&NewUser {
                first_names: "Luis".into(),
                last_names: "Gomez".into(),
                email: "luis@uml.edu.ni".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let group = state
            .store
            .create_group(&NewGroup {
                name: "Algorithms".into(),
                creator_id: user.id,
                ..Default::default()
            })
            .await
            .unwrap();
        (group.id, user.id)
    }

    #[tokio::test]
    async fn create_checks_group_then_user() {
        let state = test_state();
        let (group_id, user_id) = seed(&state).await;

        let err = create(
            State(state.clone()),
            Extension(faculty()),
            Json(CreateMemberRequest {
                group_id: 999,
                user_id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Group not found");

        let err = create(
            State(state),
            Extension(faculty()),
            Json(CreateMemberRequest {
                group_id,
                user_id: 999,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.message(), "User not found");
    }

    #[tokio::test]
    async fn duplicate_pair_conflicts() {
        let state = test_state();
        let (group_id, user_id) = seed(&state).await;

        create(
            State(state.clone()),
            Extension(faculty()),
            Json(CreateMemberRequest { group_id, user_id }),
        )
        .await
        .unwrap();

        let err = create(
            State(state),
            Extension(faculty()),
            Json(CreateMemberRequest { group_id, user_id }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn only_admin_deletes() {
        let state = test_state();
        let (group_id, user_id) = seed(&state).await;
        let member = state.store.create_member(group_id, user_id).await.unwrap();

        let err = delete(State(state.clone()), Extension(faculty()), Path(member.id))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        delete(State(state.clone()), Extension(admin()), Path(member.id))
            .await
            .unwrap();
        assert!(state.store.find_member(member.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_newest_first_by_default() {
        let state = test_state();
        let (group_id, user_id) = seed(&state).await;
        let newer = state
            .store
            .create_user(&NewUser {
                first_names: "Ana".into(),
                last_names: "Martinez".into(),
                email: "ana@uml.edu.ni".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        state.store.create_member(group_id, user_id).await.unwrap();
        state.store.create_member(group_id, newer.id).await.unwrap();

        let Json(body) = list(
            State(state),
            Extension(admin()),
            Query(MemberListQuery {
                page: None,
                limit: None,
                sort_order: None,
                group_id: None,
                user_id: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["data"][0]["user_id"], newer.id as i64);
        assert_eq!(body["data"][1]["user_id"], user_id as i64);
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let state = test_state();
        let (group_id, user_id) = seed(&state).await;
        let other = state
            .store
            .create_user(&NewUser {
                first_names: "Ana".into(),
                last_names: "Martinez".into(),
                email: "ana@uml.edu.ni".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        state.store.create_member(group_id, user_id).await.unwrap();
        state.store.create_member(group_id, other.id).await.unwrap();

        let Json(body) = list(
            State(state),
            Extension(admin()),
            Query(MemberListQuery {
                page: None,
                limit: None,
                sort_order: None,
                group_id: None,
                user_id: Some(other.id),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["user"]["email"], "ana@uml.edu.ni");
    }
}
