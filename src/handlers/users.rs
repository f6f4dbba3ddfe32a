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
use crate::handlers::user_payload;
use crate::middleware::auth::AuthUser;
use crate::middleware::authorize::require_role;
use crate::models::Role;
use crate::pagination::{page_envelope, Slice};
use crate::store::{NewUser, UserFilter, UserPatch};
use crate::validation::validate_payload;
use crate::AppState;

const READ_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Office];
const MANAGE_ROLES: &[Role] = &[Role::Admin];

const SORT_FIELDS: &[&str] = &["first_names", "last_names", "email", "role", "created_at"];

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub role: Option<Role>,
    pub career_id: Option<i32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
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
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 100))]
    pub first_names: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub last_names: Option<String>,
    #[validate(email, length(max = 100))]
    pub email: Option<String>,
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

/// GET /api/users
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let slice = Slice::from_query(
        query.page,
        query.limit,
        query.sort_by.as_deref(),
        query.sort_order.as_deref(),
        SORT_FIELDS,
        "first_names",
        false,
    );
    let filter = UserFilter {
        role: query.role,
        career_id: query.career_id,
        search: query.search,
    };
    let (users, total) = state.store.list_users(&filter, &slice).await?;

    Ok(Json(page_envelope(&users, &slice, total)))
}

/// GET /api/users/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let data = user_payload(&state, &user).await?;

    Ok(Json(json!({ "success": true, "data": data })))
}

/// POST /api/users
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    let email = payload.email.trim().to_lowercase();
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::conflict("A user with this email already exists"));
    }
    if let Some(career_id) = payload.career_id {
        if state.store.find_career(career_id).await?.is_none() {
            return Err(ApiError::bad_request("Career does not exist"));
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

    info!("user created: {} (id {})", user.email, user.id);
    let data = user_payload(&state, &user).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User created successfully",
            "data": data,
        })),
    ))
}

/// PUT /api/users/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    let existing = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let email = payload.email.map(|e| e.trim().to_lowercase());
    if let Some(ref email) = email {
        if *email != existing.email && state.store.find_user_by_email(email).await?.is_some() {
            return Err(ApiError::conflict("A user with this email already exists"));
        }
    }
    if let Some(career_id) = payload.career_id {
        if state.store.find_career(career_id).await?.is_none() {
            return Err(ApiError::bad_request("Career does not exist"));
        }
    }

    let user = state
        .store
        .update_user(
            id,
            &UserPatch {
                first_names: payload.first_names,
                last_names: payload.last_names,
                email,
                role: payload.role,
                career_id: payload.career_id,
                level: payload.level,
                mobile_phone: payload.mobile_phone,
                home_phone: payload.home_phone,
                id_card: payload.id_card,
            },
        )
        .await?;

    info!("user updated: {} (id {})", user.email, user.id);
    let data = user_payload(&state, &user).await?;

    Ok(Json(json!({
        "success": true,
        "message": "User updated successfully",
        "data": data,
    })))
}

/// DELETE /api/users/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;

    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let dependents = state.store.user_dependents(id).await?;
    if dependents.any() {
        return Err(ApiError::conflict(
            "Cannot delete user because of related groups, memberships or invitations",
        ));
    }

    state.store.delete_user(id).await?;
    info!("user deleted: {} (id {})", user.email, id);

    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, Store};
    use std::sync::Arc;

    fn admin() -> AuthUser {
        AuthUser {
            id: 1,
            email: "admin@uml.edu.ni".into(),
            role: Role::Admin,
            name: "Admin".into(),
        }
    }

    fn office() -> AuthUser {
        AuthUser {
            id: 3,
            email: "office@uml.edu.ni".into(),
            role: Role::Office,
            name: "Office".into(),
        }
    }

    fn test_state() -> AppState {
        AppState::new(Arc::new(MemStore::new()))
    }

    fn new_user_request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            first_names: "Luis".into(),
            last_names: "Gomez".into(),
            email: email.into(),
            role: Some(Role::Student),
            career_id: None,
            level: Some(2),
            mobile_phone: None,
            home_phone: None,
            id_card: None,
        }
    }

    #[tokio::test]
    async fn create_normalizes_email_and_rejects_duplicates() {
        let state = test_state();
        let (status, Json(body)) = create(
            State(state.clone()),
            Extension(admin()),
            Json(new_user_request("Luis.Gomez@UML.EDU.NI")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["email"], "luis.gomez@uml.edu.ni");

        let err = create(
            State(state),
            Extension(admin()),
            Json(new_user_request("luis.gomez@uml.edu.ni")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_rejects_values_wider_than_their_columns() {
        let state = test_state();
        let mut request = new_user_request("luis@uml.edu.ni");
        request.mobile_phone = Some("+505 8888 7777 ext 12345 office".into());
        let err = create(State(state.clone()), Extension(admin()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let mut request = new_user_request("luis@uml.edu.ni");
        request.id_card = Some("001-000000-0000X-00000-00000".into());
        let err = create(State(state.clone()), Extension(admin()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(state
            .store
            .find_user_by_email("luis@uml.edu.ni")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn create_rejects_unknown_career() {
        let state = test_state();
        let mut request = new_user_request("maria@uml.edu.ni");
        request.career_id = Some(999);
        let err = create(State(state), Extension(admin()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn office_can_read_but_not_write() {
        let state = test_state();
        create(
            State(state.clone()),
            Extension(admin()),
            Json(new_user_request("luis@uml.edu.ni")),
        )
        .await
        .unwrap();

        let Json(body) = list(
            State(state.clone()),
            Extension(office()),
            Query(UserListQuery {
                page: None,
                limit: None,
                sort_by: None,
                sort_order: None,
                role: None,
                career_id: None,
                search: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["pagination"]["total"], 1);

        let err = create(
            State(state),
            Extension(office()),
            Json(new_user_request("other@uml.edu.ni")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_blocked_by_membership() {
        let state = test_state();
        let (_, Json(created)) = create(
            State(state.clone()),
            Extension(admin()),
            Json(new_user_request("luis@uml.edu.ni")),
        )
        .await
        .unwrap();
        let user_id = created["data"]["id"].as_i64().unwrap() as i32;

        let group = state
            .store
            .create_group(&crate::store::NewGroup {
                name: "Study Group".into(),
                creator_id: user_id,
                ..Default::default()
            })
            .await
            .unwrap();
        state.store.create_member(group.id, user_id).await.unwrap();

        let err = delete(State(state.clone()), Extension(admin()), Path(user_id))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(state.store.find_user(user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn filter_by_role() {
        let state = test_state();
        create(
            State(state.clone()),
            Extension(admin()),
            Json(new_user_request("luis@uml.edu.ni")),
        )
        .await
        .unwrap();
        let mut faculty_request = new_user_request("prof@uml.edu.ni");
        faculty_request.role = Some(Role::Faculty);
        create(
            State(state.clone()),
            Extension(admin()),
            Json(faculty_request),
        )
        .await
        .unwrap();

        let Json(body) = list(
            State(state),
            Extension(admin()),
            Query(UserListQuery {
                page: None,
                limit: None,
                sort_by: None,
                sort_order: None,
                role: Some(Role::Faculty),
                career_id: None,
                search: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["email"], "prof@uml.edu.ni");
    }
}
