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
use crate::middleware::authorize::require_role;
use crate::models::Role;
use crate::pagination::{page_envelope, Slice};
use crate::store::{CareerFilter, CareerPatch, NewCareer};
use crate::validation::validate_payload;
use crate::AppState;

const READ_ROLES: &[Role] = &[Role::Admin, Role::Faculty, Role::Student, Role::Office];
const MANAGE_ROLES: &[Role] = &[Role::Admin];

const SORT_FIELDS: &[&str] = &["name", "code", "created_at"];

#[derive(Debug, Deserialize)]
pub struct CareerListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCareerRequest {
    #[validate(length(min = 3, max = 100))]
    pub name: String,
    #[validate(range(min = 10))]
    pub code: i64,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCareerRequest {
    #[validate(length(min = 3, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 10))]
    pub code: Option<i64>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

/// GET /api/careers
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<CareerListQuery>,
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
    let filter = CareerFilter {
        search: query.search,
    };
    let (careers, total) = state.store.list_careers(&filter, &slice).await?;

    Ok(Json(page_envelope(&careers, &slice, total)))
}

/// GET /api/careers/:id
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, READ_ROLES)?;

    let career = state
        .store
        .find_career(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Career not found"))?;
    let user_count = state.store.career_user_count(id).await?;

    let mut data = serde_json::to_value(&career)
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    data["user_count"] = json!(user_count);

    Ok(Json(json!({ "success": true, "data": data })))
}

/// POST /api/careers
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateCareerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    if state
        .store
        .find_career_by_code(payload.code)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("A career with this code already exists"));
    }

    let career = state
        .store
        .create_career(&NewCareer {
            name: payload.name,
            code: payload.code,
            description: payload.description,
        })
        .await?;

    info!("career created: {} (id {})", career.name, career.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Career created successfully",
            "data": career,
        })),
    ))
}

/// PUT /api/careers/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCareerRequest>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;
    validate_payload(&payload)?;

    let existing = state
        .store
        .find_career(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Career not found"))?;

    // Re-check the natural key only when it actually changes
    if let Some(code) = payload.code {
        if code != existing.code && state.store.find_career_by_code(code).await?.is_some() {
            return Err(ApiError::conflict("A career with this code already exists"));
        }
    }

    let career = state
        .store
        .update_career(
            id,
            &CareerPatch {
                name: payload.name,
                code: payload.code,
                description: payload.description,
            },
        )
        .await?;

    info!("career updated: {} (id {})", career.name, career.id);

    Ok(Json(json!({
        "success": true,
        "message": "Career updated successfully",
        "data": career,
    })))
}

/// DELETE /api/careers/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    require_role(&auth, MANAGE_ROLES)?;

    let career = state
        .store
        .find_career(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Career not found"))?;

    if state.store.career_user_count(id).await? > 0 {
        return Err(ApiError::conflict(
            "Cannot delete career because it has associated users",
        ));
    }

    state.store.delete_career(id).await?;
    info!("career deleted: {} (id {})", career.name, id);

    Ok(Json(json!({
        "success": true,
        "message": "Career deleted successfully",
    })))
}
