use axum::{
    http::HeaderValue,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config;
use crate::handlers;
use crate::middleware::auth::require_auth;
use crate::AppState;

/// Assemble the full router. Registration, login and the federated entry
/// point are public; everything else sits behind the bearer-token guard.
pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/federated", post(handlers::auth::federated_login));

    let protected = Router::new()
        .route(
            "/api/auth/profile",
            get(handlers::auth::profile_get).put(handlers::auth::profile_update),
        )
        .route(
            "/api/users",
            get(handlers::users::list).post(handlers::users::create),
        )
        .route(
            "/api/users/:id",
            get(handlers::users::get_by_id)
                .put(handlers::users::update)
                .delete(handlers::users::delete),
        )
        .route(
            "/api/careers",
            get(handlers::careers::list).post(handlers::careers::create),
        )
        .route(
            "/api/careers/:id",
            get(handlers::careers::get_by_id)
                .put(handlers::careers::update)
                .delete(handlers::careers::delete),
        )
        .route(
            "/api/groups",
            get(handlers::groups::list).post(handlers::groups::create),
        )
        .route(
            "/api/groups/:id",
            get(handlers::groups::get_by_id)
                .put(handlers::groups::update)
                .delete(handlers::groups::delete),
        )
        .route(
            "/api/groups/:id/members",
            get(handlers::groups::list_members).post(handlers::groups::add_member),
        )
        .route(
            "/api/groups/:id/members/:member_id",
            axum::routing::delete(handlers::groups::remove_member),
        )
        .route(
            "/api/members",
            get(handlers::members::list).post(handlers::members::create),
        )
        .route(
            "/api/members/:id",
            get(handlers::members::get_by_id).delete(handlers::members::delete),
        )
        .route(
            "/api/invitations",
            get(handlers::invitations::list).post(handlers::invitations::create),
        )
        .route(
            "/api/invitations/user/:id",
            get(handlers::invitations::list_by_user),
        )
        .route(
            "/api/invitations/:id",
            get(handlers::invitations::get_by_id)
                .put(handlers::invitations::update)
                .delete(handlers::invitations::delete),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let mut router = public.merge(protected).with_state(state);

    let security = &config::config().security;
    if security.enable_cors {
        let origins: Vec<HeaderValue> = security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router = router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }
    if config::config().api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    router
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn info() -> Json<Value> {
    Json(json!({
        "success": true,
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
