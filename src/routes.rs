// src/routes.rs

use axum::{
    Json, Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{
    docs::ApiDoc,
    handlers::{admin, exam, results},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Every `/api` route requires a bearer token; `/api/admin` also requires the admin role.
/// * Applies global middleware (Trace, CORS).
/// * Injects the shared `AppState`.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let exam_routes = Router::new()
        .route("/{exam_id}/start", post(exam::start_exam))
        .route("/{exam_id}/autosave", put(exam::autosave))
        .route("/{exam_id}/session", get(exam::session_status))
        .route("/{exam_id}/submit", post(exam::submit_exam))
        .route("/{exam_id}/leaderboard", get(exam::leaderboard));

    let result_routes = Router::new()
        .route("/", get(results::list_my_results))
        .route("/{result_id}/responses", get(results::result_responses))
        .route("/{result_id}/certificate", post(results::request_certificate));

    let admin_routes = Router::new()
        .route("/exams/{exam_id}/ranks", post(admin::recompute_ranks))
        .route(
            "/results/{result_id}/certificate",
            post(admin::issue_certificate),
        )
        // Layers run bottom-up: auth injects claims, then the role is checked
        .layer(middleware::from_fn(admin_middleware));

    let api = Router::new()
        .nest("/exams", exam_routes)
        .nest("/results", result_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
