use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    let widget_routes = Router::new()
        .nest("/hints", hint_routes())
        .nest("/chat", chat_routes())
        .route("/mastery", get(handlers::mastery::get_mastery))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", widget_routes.layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn hint_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::hints::request_hint))
        .route(
            "/{test_id}/{question_id}",
            get(handlers::hints::get_hint).delete(handlers::hints::cancel_hint),
        )
        .route(
            "/{test_id}/{question_id}/stream",
            get(handlers::sse::hint_stream),
        )
}

fn chat_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::chat::send_message))
        .route(
            "/{test_id}/{question_id}",
            get(handlers::chat::get_chat).delete(handlers::chat::cancel_chat),
        )
        .route(
            "/{test_id}/{question_id}/history",
            get(handlers::chat::get_history),
        )
        .route(
            "/{test_id}/{question_id}/stream",
            get(handlers::sse::chat_stream),
        )
}
