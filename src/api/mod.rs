//! REST API layer: route handlers, DTOs, OpenAPI document and router
//! composition.
//!
//! All service endpoints are mounted under `/api/v1`; `/health` stays at
//! the root.

pub mod doc;
pub mod dto;
pub mod handlers;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::config::PipelineRole;

/// Builds the API router for the services `role` runs.
pub fn build_router(role: PipelineRole) -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes(role))
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        router.merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", doc::ApiDoc::openapi()))
    };

    router
}

/// Builds the complete application: routes, tracing and CORS layers, and
/// the shared state.
pub fn app(state: AppState) -> Router {
    build_router(state.role)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
