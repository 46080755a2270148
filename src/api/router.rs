use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Build the ingestion trigger and PDF retrieval router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/email-ingestion/check-emails",
            post(handlers::check_emails),
        )
        .route("/api/pdfs", get(handlers::list_pdfs))
        .route("/api/pdfs/:id", get(handlers::download_pdf))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
