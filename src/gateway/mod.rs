//! HTTP signaling gateway
//!
//! ```text
//! /health                                               (public)
//! /api/v1/participants/{participant_id}/dataflows/...   (X-Participant-Id required)
//! /docs, /api-docs/openapi.json                         (Swagger UI)
//! ```

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{Next, from_fn},
    response::Response,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::signaling::Principal;
use state::AppState;
use types::ApiError;

/// Header carrying the authenticated participant, set by the upstream proxy
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// Injects [`Principal`] from [`PARTICIPANT_HEADER`]; 401 when absent.
async fn participant_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .headers()
        .get(PARTICIPANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Principal::new)
        .ok_or_else(|| ApiError::unauthorized("Missing X-Participant-Id header"))?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    let flow_routes = Router::new()
        .route("/start", post(handlers::start))
        .route("/provision", post(handlers::provision))
        .route("/{id}/suspend", post(handlers::suspend))
        .route("/{id}/terminate", post(handlers::terminate))
        .route("/{id}/recover", post(handlers::recover))
        .route("/{id}/complete", post(handlers::complete))
        .route("/{id}/provisioned", post(handlers::provisioned))
        .route("/{id}/state", get(handlers::get_state))
        .layer(from_fn(participant_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/participants/{participant_id}/dataflows", flow_routes)
        .fallback(handlers::not_found)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!(addr = %addr, "Signaling API listening");
    info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
