//! Signaling HTTP handlers
//!
//! Every flow route runs the ownership check before touching the service.
//! The principal comes from [`super::participant_middleware`].

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use utoipa::ToSchema;

use super::state::AppState;
use super::types::{ApiError, ApiResponse, ApiResult, ok};
use crate::data_flow::DataFlowState;
use crate::signaling::{
    DataFlowProvisionMessage, DataFlowResponseMessage, DataFlowStartMessage,
    DataFlowStatusMessage, DataFlowSuspendMessage, DataFlowTerminationMessage, Envelope,
    Principal, ResourceContext,
};

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "0.1.0")]
    pub version: String,
    pub runtime_id: String,
    /// "memory" or "postgres"
    pub store: String,
    pub uptime_secs: u64,
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {...}}
/// - Store unreachable: 503 Service Unavailable
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let store = match &state.pg_db {
        Some(db) => {
            if let Err(e) = db.health_check().await {
                tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
                return ApiError::service_unavailable("unavailable").into_err();
            }
            "postgres"
        }
        None => "memory",
    };

    ok(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        runtime_id: state.service.runtime_id().to_string(),
        store: store.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn authorize(
    state: &AppState,
    principal: &Principal,
    resource: ResourceContext,
) -> Result<(), ApiError> {
    state
        .authz
        .authorize(principal, &resource)
        .await
        .map_err(ApiError::from)
}

fn status(id: String, state: DataFlowState) -> Envelope<DataFlowStatusMessage> {
    Envelope::new(DataFlowStatusMessage {
        data_flow_id: id,
        state,
    })
}

/// Start a data flow
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/start",
    params(("participant_id" = String, Path, description = "Owning participant")),
    request_body(content = DataFlowStartMessage, description = "JSON-LD DataFlowStartMessage", content_type = "application/json"),
    responses(
        (status = 200, description = "Started, or provisioning pending", body = DataFlowResponseMessage),
        (status = 400, description = "Invalid start message"),
        (status = 401, description = "Missing participant identity"),
        (status = 403, description = "Not the owning participant"),
        (status = 409, description = "Flow leased elsewhere or in a terminal state")
    ),
    tag = "Signaling"
)]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(participant_id): Path<String>,
    Json(envelope): Json<Envelope<DataFlowStartMessage>>,
) -> ApiResult<Envelope<DataFlowResponseMessage>> {
    let msg = envelope
        .into_message()
        .map_err(|f| ApiError::bad_request(f.reason))?;
    if msg.participant_id != participant_id {
        return ApiError::bad_request("participantId does not match the request path").into_err();
    }
    authorize(
        &state,
        &principal,
        ResourceContext::flow(&participant_id, &msg.process_id),
    )
    .await?;

    let response = state.service.start(&msg).await?;
    ok(Envelope::new(response))
}

/// Provision resources for a data flow, then start it
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/provision",
    params(("participant_id" = String, Path, description = "Owning participant")),
    request_body(content = DataFlowProvisionMessage, description = "JSON-LD DataFlowProvisionMessage", content_type = "application/json"),
    responses(
        (status = 200, description = "Provisioned and started, or pending", body = DataFlowResponseMessage),
        (status = 400, description = "Invalid provision message"),
        (status = 403, description = "Not the owning participant"),
        (status = 409, description = "Flow leased elsewhere or in a terminal state")
    ),
    tag = "Signaling"
)]
pub async fn provision(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(participant_id): Path<String>,
    Json(envelope): Json<Envelope<DataFlowProvisionMessage>>,
) -> ApiResult<Envelope<DataFlowResponseMessage>> {
    let msg = envelope
        .into_message()
        .map_err(|f| ApiError::bad_request(f.reason))?;
    if msg.request.participant_id != participant_id {
        return ApiError::bad_request("participantId does not match the request path").into_err();
    }
    authorize(
        &state,
        &principal,
        ResourceContext::flow(&participant_id, &msg.request.process_id),
    )
    .await?;

    let response = state.service.provision(&msg).await?;
    ok(Envelope::new(response))
}

/// Suspend a started data flow
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/suspend",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    request_body(content = DataFlowSuspendMessage, description = "Optional", content_type = "application/json"),
    responses(
        (status = 200, description = "Suspended", body = DataFlowStatusMessage),
        (status = 404, description = "Unknown data flow"),
        (status = 409, description = "Not started, or leased elsewhere")
    ),
    tag = "Signaling"
)]
pub async fn suspend(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
    body: Option<Json<Envelope<DataFlowSuspendMessage>>>,
) -> ApiResult<Envelope<DataFlowStatusMessage>> {
    let reason = match body {
        Some(Json(envelope)) => envelope
            .into_message()
            .map_err(|f| ApiError::bad_request(f.reason))?
            .reason,
        None => None,
    };
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let new_state = state.service.suspend(&id, reason).await?;
    ok(status(id, new_state))
}

/// Terminate a data flow; repeated calls succeed
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/terminate",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    request_body(content = DataFlowTerminationMessage, description = "Optional", content_type = "application/json"),
    responses(
        (status = 200, description = "Terminated", body = DataFlowStatusMessage),
        (status = 404, description = "Unknown data flow"),
        (status = 409, description = "Not started yet, or leased elsewhere")
    ),
    tag = "Signaling"
)]
pub async fn terminate(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
    body: Option<Json<Envelope<DataFlowTerminationMessage>>>,
) -> ApiResult<Envelope<DataFlowStatusMessage>> {
    let reason = match body {
        Some(Json(envelope)) => envelope
            .into_message()
            .map_err(|f| ApiError::bad_request(f.reason))?
            .reason,
        None => None,
    };
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let new_state = state.service.terminate(&id, reason).await?;
    ok(status(id, new_state))
}

/// Resume a suspended data flow
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/recover",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    responses(
        (status = 200, description = "Started again", body = DataFlowStatusMessage),
        (status = 404, description = "Unknown data flow"),
        (status = 409, description = "Not suspended, or leased elsewhere")
    ),
    tag = "Signaling"
)]
pub async fn recover(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
) -> ApiResult<Envelope<DataFlowStatusMessage>> {
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let new_state = state.service.recover(&id).await?;
    ok(status(id, new_state))
}

/// Mark a started data flow as finished
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/complete",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    responses(
        (status = 200, description = "Completed", body = DataFlowStatusMessage),
        (status = 404, description = "Unknown data flow"),
        (status = 409, description = "Not started, or leased elsewhere")
    ),
    tag = "Signaling"
)]
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
) -> ApiResult<Envelope<DataFlowStatusMessage>> {
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let new_state = state.service.complete(&id).await?;
    ok(status(id, new_state))
}

/// Asynchronous provisioning finished
#[utoipa::path(
    post,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/provisioned",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    responses(
        (status = 200, description = "Provisioned and started", body = DataFlowResponseMessage),
        (status = 404, description = "Unknown data flow"),
        (status = 409, description = "Not provisioning, or leased elsewhere")
    ),
    tag = "Signaling"
)]
pub async fn provisioned(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
) -> ApiResult<Envelope<DataFlowResponseMessage>> {
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let response = state.service.notify_provisioned(&id).await?;
    ok(Envelope::new(response))
}

/// Current state of a data flow
#[utoipa::path(
    get,
    path = "/api/v1/participants/{participant_id}/dataflows/{id}/state",
    params(
        ("participant_id" = String, Path, description = "Owning participant"),
        ("id" = String, Path, description = "Data flow id")
    ),
    responses(
        (status = 200, description = "Current state", body = DataFlowStatusMessage),
        (status = 403, description = "Not the owning participant"),
        (status = 404, description = "Unknown data flow")
    ),
    tag = "Signaling"
)]
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((participant_id, id)): Path<(String, String)>,
) -> ApiResult<Envelope<DataFlowStatusMessage>> {
    authorize(&state, &principal, ResourceContext::flow(&participant_id, &id)).await?;

    let current = state.service.get_transfer_state(&id).await?;
    ok(status(id, current))
}

/// Fallback for unmatched routes
pub async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            super::types::error_codes::FLOW_NOT_FOUND,
            "No such route",
        )),
    )
}
