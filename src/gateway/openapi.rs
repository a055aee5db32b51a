//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::data_flow::{DataAddress, FlowType, TransferType};
use crate::gateway::handlers::HealthResponse;
use crate::signaling::{
    DataFlowProvisionMessage, DataFlowResponseMessage, DataFlowStartMessage,
    DataFlowStatusMessage, DataFlowSuspendMessage, DataFlowTerminationMessage, IdResponse,
};

/// Participant identity header, injected by the authenticating proxy
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "participant_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Participant-Id",
                    "Authenticated participant identity. Must equal the {participant_id} path segment.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Data Plane Signaling API",
        version = "1.0.0",
        description = "Start, suspend, terminate and provision data flows on this data plane.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::start,
        crate::gateway::handlers::provision,
        crate::gateway::handlers::suspend,
        crate::gateway::handlers::terminate,
        crate::gateway::handlers::recover,
        crate::gateway::handlers::complete,
        crate::gateway::handlers::provisioned,
        crate::gateway::handlers::get_state,
    ),
    components(
        schemas(
            HealthResponse,
            DataAddress,
            FlowType,
            TransferType,
            DataFlowStartMessage,
            DataFlowProvisionMessage,
            DataFlowResponseMessage,
            DataFlowSuspendMessage,
            DataFlowTerminationMessage,
            DataFlowStatusMessage,
            IdResponse,
        )
    ),
    modifiers(&SecurityAddon),
    security(("participant_id" = [])),
    tags(
        (name = "Signaling", description = "Data flow lifecycle"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;
