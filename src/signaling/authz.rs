//! Resource-ownership authorization for signaling requests.
//!
//! Authentication happens upstream; this only decides whether an already
//! identified principal may act on a participant's data flows.

use std::sync::Arc;

use tracing::debug;

use crate::data_flow::{DataFlowStore, SignalingError, StatusFailure};

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The resource a request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContext {
    pub participant_id: String,
    /// None for participant-scoped operations (start, provision)
    pub flow_id: Option<String>,
}

impl ResourceContext {
    pub fn participant(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            flow_id: None,
        }
    }

    pub fn flow(participant_id: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            flow_id: Some(flow_id.into()),
        }
    }
}

/// Ownership check against the flow store
#[derive(Clone)]
pub struct AuthorizationHandler {
    store: Arc<dyn DataFlowStore>,
}

impl AuthorizationHandler {
    pub fn new(store: Arc<dyn DataFlowStore>) -> Self {
        Self { store }
    }

    /// Ok when `principal` may act on `resource`.
    ///
    /// A missing flow is authorized so the caller sees NotFound from the
    /// service instead of a misleading denial.
    pub async fn authorize(
        &self,
        principal: &Principal,
        resource: &ResourceContext,
    ) -> Result<(), SignalingError> {
        if principal.id != resource.participant_id {
            debug!(
                principal = %principal.id,
                participant_id = %resource.participant_id,
                "Principal does not match participant context"
            );
            return Err(StatusFailure::unauthorized(format!(
                "Principal {} is not participant {}",
                principal.id, resource.participant_id
            ))
            .into());
        }

        let Some(flow_id) = &resource.flow_id else {
            return Ok(());
        };

        match self.store.find_by_id(flow_id).await? {
            Some(flow) if flow.participant_id != principal.id => {
                debug!(flow_id = %flow_id, owner = %flow.participant_id, principal = %principal.id, "Flow owned by another participant");
                Err(StatusFailure::unauthorized(format!(
                    "Principal {} does not own data flow {}",
                    principal.id, flow_id
                ))
                .into())
            }
            _ => Ok(()),
        }
    }
}
