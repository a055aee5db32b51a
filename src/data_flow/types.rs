//! Data Flow Core Types
//!
//! The authoritative record of one transfer and the typed addresses it moves
//! data between.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::state::DataFlowState;

/// Current time at the precision PostgreSQL `TIMESTAMPTZ` keeps.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Typed address of a source or destination
///
/// `type` discriminates the kind of endpoint (e.g. `HttpData`, `AmazonS3`);
/// everything else is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DataAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DataAddress {
    pub fn new(address_type: impl Into<String>) -> Self {
        Self {
            address_type: address_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Flow direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowType {
    /// Provider pushes data to the destination
    Push,
    /// Consumer pulls data from an endpoint the provider exposes
    Pull,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Push => "PUSH",
            FlowType::Pull => "PULL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PUSH" => Some(FlowType::Push),
            "PULL" => Some(FlowType::Pull),
            _ => None,
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction plus destination transfer type (e.g. `HttpData-PUSH`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferType {
    pub flow_type: FlowType,
    pub destination_type: String,
}

impl TransferType {
    pub fn new(flow_type: FlowType, destination_type: impl Into<String>) -> Self {
        Self {
            flow_type,
            destination_type: destination_type.into(),
        }
    }

    /// Allow-list key, `<destinationType>-<FLOWTYPE>`
    pub fn key(&self) -> String {
        format!("{}-{}", self.destination_type, self.flow_type)
    }
}

/// One tracked data transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    pub id: String,
    pub source: DataAddress,
    pub destination: DataAddress,
    pub callback_address: Option<String>,
    pub transfer_type: TransferType,
    /// Runtime instance currently responsible for executing the flow
    pub runtime_id: String,
    pub participant_id: String,
    pub asset_id: String,
    pub agreement_id: String,
    pub provision_requested: bool,
    pub provision_complete: bool,
    pub deprovision_requested: bool,
    pub deprovision_complete: bool,
    pub is_consumer: bool,
    pub state: DataFlowState,
    /// Reason given with the last suspend or terminate request
    pub state_reason: Option<String>,
    /// Hook failure that moved the flow to FAILED
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataFlow {
    /// Create a new flow in RECEIVED state
    pub fn new(
        id: impl Into<String>,
        source: DataAddress,
        destination: DataAddress,
        transfer_type: TransferType,
        participant_id: impl Into<String>,
    ) -> Self {
        let now = now_utc();
        Self {
            id: id.into(),
            source,
            destination,
            callback_address: None,
            transfer_type,
            runtime_id: String::new(),
            participant_id: participant_id.into(),
            asset_id: String::new(),
            agreement_id: String::new(),
            provision_requested: false,
            provision_complete: false,
            deprovision_requested: false,
            deprovision_complete: false,
            is_consumer: false,
            state: DataFlowState::Received,
            state_reason: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the FSM has that edge. Refreshes `updated_at`.
    pub fn transition_to(&mut self, next: DataFlowState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.touch();
        true
    }

    /// Refresh `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }
}
