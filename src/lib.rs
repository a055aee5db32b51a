//! Data Plane Signaling
//!
//! Tracks data transfers ("data flows") on a data plane and drives them
//! through their lifecycle in response to control-plane signals. The actual
//! byte movement is delegated to user-supplied hooks.
//!
//! # Modules
//!
//! - [`data_flow`] - DataFlow entity, state machine, leased stores
//! - [`signaling`] - Wire messages, SDK/hooks, service, authorization, recovery
//! - [`gateway`] - axum HTTP signaling API
//! - [`control_plane`] - Registration with the control plane
//! - [`db`] - PostgreSQL connection and schema
//! - [`config`] / [`logging`] - Process setup

pub mod config;
pub mod control_plane;
pub mod data_flow;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod signaling;

pub use data_flow::{
    DataAddress, DataFlow, DataFlowState, DataFlowStore, FailureKind, FlowType,
    InMemoryDataFlowStore, PgDataFlowStore, SignalingError, StatusFailure, StatusResult,
    TransferType,
};
pub use signaling::{DataFlowHooks, DataPlaneSdk, SignalingService};
