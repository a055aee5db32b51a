//! Data plane signaling
//!
//! Protocol side of the data plane: wire messages, the hook-carrying SDK
//! value, the service that drives flows through their lifecycle, the
//! ownership check gating requests, and the worker that re-drives stranded
//! flows.
//!
//! ```text
//! request ──▶ AuthorizationHandler ──▶ SignalingService ──▶ DataFlowHooks
//!                                            │
//!                                            ▼
//!                                      DataFlowStore (lease / upsert)
//! ```

pub mod authz;
pub mod messages;
pub mod sdk;
pub mod service;
pub mod worker;

mod integration_tests;

pub use authz::{AuthorizationHandler, Principal, ResourceContext};
pub use messages::{
    DataFlowProvisionMessage, DataFlowResponseMessage, DataFlowStartMessage,
    DataFlowStatusMessage, DataFlowSuspendMessage, DataFlowTerminationMessage, Envelope,
    IdResponse, WireMessage,
};
pub use sdk::{DataFlowHooks, DataPlaneSdk, DataPlaneSdkBuilder, DefaultHooks, ProvisionResource};
pub use service::SignalingService;
pub use worker::{RecoveryWorker, WorkerConfig};
