//! Data Flow Entity and Leased Store
//!
//! # Architecture
//!
//! A [`DataFlow`] is the authoritative record of one transfer. It lives in a
//! [`DataFlowStore`] shared by every runtime instance; instances coordinate
//! only through the store's lease:
//!
//! ```text
//!  runtime A ──┐                         ┌──▶ InMemoryDataFlowStore (DashMap)
//!              ├─▶ find_by_id_and_lease ─┤
//!  runtime B ──┘     (atomic CAS)        └──▶ PgDataFlowStore (data_flows_tb)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single Writer**: a flow is mutated only by the holder of its live lease
//! 2. **Legal Edges Only**: `state` moves along [`DataFlowState::can_transition_to`]
//! 3. **Lease Expiry**: a crashed holder blocks a flow for one lease duration at most
//! 4. **No Cache**: every operation re-reads the record before deciding

pub mod criterion;
pub mod db;
pub mod error;
pub mod memory;
pub mod state;
pub mod store;
pub mod types;

pub use criterion::{Criterion, Operator};
pub use db::PgDataFlowStore;
pub use error::{FailureKind, SignalingError, StatusFailure, StatusResult};
pub use memory::InMemoryDataFlowStore;
pub use state::DataFlowState;
pub use store::{DataFlowStore, Lease, LeasedFlow};
pub use types::{DataAddress, DataFlow, FlowType, TransferType};
