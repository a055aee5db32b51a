//! Signaling Service
//!
//! Drives data flows through their lifecycle. Every mutating operation
//! follows the same shape:
//!
//! ```text
//! lease ──▶ check current state ──▶ invoke hook ──┬─ ok ──▶ upsert new state (releases lease)
//!   │                                             └─ err ─▶ upsert FAILED, surface failure
//!   └─ lease refused ──▶ Conflict / NotFound, no hook invoked
//! ```
//!
//! Idempotent requests (flow already in the requested state) and illegal
//! requests release the lease without writing.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::messages::{DataFlowProvisionMessage, DataFlowResponseMessage, DataFlowStartMessage};
use super::sdk::{DataFlowHooks, DataPlaneSdk};
use crate::data_flow::{
    DataFlow, DataFlowState, DataFlowStore, Lease, LeasedFlow, SignalingError, StatusFailure,
    TransferType,
};

/// How a start-like request entered the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Start message: provision only if the hook declares resources
    Start,
    /// Provision message: always go through PROVISIONING
    Provision,
    /// Recovery worker re-driving a stuck flow
    Resume,
}

/// Non-start signals sharing one lease/validate/hook/persist skeleton
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Suspend,
    Terminate,
    Recover,
    Complete,
}

impl Signal {
    fn target(&self) -> DataFlowState {
        match self {
            Signal::Suspend => DataFlowState::Suspended,
            Signal::Terminate => DataFlowState::Terminated,
            Signal::Recover => DataFlowState::Started,
            Signal::Complete => DataFlowState::Completed,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Signal::Suspend => "suspend",
            Signal::Terminate => "terminate",
            Signal::Recover => "recover",
            Signal::Complete => "complete",
        }
    }

    /// Already satisfied by `state`; nothing to do
    fn is_satisfied_by(&self, state: DataFlowState) -> bool {
        match self {
            // A finished flow is as stopped as a terminated one
            Signal::Terminate | Signal::Complete => state.is_terminal(),
            Signal::Suspend | Signal::Recover => state == self.target(),
        }
    }
}

/// Result of driving a flow forward
struct Advanced {
    response: DataFlowResponseMessage,
    state: DataFlowState,
}

/// Signaling Service - orchestrates data flow transitions
#[derive(Clone)]
pub struct SignalingService {
    sdk: DataPlaneSdk,
}

impl SignalingService {
    pub fn new(sdk: DataPlaneSdk) -> Self {
        Self { sdk }
    }

    pub fn sdk(&self) -> &DataPlaneSdk {
        &self.sdk
    }

    pub fn runtime_id(&self) -> &str {
        self.sdk.runtime_id()
    }

    fn store(&self) -> &Arc<dyn DataFlowStore> {
        self.sdk.store()
    }

    fn hooks(&self) -> &Arc<dyn DataFlowHooks> {
        self.sdk.hooks()
    }

    // ========================================================================
    // Start / Provision
    // ========================================================================

    /// Structural checks, transfer-type allow-list, then the validation hook.
    /// Any violation is a BadRequest failure.
    pub async fn validate_start_message(
        &self,
        msg: &DataFlowStartMessage,
    ) -> Result<(), SignalingError> {
        let mut missing = Vec::new();
        if msg.process_id.trim().is_empty() {
            missing.push("processId");
        }
        if msg.participant_id.trim().is_empty() {
            missing.push("participantId");
        }
        if msg.dataset_id.trim().is_empty() {
            missing.push("datasetId");
        }
        if msg.agreement_id.trim().is_empty() {
            missing.push("agreementId");
        }
        if msg.source_data_address.is_none() {
            missing.push("sourceDataAddress");
        }
        if msg.destination_data_address.is_none() {
            missing.push("destinationDataAddress");
        }
        if msg.flow_type.is_none() {
            missing.push("flowType");
        }
        if msg.transfer_type_destination.trim().is_empty() {
            missing.push("transferTypeDestination");
        }
        if !missing.is_empty() {
            return Err(SignalingError::bad_request(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let transfer_type = transfer_type_of(msg)?;
        let allowed = self.sdk.allowed_transfer_types();
        if !allowed.is_empty() && !allowed.contains(&transfer_type.key()) {
            return Err(SignalingError::bad_request(format!(
                "Transfer type {} is not supported",
                transfer_type.key()
            )));
        }

        self.hooks()
            .on_validate_start_message(msg)
            .await
            .map_err(|f| StatusFailure::bad_request(f.reason).into())
    }

    /// Validate, then create a RECEIVED flow (or lease the existing one) and
    /// drive it towards STARTED.
    pub async fn start(
        &self,
        msg: &DataFlowStartMessage,
    ) -> Result<DataFlowResponseMessage, SignalingError> {
        self.validate_start_message(msg).await?;
        let leased = self.lease_or_create(msg, false).await?;
        Ok(self.advance(leased, Mode::Start).await?.response)
    }

    /// Like [`start`](Self::start) but always provisions first. The flow is
    /// recorded as consumer-side.
    pub async fn provision(
        &self,
        msg: &DataFlowProvisionMessage,
    ) -> Result<DataFlowResponseMessage, SignalingError> {
        self.validate_start_message(&msg.request).await?;
        let leased = self.lease_or_create(&msg.request, true).await?;
        Ok(self.advance(leased, Mode::Provision).await?.response)
    }

    /// An asynchronous provisioner finished: PROVISIONING → PROVISIONED → STARTED
    pub async fn notify_provisioned(
        &self,
        id: &str,
    ) -> Result<DataFlowResponseMessage, SignalingError> {
        let LeasedFlow { mut flow, lease } = self
            .store()
            .find_by_id_and_lease(id, self.runtime_id())
            .await?;

        match flow.state {
            DataFlowState::Provisioning => {
                flow.provision_complete = true;
                flow.transition_to(DataFlowState::Provisioned);
                Ok(self.start_leased(flow, lease).await?.response)
            }
            DataFlowState::Started => {
                self.release(&lease).await;
                Ok(DataFlowResponseMessage::started(flow.destination))
            }
            state => {
                self.release(&lease).await;
                Err(SignalingError::conflict(format!(
                    "Data flow {} is {}, not awaiting provisioning",
                    id, state
                )))
            }
        }
    }

    /// Re-drive a flow left behind by a crashed or slow holder.
    /// Used by the recovery worker; SUSPENDED and terminal flows are left alone.
    pub async fn resume(&self, id: &str) -> Result<DataFlowState, SignalingError> {
        let leased = self
            .store()
            .find_by_id_and_lease(id, self.runtime_id())
            .await?;
        Ok(self.advance(leased, Mode::Resume).await?.state)
    }

    // ========================================================================
    // Suspend / Terminate / Recover / Complete
    // ========================================================================

    /// STARTED → SUSPENDED
    pub async fn suspend(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<DataFlowState, SignalingError> {
        self.signal(id, Signal::Suspend, reason).await
    }

    /// STARTED | SUSPENDED → TERMINATED. Succeeds without side effects if the
    /// flow already ended.
    pub async fn terminate(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<DataFlowState, SignalingError> {
        self.signal(id, Signal::Terminate, reason).await
    }

    /// SUSPENDED → STARTED
    pub async fn recover(&self, id: &str) -> Result<DataFlowState, SignalingError> {
        self.signal(id, Signal::Recover, None).await
    }

    /// STARTED → COMPLETED, reported by the transfer once all bytes moved
    pub async fn complete(&self, id: &str) -> Result<DataFlowState, SignalingError> {
        self.signal(id, Signal::Complete, None).await
    }

    /// Read-only, no leasing
    pub async fn get_transfer_state(&self, id: &str) -> Result<DataFlowState, SignalingError> {
        self.store()
            .find_by_id(id)
            .await?
            .map(|f| f.state)
            .ok_or_else(|| SignalingError::not_found(id))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn lease_or_create(
        &self,
        msg: &DataFlowStartMessage,
        is_consumer: bool,
    ) -> Result<LeasedFlow, SignalingError> {
        if self.store().find_by_id(&msg.process_id).await?.is_some() {
            debug!(flow_id = %msg.process_id, "Resuming existing data flow");
            return self
                .store()
                .find_by_id_and_lease(&msg.process_id, self.runtime_id())
                .await;
        }

        let mut flow = flow_from_message(msg)?;
        flow.is_consumer = is_consumer;
        flow.runtime_id = self.runtime_id().to_string();

        let lease = self.store().create_leased(&flow, self.runtime_id()).await?;
        info!(
            flow_id = %flow.id,
            participant_id = %flow.participant_id,
            transfer_type = %flow.transfer_type.key(),
            "Data flow received"
        );
        Ok(LeasedFlow { flow, lease })
    }

    async fn advance(&self, leased: LeasedFlow, mode: Mode) -> Result<Advanced, SignalingError> {
        let LeasedFlow { flow, lease } = leased;

        match flow.state {
            DataFlowState::Received => {
                self.provision_leased(flow, lease, mode == Mode::Provision)
                    .await
            }
            DataFlowState::Provisioning if mode == Mode::Resume => {
                self.provision_leased(flow, lease, true).await
            }
            DataFlowState::Provisioning => {
                self.release(&lease).await;
                Ok(Advanced {
                    response: DataFlowResponseMessage::provisioning(),
                    state: flow.state,
                })
            }
            DataFlowState::Provisioned => self.start_leased(flow, lease).await,
            DataFlowState::Started => {
                self.release(&lease).await;
                Ok(Advanced {
                    response: DataFlowResponseMessage::started(flow.destination),
                    state: DataFlowState::Started,
                })
            }
            DataFlowState::Suspended if mode == Mode::Resume => {
                self.release(&lease).await;
                Ok(Advanced {
                    response: DataFlowResponseMessage::started(flow.destination),
                    state: DataFlowState::Suspended,
                })
            }
            DataFlowState::Suspended => {
                let destination = flow.destination.clone();
                let state = self.signal_leased(flow, lease, Signal::Recover, None).await?;
                Ok(Advanced {
                    response: DataFlowResponseMessage::started(destination),
                    state,
                })
            }
            terminal => {
                self.release(&lease).await;
                Err(SignalingError::conflict(format!(
                    "Data flow {} is {} and cannot be started",
                    flow.id, terminal
                )))
            }
        }
    }

    /// Invoke the provision hook. No resources and not forced: start directly.
    /// All resources complete: PROVISIONED then start. Otherwise stay in
    /// PROVISIONING until notified.
    async fn provision_leased(
        &self,
        mut flow: DataFlow,
        lease: Lease,
        force: bool,
    ) -> Result<Advanced, SignalingError> {
        let resources = match self.hooks().on_provision(&flow).await {
            Ok(resources) => resources,
            Err(failure) => return Err(self.fail(flow, &lease, failure).await),
        };

        if resources.is_empty() && !force {
            return self.start_leased(flow, lease).await;
        }

        if flow.state == DataFlowState::Received {
            flow.provision_requested = true;
            flow.transition_to(DataFlowState::Provisioning);
        }

        if resources.iter().all(|r| r.complete) {
            flow.provision_complete = true;
            flow.transition_to(DataFlowState::Provisioned);
            debug!(flow_id = %flow.id, resources = resources.len(), "Provisioning complete");
            return self.start_leased(flow, lease).await;
        }

        let pending = resources.iter().filter(|r| !r.complete).count();
        flow.touch();
        self.persist(&mut flow, &lease).await?;
        info!(flow_id = %flow.id, pending = pending, "Data flow provisioning");

        Ok(Advanced {
            response: DataFlowResponseMessage::provisioning(),
            state: DataFlowState::Provisioning,
        })
    }

    async fn start_leased(
        &self,
        mut flow: DataFlow,
        lease: Lease,
    ) -> Result<Advanced, SignalingError> {
        let mut response = match self.hooks().on_start(&flow).await {
            Ok(response) => response,
            Err(failure) => return Err(self.fail(flow, &lease, failure).await),
        };
        response.provisioning = false;

        if !flow.transition_to(DataFlowState::Started) {
            self.release(&lease).await;
            return Err(SignalingError::conflict(format!(
                "Data flow {} cannot start from {}",
                flow.id, flow.state
            )));
        }
        self.persist(&mut flow, &lease).await?;
        info!(flow_id = %flow.id, "Data flow started");

        Ok(Advanced {
            response,
            state: DataFlowState::Started,
        })
    }

    async fn signal(
        &self,
        id: &str,
        signal: Signal,
        reason: Option<String>,
    ) -> Result<DataFlowState, SignalingError> {
        let LeasedFlow { flow, lease } = self
            .store()
            .find_by_id_and_lease(id, self.runtime_id())
            .await?;

        self.signal_leased(flow, lease, signal, reason).await
    }

    async fn signal_leased(
        &self,
        mut flow: DataFlow,
        lease: Lease,
        signal: Signal,
        reason: Option<String>,
    ) -> Result<DataFlowState, SignalingError> {
        if signal.is_satisfied_by(flow.state) {
            debug!(flow_id = %flow.id, state = %flow.state, signal = signal.as_str(), "Already satisfied");
            self.release(&lease).await;
            return Ok(flow.state);
        }

        let target = signal.target();
        if !flow.state.can_transition_to(target) {
            self.release(&lease).await;
            return Err(SignalingError::conflict(format!(
                "Cannot {} data flow {} in state {}",
                signal.as_str(),
                flow.id,
                flow.state
            )));
        }

        let hooked = match signal {
            Signal::Suspend => self.hooks().on_suspend(&flow).await,
            Signal::Terminate => self.hooks().on_terminate(&flow).await,
            Signal::Recover => self.hooks().on_recover(&flow).await,
            Signal::Complete => Ok(()),
        };
        if let Err(failure) = hooked {
            return Err(self.fail(flow, &lease, failure).await);
        }

        let previous = flow.state;
        flow.transition_to(target);
        if matches!(signal, Signal::Suspend | Signal::Terminate) {
            flow.state_reason = reason;
        }
        self.persist(&mut flow, &lease).await?;
        info!(
            flow_id = %flow.id,
            old_state = %previous,
            new_state = %target,
            "Data flow state advanced"
        );
        Ok(target)
    }

    /// Stamp ownership and write; the upsert releases the lease
    async fn persist(&self, flow: &mut DataFlow, lease: &Lease) -> Result<(), SignalingError> {
        flow.runtime_id = self.runtime_id().to_string();
        self.store().upsert(flow, Some(lease)).await
    }

    /// Hook failed: persist FAILED and hand back the hook's failure
    async fn fail(&self, mut flow: DataFlow, lease: &Lease, failure: StatusFailure) -> SignalingError {
        warn!(
            flow_id = %flow.id,
            state = %flow.state,
            error = %failure,
            "Hook failed, marking data flow FAILED"
        );

        flow.error_detail = Some(failure.reason.clone());
        flow.transition_to(DataFlowState::Failed);
        match self.persist(&mut flow, lease).await {
            Ok(()) => failure.into(),
            Err(e) => {
                error!(flow_id = %flow.id, error = %e, "Failed to persist FAILED state");
                e
            }
        }
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.store().break_lease(lease).await {
            warn!(flow_id = %lease.flow_id, error = %e, "Failed to release lease (will expire)");
        }
    }
}

fn transfer_type_of(msg: &DataFlowStartMessage) -> Result<TransferType, SignalingError> {
    let flow_type = msg
        .flow_type
        .ok_or_else(|| SignalingError::bad_request("Missing flowType"))?;
    Ok(TransferType::new(flow_type, msg.transfer_type_destination.clone()))
}

/// New RECEIVED flow from a validated start message
fn flow_from_message(msg: &DataFlowStartMessage) -> Result<DataFlow, SignalingError> {
    let source = msg
        .source_data_address
        .clone()
        .ok_or_else(|| SignalingError::bad_request("Missing sourceDataAddress"))?;
    let destination = msg
        .destination_data_address
        .clone()
        .ok_or_else(|| SignalingError::bad_request("Missing destinationDataAddress"))?;

    let mut flow = DataFlow::new(
        msg.process_id.clone(),
        source,
        destination,
        transfer_type_of(msg)?,
        msg.participant_id.clone(),
    );
    flow.callback_address = msg.callback_address.clone();
    flow.asset_id = msg.dataset_id.clone();
    flow.agreement_id = msg.agreement_id.clone();
    Ok(flow)
}
