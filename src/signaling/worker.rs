//! Recovery Worker
//!
//! Background worker that re-drives data flows left unleased in an
//! in-progress state, typically after the instance holding them crashed.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use super::service::SignalingService;
use crate::data_flow::{DataFlowState, FailureKind, SignalingError};

/// States a flow can be stranded in between signaling calls
pub const RECOVERABLE_STATES: [DataFlowState; 3] = [
    DataFlowState::Received,
    DataFlowState::Provisioning,
    DataFlowState::Provisioned,
];

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for stale flows
    pub scan_interval: Duration,
    /// How long a flow must sit untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum flows to process per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Recovery Worker
///
/// Only picks flows whose lease is absent or expired, so it never competes
/// with a live request on another instance.
pub struct RecoveryWorker {
    service: SignalingService,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(service: SignalingService, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub fn with_defaults(service: SignalingService) -> Self {
        Self::new(service, WorkerConfig::default())
    }

    /// Run the recovery worker loop
    ///
    /// This method runs forever, periodically scanning for and resuming stale flows.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            runtime_id = %self.service.runtime_id(),
            "Starting recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan and recovery cycle. Returns how many flows changed state.
    pub async fn scan_and_recover(&self) -> Result<usize, SignalingError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .map_err(|e| SignalingError::SystemError(format!("Invalid stale threshold: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let stale: Vec<_> = self
            .service
            .sdk()
            .store()
            .next_not_leased(self.config.batch_size, &RECOVERABLE_STATES)
            .await?
            .into_iter()
            .filter(|f| f.updated_at <= cutoff)
            .collect();

        if stale.is_empty() {
            debug!("No stale data flows found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale data flows to recover");

        let mut recovered = 0;
        for flow in &stale {
            debug!(flow_id = %flow.id, state = %flow.state, "Recovering data flow");

            match self.service.resume(&flow.id).await {
                Ok(new_state) if new_state != flow.state => {
                    info!(
                        flow_id = %flow.id,
                        old_state = %flow.state,
                        new_state = %new_state,
                        "Data flow state advanced"
                    );
                    recovered += 1;
                }
                Ok(_) => {}
                // Picked up by someone else since the scan
                Err(e) if e.kind() == Some(FailureKind::Conflict) => {
                    debug!(flow_id = %flow.id, "Data flow leased elsewhere, skipping");
                }
                Err(e) => {
                    error!(flow_id = %flow.id, error = %e, "Failed to recover data flow");
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered data flows this scan");
        }

        Ok(recovered)
    }
}
