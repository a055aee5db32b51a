//! In-memory Data Flow Store
//!
//! `DashMap`-backed implementation of [`DataFlowStore`]. Lease
//! check-and-set runs while holding the shard write lock for the record,
//! so concurrent acquisitions on one id serialize and exactly one wins.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::criterion::{Criterion, matches_all};
use super::error::SignalingError;
use super::state::DataFlowState;
use super::store::{DEFAULT_LEASE_DURATION, DataFlowStore, Lease, LeasedFlow};
use super::types::DataFlow;

#[derive(Debug, Clone)]
struct StoredFlow {
    flow: DataFlow,
    lease: Option<Lease>,
}

impl StoredFlow {
    fn live_lease(&self) -> Option<&Lease> {
        self.lease.as_ref().filter(|l| !l.is_expired())
    }
}

/// Process-local store, shared across runtime instances through an `Arc`
pub struct InMemoryDataFlowStore {
    flows: DashMap<String, StoredFlow>,
    lease_duration: Duration,
}

impl Default for InMemoryDataFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDataFlowStore {
    pub fn new() -> Self {
        Self::with_lease_duration(DEFAULT_LEASE_DURATION)
    }

    pub fn with_lease_duration(lease_duration: Duration) -> Self {
        Self {
            flows: DashMap::new(),
            lease_duration,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Current lease on `id`, expired or not
    pub fn lease_of(&self, id: &str) -> Option<Lease> {
        self.flows.get(id).and_then(|e| e.lease.clone())
    }
}

#[async_trait]
impl DataFlowStore for InMemoryDataFlowStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<DataFlow>, SignalingError> {
        Ok(self.flows.get(id).map(|e| e.flow.clone()))
    }

    async fn next_not_leased(
        &self,
        max: usize,
        states: &[DataFlowState],
    ) -> Result<Vec<DataFlow>, SignalingError> {
        let mut flows: Vec<DataFlow> = self
            .flows
            .iter()
            .filter(|e| states.contains(&e.flow.state) && e.live_lease().is_none())
            .map(|e| e.flow.clone())
            .collect();

        flows.sort_by_key(|f| f.updated_at);
        flows.truncate(max);
        Ok(flows)
    }

    async fn find_by_id_and_lease(
        &self,
        id: &str,
        holder: &str,
    ) -> Result<LeasedFlow, SignalingError> {
        let mut entry = self
            .flows
            .get_mut(id)
            .ok_or_else(|| SignalingError::not_found(id))?;

        if let Some(current) = entry.live_lease() {
            debug!(flow_id = %id, holder = %current.holder, "Lease held elsewhere");
            return Err(SignalingError::conflict(format!(
                "Data flow {} is leased by {}",
                id, current.holder
            )));
        }

        let lease = Lease::acquire(id, holder, self.lease_duration);
        entry.lease = Some(lease.clone());

        Ok(LeasedFlow {
            flow: entry.flow.clone(),
            lease,
        })
    }

    async fn create_leased(&self, flow: &DataFlow, holder: &str) -> Result<Lease, SignalingError> {
        match self.flows.entry(flow.id.clone()) {
            Entry::Occupied(_) => Err(SignalingError::conflict(format!(
                "Data flow {} already exists",
                flow.id
            ))),
            Entry::Vacant(vacant) => {
                let lease = Lease::acquire(&flow.id, holder, self.lease_duration);
                vacant.insert(StoredFlow {
                    flow: flow.clone(),
                    lease: Some(lease.clone()),
                });
                Ok(lease)
            }
        }
    }

    async fn upsert(&self, flow: &DataFlow, lease: Option<&Lease>) -> Result<(), SignalingError> {
        let stored = StoredFlow {
            flow: flow.clone(),
            lease: None,
        };

        match (self.flows.entry(flow.id.clone()), lease) {
            // Leased write: our token must still be on the record, expired or not
            (Entry::Occupied(mut occupied), Some(lease)) => {
                if occupied.get().lease.as_ref().map(|l| l.token) != Some(lease.token) {
                    debug!(flow_id = %flow.id, holder = %lease.holder, "Stale lease on upsert");
                    return Err(SignalingError::conflict(format!(
                        "Data flow {} lease of {} is no longer held",
                        flow.id, lease.holder
                    )));
                }
                occupied.insert(stored);
            }
            (Entry::Occupied(mut occupied), None) => {
                if let Some(current) = occupied.get().live_lease() {
                    return Err(SignalingError::conflict(format!(
                        "Data flow {} is leased by {}",
                        flow.id, current.holder
                    )));
                }
                occupied.insert(stored);
            }
            (Entry::Vacant(_), Some(lease)) => {
                return Err(SignalingError::conflict(format!(
                    "Data flow {} lease of {} is no longer held",
                    flow.id, lease.holder
                )));
            }
            (Entry::Vacant(vacant), None) => {
                vacant.insert(stored);
            }
        }
        Ok(())
    }

    async fn break_lease(&self, lease: &Lease) -> Result<(), SignalingError> {
        if let Some(mut entry) = self.flows.get_mut(&lease.flow_id)
            && entry.lease.as_ref().map(|l| l.token) == Some(lease.token)
        {
            entry.lease = None;
        }
        Ok(())
    }

    async fn query(
        &self,
        criteria: &[Criterion],
        limit: usize,
    ) -> Result<Vec<DataFlow>, SignalingError> {
        for criterion in criteria {
            criterion.validate()?;
        }

        let mut flows = Vec::new();
        for entry in self.flows.iter() {
            if matches_all(criteria, &entry.flow)? {
                flows.push(entry.flow.clone());
            }
        }

        flows.sort_by_key(|f| f.created_at);
        flows.truncate(limit);
        Ok(flows)
    }
}
