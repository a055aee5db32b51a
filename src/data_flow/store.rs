//! Leased Data Flow Store
//!
//! Durable collection of [`DataFlow`] records with lease-based mutual
//! exclusion. Multiple runtime instances share one backing store; the only
//! coordination between them is the atomic lease check-and-set performed by
//! [`DataFlowStore::find_by_id_and_lease`].
//!
//! # Lease Rules
//!
//! 1. At most one live lease per record. An expired lease counts as free.
//! 2. Every acquisition mints a fresh token, so two tasks of the same runtime
//!    instance also exclude each other.
//! 3. `upsert` releases the writer's lease once the write commits and refuses
//!    to overwrite a record whose live lease belongs to someone else.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::criterion::Criterion;
use super::error::SignalingError;
use super::state::DataFlowState;
use super::types::{DataFlow, now_utc};

/// Default lease lifetime; a crashed holder blocks the flow at most this long.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Time-bounded exclusive claim on one data flow record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub flow_id: String,
    /// Runtime instance that acquired the lease
    pub holder: String,
    /// Optimistic-concurrency token, unique per acquisition
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Mint a lease valid for `duration` from now
    pub fn acquire(flow_id: impl Into<String>, holder: impl Into<String>, duration: Duration) -> Self {
        Self {
            flow_id: flow_id.into(),
            holder: holder.into(),
            token: Uuid::new_v4(),
            expires_at: now_utc() + lease_delta(duration),
        }
    }

    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_utc())
    }
}

pub(crate) fn lease_delta(duration: Duration) -> TimeDelta {
    TimeDelta::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// A flow together with the lease the caller now holds on it
#[derive(Debug, Clone)]
pub struct LeasedFlow {
    pub flow: DataFlow,
    pub lease: Lease,
}

/// Storage contract for data flows
#[async_trait]
pub trait DataFlowStore: Send + Sync {
    /// Plain lookup, no locking
    async fn find_by_id(&self, id: &str) -> Result<Option<DataFlow>, SignalingError>;

    /// Up to `max` flows in one of `states` whose lease is absent or expired,
    /// oldest `updated_at` first. Does not acquire anything.
    async fn next_not_leased(
        &self,
        max: usize,
        states: &[DataFlowState],
    ) -> Result<Vec<DataFlow>, SignalingError>;

    /// Atomically check the flow exists and is unleased, then lease it.
    ///
    /// NotFound if the record is absent, Conflict if a live lease exists.
    async fn find_by_id_and_lease(
        &self,
        id: &str,
        holder: &str,
    ) -> Result<LeasedFlow, SignalingError>;

    /// Insert a new record already leased by `holder`. Conflict if the id exists.
    async fn create_leased(&self, flow: &DataFlow, holder: &str) -> Result<Lease, SignalingError>;

    /// Insert or replace, releasing `lease` on commit.
    ///
    /// With `Some(lease)` the write is fenced: it lands only while the stored
    /// token is still `lease.token`, expired or not. Once another holder has
    /// re-leased or written the record, the stale write is a Conflict.
    /// With `None` the write lands only when no live lease exists.
    async fn upsert(&self, flow: &DataFlow, lease: Option<&Lease>) -> Result<(), SignalingError>;

    /// Release a lease without writing the record
    async fn break_lease(&self, lease: &Lease) -> Result<(), SignalingError>;

    /// Criteria-filtered listing, oldest `created_at` first
    async fn query(
        &self,
        criteria: &[Criterion],
        limit: usize,
    ) -> Result<Vec<DataFlow>, SignalingError>;
}
