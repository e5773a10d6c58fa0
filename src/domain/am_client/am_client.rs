use async_trait::async_trait;
use thiserror::Error;

use crate::domain::topology::{HopRef, Topology};
use crate::domain::util::id::{AggregateId, SliceId};
use crate::domain::vlan::VlanRange;

/// Everything one reservation call needs, assembled by the launcher before
/// dispatch so the in-flight task shares no state with the scheduler loop.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub aggregate: AggregateId,
    pub api_version: u32,
    /// The sub-topology of hops owned by this aggregate, with imported tags
    /// already resolved into `suggested_vlan`.
    pub hops: Vec<HopRequest>,
}

#[derive(Debug, Clone)]
pub struct HopRequest {
    pub hop: HopRef,
    /// Tags still believed available at this hop.
    pub vlan_range: VlanRange,
    /// The tag the aggregate is asked to use. `Some` is mandatory for hops
    /// that import their tag from a completed dependency.
    pub suggested_vlan: Option<u16>,
}

/// How one reservation call failed. Explicit variants so the launcher and
/// the session dispatch on kind rather than on exception depth.
#[derive(Debug, Clone, Error)]
pub enum ReserveError {
    /// The requested tag was taken at the aggregate; retryable locally with
    /// a different tag, no recomputation needed.
    #[error("VLAN tag {tag} is unavailable")]
    VlanConflict { tag: u16 },

    /// No tag combination can satisfy this aggregate given its neighbors;
    /// the session may recompute around it.
    #[error("Circuit infeasible: {reason}")]
    CircuitFailed { reason: String },

    /// Anything else; fatal for the whole workflow.
    #[error("{0}")]
    Fatal(String),
}

/// Seam to the per-aggregate reservation machinery (AM API client). The
/// wire protocol, credentials and certificate handling live behind this
/// trait.
#[async_trait]
pub trait AggregateClient: Send + Sync {
    /// Books the aggregate's share of the circuit. On success the returned
    /// manifest fragment carries, per owned hop, the single assigned tag.
    async fn reserve(
        &self,
        slice: &SliceId,
        request: ReserveRequest,
    ) -> Result<Topology, ReserveError>;

    /// Rolls back this aggregate's reservation. The session never calls
    /// this on its own; rollback is the caller's decision.
    async fn delete(&self, slice: &SliceId, aggregate: &AggregateId) -> Result<(), ReserveError>;
}
