use std::collections::{HashMap, HashSet};

use crate::domain::topology::{HopRef, Topology};
use crate::domain::util::id::AggregateId;

/// Lifecycle state of one aggregate inside the launcher.
///
/// `Ready` means every aggregate this one depends on is `Completed`.
/// `Completed` and `Failed` are terminal, except that a reservation hit by a
/// VLAN conflict returns from `Reserving` to `Ready` while retry budget
/// remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    /// Has unsatisfied dependencies; must not be dispatched.
    Pending,
    /// All dependencies completed; eligible for dispatch.
    Ready,
    /// A reservation call (or a conflict pause) is in flight.
    Reserving,
    /// The aggregate returned its manifest fragment.
    Completed,
    /// Terminal failure; the workflow is aborting.
    Failed,
}

/// One workflow node: an independently operated aggregate manager and the
/// slice of the circuit it owns.
///
/// Created when the dependency graph builder first observes an owner on a
/// node or hop, mutated by the launcher as the reservation progresses, and
/// dropped with the session attempt.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub id: AggregateId,
    pub urn: Option<String>,
    pub api_version: u32,
    /// Hops owned by this aggregate, in path order.
    pub hops: Vec<HopRef>,
    /// Direct dependencies; readiness is defined over these alone.
    pub depends_on: HashSet<AggregateId>,
    pub state: AggregateState,
    /// Circuit-switched aggregates need a long teardown before a conflicting
    /// tag can be retried, so they pause far longer between attempts.
    pub is_dcn: bool,
    /// True iff every hop this aggregate owns can translate tags.
    pub supports_vlan_translation: bool,
    /// Remaining local retries after VLAN conflicts.
    pub vlan_retries_left: u32,
    /// The manifest fragment returned by a successful reservation.
    pub manifest: Option<Topology>,
}

impl Aggregate {
    pub fn new(id: AggregateId, directory: &AggregateDirectory) -> Self {
        let api_version = directory.api_version(&id);
        let is_dcn = directory.is_dcn(&id);
        Aggregate {
            id,
            urn: None,
            api_version,
            hops: Vec::new(),
            depends_on: HashSet::new(),
            state: AggregateState::Pending,
            is_dcn,
            supports_vlan_translation: true,
            vlan_retries_left: directory.vlan_retries,
            manifest: None,
        }
    }
}

/// Operator-maintained knowledge about aggregates that cannot be derived
/// from the request itself: which AM API version each one speaks and which
/// belong to the slow-teardown DCN class.
#[derive(Debug, Clone)]
pub struct AggregateDirectory {
    pub api_versions: HashMap<AggregateId, u32>,
    pub dcn_aggregates: HashSet<AggregateId>,
    /// Local VLAN-conflict retry budget granted to every aggregate.
    pub vlan_retries: u32,
}

pub const DEFAULT_API_VERSION: u32 = 2;
pub const DEFAULT_VLAN_RETRIES: u32 = 5;

impl Default for AggregateDirectory {
    fn default() -> Self {
        AggregateDirectory {
            api_versions: HashMap::new(),
            dcn_aggregates: HashSet::new(),
            vlan_retries: DEFAULT_VLAN_RETRIES,
        }
    }
}

impl AggregateDirectory {
    pub fn api_version(&self, id: &AggregateId) -> u32 {
        self.api_versions.get(id).copied().unwrap_or(DEFAULT_API_VERSION)
    }

    pub fn is_dcn(&self, id: &AggregateId) -> bool {
        self.dcn_aggregates.contains(id)
    }
}
