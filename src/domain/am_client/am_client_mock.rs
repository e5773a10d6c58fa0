use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::domain::am_client::am_client::{AggregateClient, ReserveError, ReserveRequest};
use crate::domain::topology::Topology;
use crate::domain::util::id::{AggregateId, SliceId};
use crate::domain::vlan::VlanRange;

/// Scripted outcome for one reservation call at one aggregate.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed and return a manifest fragment with assigned tags.
    Reserve,
    /// Reject the suggested tag as taken.
    VlanConflict,
    /// Declare the circuit infeasible through this aggregate.
    CircuitFailed,
    Fatal(String),
}

/// Test double for the AM API client.
///
/// Serves manifests cut from an expanded-topology template: the fragment for
/// an aggregate is the template with that aggregate's hops collapsed to
/// their assigned tag (the suggested tag, else the lowest available one).
/// Records call order and peak concurrency so scheduler invariants are
/// observable.
pub struct MockAggregateClient {
    template: Topology,
    scripts: Mutex<HashMap<AggregateId, VecDeque<MockOutcome>>>,
    call_order: Mutex<Vec<AggregateId>>,
    deleted: Mutex<Vec<AggregateId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Duration,
    /// When set, every reserve call waits on this barrier before returning,
    /// so a test can require N calls to be in flight at once.
    barrier: Option<Arc<Barrier>>,
}

impl MockAggregateClient {
    pub fn new(template: Topology) -> Self {
        MockAggregateClient {
            template,
            scripts: Mutex::new(HashMap::new()),
            call_order: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            barrier: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Queues outcomes for an aggregate; unscripted calls succeed.
    pub fn script(&self, aggregate: &AggregateId, outcomes: Vec<MockOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(aggregate.clone(), outcomes.into_iter().collect());
    }

    pub fn reserve_order(&self) -> Vec<AggregateId> {
        self.call_order.lock().unwrap().clone()
    }

    pub fn reserve_count(&self) -> usize {
        self.call_order.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<AggregateId> {
        self.deleted.lock().unwrap().clone()
    }

    fn next_outcome(&self, aggregate: &AggregateId) -> MockOutcome {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(aggregate)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(MockOutcome::Reserve)
    }

    fn fragment_for(&self, request: &ReserveRequest) -> Result<Topology, ReserveError> {
        let mut fragment = self.template.clone();
        for hop_request in &request.hops {
            let tag = hop_request
                .suggested_vlan
                .or_else(|| hop_request.vlan_range.min())
                .ok_or_else(|| ReserveError::CircuitFailed {
                    reason: format!("Hop {}/{} has no usable tag", hop_request.hop.path, hop_request.hop.hop),
                })?;
            let hop = fragment.find_hop_mut(&hop_request.hop).ok_or_else(|| {
                ReserveError::Fatal(format!(
                    "Request references hop {}/{} missing from template",
                    hop_request.hop.path, hop_request.hop.hop
                ))
            })?;
            hop.vlan_range = VlanRange::from_value(tag)
                .map_err(|e| ReserveError::Fatal(e.to_string()))?;
            hop.suggested_vlan = Some(tag);
        }
        Ok(fragment)
    }
}

#[async_trait]
impl AggregateClient for MockAggregateClient {
    async fn reserve(
        &self,
        _slice: &SliceId,
        request: ReserveRequest,
    ) -> Result<Topology, ReserveError> {
        self.call_order.lock().unwrap().push(request.aggregate.clone());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match self.next_outcome(&request.aggregate) {
            MockOutcome::Reserve => self.fragment_for(&request),
            MockOutcome::VlanConflict => {
                let tag = request
                    .hops
                    .first()
                    .and_then(|h| h.suggested_vlan.or_else(|| h.vlan_range.min()))
                    .unwrap_or(0);
                Err(ReserveError::VlanConflict { tag })
            }
            MockOutcome::CircuitFailed => Err(ReserveError::CircuitFailed {
                reason: "Scripted circuit failure".to_string(),
            }),
            MockOutcome::Fatal(reason) => Err(ReserveError::Fatal(reason)),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, _slice: &SliceId, aggregate: &AggregateId) -> Result<(), ReserveError> {
        self.deleted.lock().unwrap().push(aggregate.clone());
        Ok(())
    }
}
