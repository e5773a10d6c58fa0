use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::aggregate::{Aggregate, AggregateState};
use crate::domain::am_client::am_client::{
    AggregateClient, HopRequest, ReserveError, ReserveRequest,
};
use crate::domain::topology::{HopRef, Topology};
use crate::domain::util::id::{AggregateId, PathId, SliceId};
use crate::domain::vlan::VlanRange;
use crate::error::{Error, Result};

/// Pauses and budgets for the reservation loop.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Pause before retrying an ordinary aggregate after a VLAN conflict.
    pub retry_pause: Duration,
    /// Pause for DCN-class aggregates, which need a long teardown before a
    /// conflicting tag can be retried.
    pub dcn_retry_pause: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        LauncherConfig {
            retry_pause: Duration::from_secs(30),
            dcn_retry_pause: Duration::from_secs(600),
        }
    }
}

/// What a dispatched task (reservation call or retry timer) reports back to
/// the scheduler loop. All aggregate state is mutated by the loop alone.
#[derive(Debug)]
enum LauncherEvent {
    Reserved { aggregate: AggregateId, manifest: Topology },
    ReserveFailed { aggregate: AggregateId, error: ReserveError },
    RetryDue { aggregate: AggregateId },
}

/// Drives the reservations of one workflow attempt.
///
/// The loop repeatedly promotes aggregates whose direct dependencies are all
/// completed, dispatches one concurrent reservation task per ready
/// aggregate, and applies every state transition itself from the events the
/// tasks send over one channel. An aggregate is never dispatched before all
/// of its dependencies are completed and their assigned tags are readable
/// from their manifests; that ordering guarantee is the point of this loop.
///
/// There is no mid-flight cancellation: once dispatched, a reservation call
/// runs to completion or error. On a fatal error the loop stops dispatching
/// and returns; completed aggregates stay reserved for the caller to keep
/// or delete.
pub struct Launcher<'a> {
    slice: SliceId,
    topology: &'a mut Topology,
    aggregates: &'a mut HashMap<AggregateId, Aggregate>,
    client: Arc<dyn AggregateClient>,
    config: LauncherConfig,
    in_flight: usize,
}

impl<'a> Launcher<'a> {
    pub fn new(
        slice: SliceId,
        topology: &'a mut Topology,
        aggregates: &'a mut HashMap<AggregateId, Aggregate>,
        client: Arc<dyn AggregateClient>,
        config: LauncherConfig,
    ) -> Self {
        Launcher { slice, topology, aggregates, client, config, in_flight: 0 }
    }

    pub async fn run(mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        loop {
            self.promote_ready();
            self.dispatch_ready(&tx)?;

            if self.all_completed() {
                log::info!(
                    "All {} aggregates completed for slice {}",
                    self.aggregates.len(),
                    self.slice
                );
                return Ok(());
            }

            if self.in_flight == 0 {
                // Nothing runs, nothing is ready, yet work remains: a
                // dependency can no longer be satisfied.
                let stuck = self
                    .aggregates
                    .values()
                    .find(|a| a.state == AggregateState::Pending)
                    .map(|a| a.id.clone())
                    .unwrap_or_else(|| AggregateId::new("unknown"));
                log::error!("Launcher stalled; aggregate {} cannot become ready", stuck);
                return Err(Error::DependencyCycleError(stuck));
            }

            let event = rx.recv().await.expect("launcher holds a sender");
            self.in_flight -= 1;
            self.apply(event, &tx)?;
        }
    }

    /// `Pending → Ready` for every aggregate whose direct dependencies are
    /// all completed.
    fn promote_ready(&mut self) {
        let completed: Vec<AggregateId> = self
            .aggregates
            .values()
            .filter(|a| a.state == AggregateState::Completed)
            .map(|a| a.id.clone())
            .collect();

        for aggregate in self.aggregates.values_mut() {
            if aggregate.state == AggregateState::Pending
                && aggregate.depends_on.iter().all(|dep| completed.contains(dep))
            {
                log::debug!("Aggregate {} is ready", aggregate.id);
                aggregate.state = AggregateState::Ready;
            }
        }
    }

    /// Dispatches one reservation task per ready aggregate.
    fn dispatch_ready(
        &mut self,
        tx: &mpsc::UnboundedSender<LauncherEvent>,
    ) -> Result<()> {
        let ready: Vec<AggregateId> = self
            .aggregates
            .values()
            .filter(|a| a.state == AggregateState::Ready)
            .map(|a| a.id.clone())
            .collect();

        for id in ready {
            let request = self.build_request(&id)?;
            let aggregate = self
                .aggregates
                .get_mut(&id)
                .expect("ready set comes from the aggregate map");
            aggregate.state = AggregateState::Reserving;
            self.in_flight += 1;
            log::info!(
                "Dispatching reservation at {} (API v{}, {} hops)",
                id,
                aggregate.api_version,
                request.hops.len()
            );

            let client = Arc::clone(&self.client);
            let slice = self.slice.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let event = match client.reserve(&slice, request).await {
                    Ok(manifest) => LauncherEvent::Reserved { aggregate: id, manifest },
                    Err(error) => LauncherEvent::ReserveFailed { aggregate: id, error },
                };
                let _ = tx.send(event);
            });
        }
        Ok(())
    }

    /// Assembles the self-contained reservation request for one aggregate,
    /// resolving imported tags out of the completed dependencies' manifests.
    fn build_request(&self, id: &AggregateId) -> Result<ReserveRequest> {
        let aggregate = &self.aggregates[id];
        let mut hops = Vec::with_capacity(aggregate.hops.len());

        for hop_ref in &aggregate.hops {
            let hop = self.topology.find_hop(hop_ref).ok_or_else(|| {
                Error::ParseError(format!(
                    "Aggregate {} references unknown hop {}/{}",
                    id, hop_ref.path, hop_ref.hop
                ))
            })?;

            if hop.vlan_range.is_empty() {
                return Err(Error::CircuitFailedError {
                    aggregate: id.clone(),
                    path: Some(hop_ref.path.clone()),
                    reason: format!("Hop {} has no tag left to try", hop_ref.hop),
                });
            }

            let suggested = match &hop.import_vlans_from {
                Some(source) => {
                    let tag = self.assigned_tag(source)?;
                    if hop.vlan_range.contains(tag) {
                        Some(tag)
                    } else if hop.vlan_translation {
                        // The device can translate, so any own tag works.
                        hop.vlan_range.pick()
                    } else {
                        return Err(Error::CircuitFailedError {
                            aggregate: id.clone(),
                            path: Some(hop_ref.path.clone()),
                            reason: format!(
                                "Imported tag {} is outside hop {}'s range {}",
                                tag, hop_ref.hop, hop.vlan_range
                            ),
                        });
                    }
                }
                None => hop
                    .suggested_vlan
                    .filter(|tag| hop.vlan_range.contains(*tag))
                    .or_else(|| hop.vlan_range.pick()),
            };

            hops.push(HopRequest {
                hop: hop_ref.clone(),
                vlan_range: hop.vlan_range.clone(),
                suggested_vlan: suggested,
            });
        }

        Ok(ReserveRequest {
            aggregate: id.clone(),
            api_version: aggregate.api_version,
            hops,
        })
    }

    /// Reads the tag a completed aggregate assigned to the given hop.
    fn assigned_tag(&self, source: &HopRef) -> Result<u16> {
        let owner = self
            .topology
            .find_hop(source)
            .map(|h| h.aggregate.clone())
            .ok_or_else(|| {
                Error::ParseError(format!(
                    "Tag import source {}/{} does not exist",
                    source.path, source.hop
                ))
            })?;
        let aggregate = self.aggregates.get(&owner).ok_or_else(|| {
            Error::ReservationError {
                aggregate: owner.clone(),
                reason: "Import source owner is not part of the workflow".to_string(),
            }
        })?;
        let manifest = aggregate.manifest.as_ref().ok_or_else(|| {
            Error::ReservationError {
                aggregate: owner.clone(),
                reason: format!(
                    "Tag import source {}/{} reserved before its owner completed",
                    source.path, source.hop
                ),
            }
        })?;
        let hop = manifest.find_hop(source).ok_or_else(|| {
            Error::ManifestMergeError(format!(
                "Manifest of {} is missing hop {}/{}",
                owner, source.path, source.hop
            ))
        })?;

        hop.vlan_range
            .single()
            .or(hop.suggested_vlan)
            .or_else(|| {
                log::warn!(
                    "Manifest of {} reports range {} for hop {}/{}, taking lowest",
                    owner,
                    hop.vlan_range,
                    source.path,
                    source.hop
                );
                hop.vlan_range.min()
            })
            .ok_or_else(|| {
                Error::ManifestMergeError(format!(
                    "Manifest of {} assigns no tag to hop {}/{}",
                    owner, source.path, source.hop
                ))
            })
    }

    fn apply(
        &mut self,
        event: LauncherEvent,
        tx: &mpsc::UnboundedSender<LauncherEvent>,
    ) -> Result<()> {
        match event {
            LauncherEvent::Reserved { aggregate: id, manifest } => {
                let aggregate = self.aggregate_mut(&id)?;
                aggregate.manifest = Some(manifest);
                aggregate.state = AggregateState::Completed;
                let done = self
                    .aggregates
                    .values()
                    .filter(|a| a.state == AggregateState::Completed)
                    .count();
                log::info!(
                    "Aggregate {} completed ({}/{})",
                    id,
                    done,
                    self.aggregates.len()
                );
                Ok(())
            }
            LauncherEvent::RetryDue { aggregate: id } => {
                log::info!("Retry pause for {} is over", id);
                self.aggregate_mut(&id)?.state = AggregateState::Ready;
                Ok(())
            }
            LauncherEvent::ReserveFailed { aggregate: id, error } => {
                self.handle_failure(id, error, tx)
            }
        }
    }

    fn handle_failure(
        &mut self,
        id: AggregateId,
        error: ReserveError,
        tx: &mpsc::UnboundedSender<LauncherEvent>,
    ) -> Result<()> {
        match error {
            ReserveError::VlanConflict { tag } => self.handle_vlan_conflict(id, tag, tx),
            ReserveError::CircuitFailed { reason } => {
                let path = self.first_path_of(&id);
                self.aggregate_mut(&id)?.state = AggregateState::Failed;
                self.report_partial_progress(&id);
                Err(Error::CircuitFailedError { aggregate: id, path, reason })
            }
            ReserveError::Fatal(reason) => {
                self.aggregate_mut(&id)?.state = AggregateState::Failed;
                self.report_partial_progress(&id);
                Err(Error::ReservationError { aggregate: id, reason })
            }
        }
    }

    /// A conflicted tag is withdrawn from the aggregate's hop ranges and the
    /// aggregate re-queued after its pause; only a drained range or an
    /// exhausted budget escalates to a circuit failure.
    fn handle_vlan_conflict(
        &mut self,
        id: AggregateId,
        tag: u16,
        tx: &mpsc::UnboundedSender<LauncherEvent>,
    ) -> Result<()> {
        let (is_dcn, retries_left, hop_refs) = {
            let aggregate = self.aggregate_mut(&id)?;
            (aggregate.is_dcn, aggregate.vlan_retries_left, aggregate.hops.clone())
        };

        if retries_left == 0 {
            self.aggregate_mut(&id)?.state = AggregateState::Failed;
            self.report_partial_progress(&id);
            return Err(Error::CircuitFailedError {
                aggregate: id,
                path: hop_refs.first().map(|h| h.path.clone()),
                reason: format!("VLAN retry budget exhausted, last conflicting tag {}", tag),
            });
        }

        let conflicted = VlanRange::from_value(tag)?;
        for hop_ref in &hop_refs {
            if let Some(hop) = self.topology.find_hop_mut(hop_ref) {
                if hop.vlan_range.contains(tag) {
                    hop.vlan_range = hop.vlan_range.difference(&conflicted);
                }
                hop.suggested_vlan = None;
                if hop.vlan_range.is_empty() {
                    self.aggregate_mut(&id)?.state = AggregateState::Failed;
                    self.report_partial_progress(&id);
                    return Err(Error::CircuitFailedError {
                        aggregate: id,
                        path: Some(hop_ref.path.clone()),
                        reason: format!("Hop {} has no tag left after conflicts", hop_ref.hop),
                    });
                }
            }
        }

        let pause = if is_dcn {
            self.config.dcn_retry_pause
        } else {
            self.config.retry_pause
        };
        {
            let aggregate = self.aggregate_mut(&id)?;
            aggregate.vlan_retries_left -= 1;
            log::warn!(
                "VLAN tag {} conflicted at {}; retrying in {:?} ({} retries left)",
                tag,
                id,
                pause,
                aggregate.vlan_retries_left
            );
        }

        // The pause runs as a timer task so the loop keeps scheduling
        // other aggregates meanwhile. The aggregate stays Reserving until
        // the timer fires.
        self.in_flight += 1;
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            let _ = tx.send(LauncherEvent::RetryDue { aggregate: id });
        });
        Ok(())
    }

    fn aggregate_mut(&mut self, id: &AggregateId) -> Result<&mut Aggregate> {
        self.aggregates.get_mut(id).ok_or_else(|| Error::ReservationError {
            aggregate: id.clone(),
            reason: "Unknown aggregate reported an event".to_string(),
        })
    }

    fn first_path_of(&self, id: &AggregateId) -> Option<PathId> {
        self.aggregates
            .get(id)
            .and_then(|a| a.hops.first())
            .map(|h| h.path.clone())
    }

    fn all_completed(&self) -> bool {
        self.aggregates
            .values()
            .all(|a| a.state == AggregateState::Completed)
    }

    /// Partial progress is always reported: which aggregates hold completed
    /// reservations when a workflow dies.
    fn report_partial_progress(&self, failed: &AggregateId) {
        let completed: Vec<String> = self
            .aggregates
            .values()
            .filter(|a| a.state == AggregateState::Completed)
            .map(|a| a.id.to_string())
            .collect();
        log::error!(
            "Workflow failed at {}; {} aggregates remain reserved: [{}]",
            failed,
            completed.len(),
            completed.join(", ")
        );
    }
}
