use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::api::scs_dto::ScsOptionsDto;
use crate::domain::aggregate::{Aggregate, AggregateDirectory};
use crate::domain::am_client::am_client::AggregateClient;
use crate::domain::graph;
use crate::domain::launcher::{Launcher, LauncherConfig};
use crate::domain::manifest;
use crate::domain::scs::scs::ScsClient;
use crate::domain::topology::Topology;
use crate::domain::util::id::{AggregateId, SliceId};
use crate::error::{Error, Result};
use crate::loader::rspec;

/// Session-level knobs. All coordination state lives in the session that is
/// running; nothing is process-global.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the whole pipeline may run (initial attempt included).
    pub max_attempts: u32,
    pub launcher: LauncherConfig,
    pub directory: AggregateDirectory,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_attempts: 3,
            launcher: LauncherConfig::default(),
            directory: AggregateDirectory::default(),
        }
    }
}

/// Orchestrates one stitched reservation end to end: computation service,
/// dependency graph, launcher, manifest combination.
///
/// A circuit-level failure re-invokes the computation service with the
/// failed hops excluded and retries the whole sequence, bounded by
/// `max_attempts`. A service failure also consumes an attempt. Everything
/// else aborts immediately; aggregates that completed stay reserved, and
/// rolling them back (the client's `delete`) is the caller's decision.
pub struct StitchingSession {
    scs: Arc<dyn ScsClient>,
    am_client: Arc<dyn AggregateClient>,
    config: SessionConfig,
}

impl StitchingSession {
    pub fn new(
        scs: Arc<dyn ScsClient>,
        am_client: Arc<dyn AggregateClient>,
        config: SessionConfig,
    ) -> Self {
        StitchingSession { scs, am_client, config }
    }

    pub async fn run(&self, slice: &SliceId, request: &Topology) -> Result<Topology> {
        let request_rspec = rspec::to_xml(request)?;
        let mut options = ScsOptionsDto::default();
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.config.max_attempts {
            let run_id = Uuid::new_v4();
            log::info!(
                "Stitching attempt {}/{} for slice {} (run {})",
                attempt,
                self.config.max_attempts,
                slice,
                run_id
            );

            let workflow = match self
                .scs
                .compute_path(slice, &request_rspec, &options)
                .await
            {
                Ok(workflow) => workflow,
                Err(error @ Error::ServiceFailedError { .. }) => {
                    log::warn!("Computation service failed on attempt {}: {}", attempt, error);
                    last_error = Some(error);
                    continue;
                }
                Err(error) => return Err(error),
            };

            let mut topology = rspec::parse(&workflow.service_rspec)?;
            let mut aggregates =
                graph::build(&mut topology, &workflow, &self.config.directory)?;
            log::info!(
                "Workflow has {} aggregates across {} paths",
                aggregates.len(),
                topology.stitching.as_ref().map(|s| s.paths.len()).unwrap_or(0)
            );

            let launcher = Launcher::new(
                slice.clone(),
                &mut topology,
                &mut aggregates,
                Arc::clone(&self.am_client),
                self.config.launcher.clone(),
            );
            match launcher.run().await {
                Ok(()) => {
                    let combined = manifest::combine(&aggregates, &topology)?;
                    log::info!("Slice {} stitched after {} attempt(s)", slice, attempt);
                    return Ok(combined);
                }
                Err(error @ Error::CircuitFailedError { .. }) => {
                    if let Error::CircuitFailedError { aggregate, .. } = &error {
                        exclude_aggregate_hops(&mut options, &aggregates, aggregate);
                        log::warn!(
                            "Circuit failed through {}; recomputing with {} excluded hop(s)",
                            aggregate,
                            options.hop_exclusion_list.len()
                        );
                    }
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        log::error!(
            "Slice {} not stitched within {} attempts",
            slice,
            self.config.max_attempts
        );
        Err(last_error.unwrap_or(Error::ServiceFailedError {
            code: -1,
            output: "Attempt budget exhausted".to_string(),
        }))
    }
}

/// Appends the failing aggregate's hops (as `<path>/<hop id>` urns) to the
/// exclusion list for the next computation.
fn exclude_aggregate_hops(
    options: &mut ScsOptionsDto,
    aggregates: &HashMap<AggregateId, Aggregate>,
    failed: &AggregateId,
) {
    if let Some(aggregate) = aggregates.get(failed) {
        for hop_ref in &aggregate.hops {
            let urn = format!("{}/{}", hop_ref.path, hop_ref.hop);
            if !options.hop_exclusion_list.contains(&urn) {
                options.hop_exclusion_list.push(urn);
            }
        }
    }
}
