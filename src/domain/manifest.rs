use std::collections::HashMap;

use crate::domain::aggregate::{Aggregate, AggregateState};
use crate::domain::topology::{HopRef, Topology};
use crate::domain::util::id::AggregateId;
use crate::error::{Error, Result};

/// Merges the completed aggregates' manifest fragments into one document.
///
/// Every node, link and hop of the template is replaced in place by the
/// matching element from the fragment of the aggregate that owns it: nodes
/// and links are matched by client id (a spanning link is sourced from the
/// first aggregate in its reference list), hops by numeric id within the
/// matching path. Template order is kept, so hop replacement preserves path
/// order and every request client id appears exactly once in the output.
///
/// Pure function of its inputs: combining the same fragments with the same
/// template again yields a byte-identical serialized document.
pub fn combine(
    aggregates: &HashMap<AggregateId, Aggregate>,
    template: &Topology,
) -> Result<Topology> {
    let mut combined = template.clone();

    for node in &mut combined.nodes {
        let fragment = completed_fragment(aggregates, &node.aggregate, "node", node.client_id.as_str())?;
        *node = fragment
            .find_node(&node.client_id)
            .ok_or_else(|| {
                Error::ManifestMergeError(format!(
                    "Fragment of {} is missing node '{}'",
                    node.aggregate, node.client_id
                ))
            })?
            .clone();
    }

    for link in &mut combined.links {
        let owner = link
            .aggregates
            .first()
            .ok_or_else(|| {
                Error::ManifestMergeError(format!(
                    "Link '{}' names no owning aggregate",
                    link.client_id
                ))
            })?
            .clone();
        let fragment = completed_fragment(aggregates, &owner, "link", link.client_id.as_str())?;
        *link = fragment
            .find_link(&link.client_id)
            .ok_or_else(|| {
                Error::ManifestMergeError(format!(
                    "Fragment of {} is missing link '{}'",
                    owner, link.client_id
                ))
            })?
            .clone();
    }

    if let Some(stitching) = &mut combined.stitching {
        for path in &mut stitching.paths {
            for hop in &mut path.hops {
                let hop_ref = HopRef { path: path.id.clone(), hop: hop.id };
                let fragment = completed_fragment(
                    aggregates,
                    &hop.aggregate,
                    "hop",
                    &format!("{}/{}", hop_ref.path, hop_ref.hop),
                )?;
                *hop = fragment
                    .find_hop(&hop_ref)
                    .ok_or_else(|| {
                        Error::ManifestMergeError(format!(
                            "Fragment of {} is missing hop {}/{}",
                            hop.aggregate, hop_ref.path, hop_ref.hop
                        ))
                    })?
                    .clone();
            }
        }
    }

    Ok(combined)
}

fn completed_fragment<'a>(
    aggregates: &'a HashMap<AggregateId, Aggregate>,
    owner: &AggregateId,
    element: &str,
    id: &str,
) -> Result<&'a Topology> {
    let aggregate = aggregates.get(owner).ok_or_else(|| {
        Error::ManifestMergeError(format!(
            "No aggregate {} known for {} '{}'",
            owner, element, id
        ))
    })?;
    if aggregate.state != AggregateState::Completed {
        return Err(Error::ManifestMergeError(format!(
            "Aggregate {} owning {} '{}' is {:?}, not completed",
            owner, element, id, aggregate.state
        )));
    }
    aggregate.manifest.as_ref().ok_or_else(|| {
        Error::ManifestMergeError(format!(
            "Aggregate {} completed without a manifest fragment",
            owner
        ))
    })
}
