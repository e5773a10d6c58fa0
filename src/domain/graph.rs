use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::domain::aggregate::{Aggregate, AggregateDirectory, AggregateState};
use crate::domain::scs::scs::{HopWorkflow, WorkflowResult};
use crate::domain::topology::{HopRef, Topology};
use crate::domain::util::id::{AggregateId, PathId};
use crate::error::{Error, Result};

/// Collapses the hop-level workflow returned by the computation service into
/// an aggregate-level DAG and resolves, per hop, where its VLAN tag comes
/// from.
///
/// Phases:
/// 1. Seed one [`Aggregate`] per distinct owner observed on nodes and hops.
///    Node-only aggregates carry no dependencies and become ready at once.
/// 2. Propagate every cross-aggregate hop dependency to an aggregate edge;
///    same-aggregate ordering stays the aggregate's own concern. Only direct
///    edges are stored: readiness is "all direct dependencies completed".
/// 3. Reject cyclic aggregate graphs; a cycle is fatal for the attempt.
/// 4. Resolve tag-import sources (`import_vlans_from`) on the hops.
pub fn build(
    topology: &mut Topology,
    workflow: &WorkflowResult,
    directory: &AggregateDirectory,
) -> Result<HashMap<AggregateId, Aggregate>> {
    let mut aggregates = seed_aggregates(topology, directory);

    let mut hops_with_deps: HashSet<HopRef> = HashSet::new();
    for (path_id, entries) in &workflow.workflow_data {
        for entry in entries {
            collapse_entry(topology, path_id, entry, &mut aggregates, &mut hops_with_deps)?;
        }
    }

    check_acyclic(&aggregates)?;
    resolve_sibling_imports(topology, &aggregates, &hops_with_deps);

    for aggregate in aggregates.values_mut() {
        aggregate.state = if aggregate.depends_on.is_empty() {
            AggregateState::Ready
        } else {
            AggregateState::Pending
        };
        log::debug!(
            "Aggregate {} starts {:?} ({} hops, {} dependencies)",
            aggregate.id,
            aggregate.state,
            aggregate.hops.len(),
            aggregate.depends_on.len()
        );
    }

    Ok(aggregates)
}

/// Phase 1: one aggregate per owner seen on a node or hop, hop lists in
/// path order, translation capability anded over the owned hops.
fn seed_aggregates(
    topology: &Topology,
    directory: &AggregateDirectory,
) -> HashMap<AggregateId, Aggregate> {
    let mut aggregates: HashMap<AggregateId, Aggregate> = HashMap::new();

    for node in &topology.nodes {
        aggregates
            .entry(node.aggregate.clone())
            .or_insert_with(|| Aggregate::new(node.aggregate.clone(), directory));
    }

    for (hop_ref, hop) in topology.hops() {
        let aggregate = aggregates
            .entry(hop.aggregate.clone())
            .or_insert_with(|| Aggregate::new(hop.aggregate.clone(), directory));
        aggregate.hops.push(hop_ref);
        aggregate.supports_vlan_translation &= hop.vlan_translation;
    }

    aggregates
}

/// Phase 2 + 4a: walks one workflow entry recursively, recording aggregate
/// edges for cross-owner hop dependencies and selecting the tag-import
/// source for importing hops.
fn collapse_entry(
    topology: &mut Topology,
    path_id: &PathId,
    entry: &HopWorkflow,
    aggregates: &mut HashMap<AggregateId, Aggregate>,
    hops_with_deps: &mut HashSet<HopRef>,
) -> Result<()> {
    let hop_ref = HopRef { path: path_id.clone(), hop: entry.hop_id };
    let hop_aggregate = {
        let hop = topology.find_hop(&hop_ref).ok_or_else(|| {
            Error::ParseError(format!(
                "Workflow references unknown hop {} in path '{}'",
                entry.hop_id, path_id
            ))
        })?;
        if hop.aggregate != entry.aggregate {
            log::warn!(
                "Workflow owner {} disagrees with topology owner {} for hop {}/{}",
                entry.aggregate,
                hop.aggregate,
                path_id,
                entry.hop_id
            );
        }
        hop.aggregate.clone()
    };

    if let Some(aggregate) = aggregates.get_mut(&hop_aggregate) {
        if aggregate.urn.is_none() {
            aggregate.urn = Some(entry.aggregate_urn.clone());
        }
    }

    if !entry.dependencies.is_empty() {
        hops_with_deps.insert(hop_ref.clone());
    }

    for dep in &entry.dependencies {
        // Same-aggregate ordering is not propagated to the graph.
        if dep.aggregate != hop_aggregate {
            if let Some(aggregate) = aggregates.get_mut(&hop_aggregate) {
                aggregate.depends_on.insert(dep.aggregate.clone());
            }
        }
        collapse_entry(topology, path_id, dep, aggregates, hops_with_deps)?;
    }

    if entry.import_vlans {
        if let Some(source) = select_import_source(topology, path_id, entry, &hop_aggregate) {
            let hop = topology
                .find_hop_mut(&hop_ref)
                .expect("hop existence checked above");
            hop.import_vlans_from = Some(source);
        } else {
            log::warn!(
                "Hop {}/{} imports VLANs but has no cross-domain dependency",
                path_id,
                entry.hop_id
            );
        }
    }

    Ok(())
}

/// Phase 4: among the entry's cross-domain dependency hops, the one with
/// minimum path distance from the origin supplies the tag; ties break by
/// lowest hop id so the choice is deterministic.
fn select_import_source(
    topology: &Topology,
    path_id: &PathId,
    entry: &HopWorkflow,
    hop_aggregate: &AggregateId,
) -> Option<HopRef> {
    let path = topology.find_path(path_id)?;
    let origin_pos = path.position_of(entry.hop_id)?;

    entry
        .dependencies
        .iter()
        .filter(|dep| &dep.aggregate != hop_aggregate)
        .map(|dep| {
            let distance = path
                .position_of(dep.hop_id)
                .map(|pos| pos.abs_diff(origin_pos))
                .unwrap_or(usize::MAX);
            (distance, dep.hop_id)
        })
        .min()
        .map(|(_, hop_id)| HopRef { path: path_id.clone(), hop: hop_id })
}

/// Phase 4b: a dependency-free hop at a non-translating aggregate must carry
/// the same tag as its siblings, so it inherits the import reference of a
/// sibling hop (same path, same aggregate) that has one.
fn resolve_sibling_imports(
    topology: &mut Topology,
    aggregates: &HashMap<AggregateId, Aggregate>,
    hops_with_deps: &HashSet<HopRef>,
) {
    let mut inherited: Vec<(HopRef, HopRef)> = Vec::new();

    for (hop_ref, hop) in topology.hops() {
        if hop.import_vlans_from.is_some() || hops_with_deps.contains(&hop_ref) {
            continue;
        }
        let translates = aggregates
            .get(&hop.aggregate)
            .map(|a| a.supports_vlan_translation)
            .unwrap_or(false);
        if translates {
            continue;
        }

        let path = match topology.find_path(&hop_ref.path) {
            Some(path) => path,
            None => continue,
        };
        let sibling_import = path
            .hops
            .iter()
            .filter(|h| h.id != hop.id && h.aggregate == hop.aggregate)
            .find_map(|h| h.import_vlans_from.clone());
        if let Some(source) = sibling_import {
            inherited.push((hop_ref, source));
        }
    }

    for (hop_ref, source) in inherited {
        log::debug!(
            "Hop {}/{} inherits tag import from sibling source {}/{}",
            hop_ref.path,
            hop_ref.hop,
            source.path,
            source.hop
        );
        if let Some(hop) = topology.find_hop_mut(&hop_ref) {
            hop.import_vlans_from = Some(source);
        }
    }
}

/// Phase 3: topological-sort attempt over the aggregate edges; an unsortable
/// graph fails with the cycle member that petgraph reports.
fn check_acyclic(aggregates: &HashMap<AggregateId, Aggregate>) -> Result<()> {
    let mut graph: DiGraph<AggregateId, ()> = DiGraph::new();
    let mut indices: HashMap<&AggregateId, NodeIndex> = HashMap::new();

    for id in aggregates.keys() {
        indices.insert(id, graph.add_node(id.clone()));
    }
    for aggregate in aggregates.values() {
        for dep in &aggregate.depends_on {
            if let Some(&dep_index) = indices.get(dep) {
                graph.add_edge(indices[&aggregate.id], dep_index, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| Error::DependencyCycleError(graph[cycle.node_id()].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scs::scs::WorkflowResult;
    use crate::domain::topology::{Hop, Node, Path, Stitching};
    use crate::domain::util::id::NodeId;
    use crate::domain::vlan::VlanRange;

    const AM_A: &str = "https://am-a.example.net";
    const AM_B: &str = "https://am-b.example.net";
    const AM_C: &str = "https://am-c.example.net";

    fn hop(id: u32, aggregate: &str, translation: bool) -> Hop {
        Hop {
            id,
            aggregate: AggregateId::new(aggregate),
            vlan_range: VlanRange::from_spec("100-200").unwrap(),
            suggested_vlan: None,
            vlan_translation: translation,
            import_vlans_from: None,
        }
    }

    fn topology_with_path(path_id: &str, hops: Vec<Hop>) -> Topology {
        Topology {
            nodes: hops
                .iter()
                .map(|h| Node {
                    client_id: NodeId::new(format!("host-{}", h.id)),
                    aggregate: h.aggregate.clone(),
                })
                .collect(),
            links: Vec::new(),
            stitching: Some(Stitching {
                paths: vec![Path { id: PathId::new(path_id), hops }],
            }),
        }
    }

    fn entry(aggregate: &str, hop_id: u32, import: bool, deps: Vec<HopWorkflow>) -> HopWorkflow {
        HopWorkflow {
            aggregate_urn: format!("urn:publicid:IDN+{}", aggregate),
            aggregate: AggregateId::new(aggregate),
            hop_id,
            import_vlans: import,
            dependencies: deps,
        }
    }

    fn workflow(path_id: &str, entries: Vec<HopWorkflow>) -> WorkflowResult {
        let mut workflow_data = HashMap::new();
        workflow_data.insert(PathId::new(path_id), entries);
        WorkflowResult { service_rspec: String::new(), workflow_data }
    }

    #[test]
    fn test_cross_aggregate_edges_are_collapsed() {
        let mut topology =
            topology_with_path("p", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
        let wf = workflow("p", vec![entry(AM_B, 2, true, vec![entry(AM_A, 1, false, vec![])])]);

        let aggregates = build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        assert_eq!(aggregates.len(), 2);
        let b = &aggregates[&AggregateId::new(AM_B)];
        assert!(b.depends_on.contains(&AggregateId::new(AM_A)));
        assert_eq!(b.state, AggregateState::Pending);
        let a = &aggregates[&AggregateId::new(AM_A)];
        assert!(a.depends_on.is_empty());
        assert_eq!(a.state, AggregateState::Ready);
    }

    #[test]
    fn test_same_aggregate_edges_are_not_propagated() {
        let mut topology =
            topology_with_path("p", vec![hop(1, AM_A, false), hop(2, AM_A, false)]);
        let wf = workflow("p", vec![entry(AM_A, 2, false, vec![entry(AM_A, 1, false, vec![])])]);

        let aggregates = build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        assert_eq!(aggregates.len(), 1);
        let a = &aggregates[&AggregateId::new(AM_A)];
        assert!(a.depends_on.is_empty());
        assert_eq!(a.state, AggregateState::Ready);
    }

    #[test]
    fn test_cycle_is_rejected_with_dependency_cycle_error() {
        let mut topology =
            topology_with_path("p", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
        let wf = workflow(
            "p",
            vec![
                entry(AM_B, 2, false, vec![entry(AM_A, 1, false, vec![])]),
                entry(AM_A, 1, false, vec![entry(AM_B, 2, false, vec![])]),
            ],
        );

        let err = build(&mut topology, &wf, &AggregateDirectory::default()).unwrap_err();
        assert!(matches!(err, Error::DependencyCycleError(_)));
    }

    #[test]
    fn test_import_source_prefers_minimum_path_distance() {
        let mut topology = topology_with_path(
            "p",
            vec![hop(1, AM_A, false), hop(2, AM_B, false), hop(3, AM_C, false)],
        );
        // Hop 3 depends on hops 1 and 2; hop 2 is closer along the path.
        let wf = workflow(
            "p",
            vec![entry(
                AM_C,
                3,
                true,
                vec![entry(AM_A, 1, false, vec![]), entry(AM_B, 2, false, vec![])],
            )],
        );

        build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        let hop3 = topology
            .find_hop(&HopRef { path: PathId::new("p"), hop: 3 })
            .unwrap();
        assert_eq!(
            hop3.import_vlans_from,
            Some(HopRef { path: PathId::new("p"), hop: 2 })
        );
    }

    #[test]
    fn test_import_source_tie_breaks_by_lowest_hop_id() {
        // Hops 1 and 3 sit at equal distance from hop 2.
        let mut topology = topology_with_path(
            "p",
            vec![hop(1, AM_A, false), hop(2, AM_B, false), hop(3, AM_C, false)],
        );
        let wf = workflow(
            "p",
            vec![entry(
                AM_B,
                2,
                true,
                vec![entry(AM_C, 3, false, vec![]), entry(AM_A, 1, false, vec![])],
            )],
        );

        build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        let hop2 = topology
            .find_hop(&HopRef { path: PathId::new("p"), hop: 2 })
            .unwrap();
        assert_eq!(
            hop2.import_vlans_from,
            Some(HopRef { path: PathId::new("p"), hop: 1 })
        );
    }

    #[test]
    fn test_dependency_free_hop_inherits_sibling_import() {
        // AM_B owns hops 2 and 3 and cannot translate; hop 2 imports from
        // hop 1, so hop 3 must share that source.
        let mut topology = topology_with_path(
            "p",
            vec![hop(1, AM_A, false), hop(2, AM_B, false), hop(3, AM_B, false)],
        );
        let wf = workflow("p", vec![entry(AM_B, 2, true, vec![entry(AM_A, 1, false, vec![])])]);

        build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        let hop3 = topology
            .find_hop(&HopRef { path: PathId::new("p"), hop: 3 })
            .unwrap();
        assert_eq!(
            hop3.import_vlans_from,
            Some(HopRef { path: PathId::new("p"), hop: 1 })
        );
    }

    #[test]
    fn test_translating_aggregate_does_not_inherit_imports() {
        let mut topology = topology_with_path(
            "p",
            vec![hop(1, AM_A, false), hop(2, AM_B, true), hop(3, AM_B, true)],
        );
        let wf = workflow("p", vec![entry(AM_B, 2, true, vec![entry(AM_A, 1, false, vec![])])]);

        build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        let hop3 = topology
            .find_hop(&HopRef { path: PathId::new("p"), hop: 3 })
            .unwrap();
        assert_eq!(hop3.import_vlans_from, None);
    }

    #[test]
    fn test_node_only_aggregates_are_seeded_ready() {
        let mut topology = Topology {
            nodes: vec![
                Node { client_id: NodeId::new("host-a"), aggregate: AggregateId::new(AM_A) },
                Node { client_id: NodeId::new("host-b"), aggregate: AggregateId::new(AM_B) },
            ],
            links: Vec::new(),
            stitching: None,
        };
        let wf = WorkflowResult { service_rspec: String::new(), workflow_data: HashMap::new() };

        let aggregates = build(&mut topology, &wf, &AggregateDirectory::default()).unwrap();

        assert_eq!(aggregates.len(), 2);
        assert!(aggregates.values().all(|a| a.state == AggregateState::Ready));
        assert!(aggregates.values().all(|a| a.hops.is_empty()));
    }

    #[test]
    fn test_unknown_hop_in_workflow_is_a_parse_error() {
        let mut topology = topology_with_path("p", vec![hop(1, AM_A, false)]);
        let wf = workflow("p", vec![entry(AM_A, 99, false, vec![])]);

        assert!(matches!(
            build(&mut topology, &wf, &AggregateDirectory::default()),
            Err(Error::ParseError(_))
        ));
    }
}
