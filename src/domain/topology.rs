use std::collections::HashSet;

use crate::domain::util::id::{AggregateId, LinkId, NodeId, PathId};
use crate::domain::vlan::VlanRange;
use crate::error::{Error, Result};

/// A parsed rspec document: the request, the expanded topology returned by
/// the computation service, and every manifest fragment all share this shape.
///
/// Owns all child entities exclusively. Immutable once parsed, except for the
/// in-place element replacement performed by the manifest combiner.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub stitching: Option<Stitching>,
}

/// A compute resource bound to one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique within a topology.
    pub client_id: NodeId,
    pub aggregate: AggregateId,
}

/// A network link, possibly spanning several aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub client_id: LinkId,
    /// Participating aggregates in document order. The first entry is the
    /// aggregate the combined manifest sources this link from.
    pub aggregates: Vec<AggregateId>,
}

/// The stitching extension: one or more end-to-end circuit paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Stitching {
    pub paths: Vec<Path>,
}

/// An ordered sequence of hops describing one circuit segment.
/// Hop order along the path is the physical sequence of the circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub id: PathId,
    pub hops: Vec<Hop>,
}

/// One aggregate-local segment of a stitched circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Unique within its path.
    pub id: u32,
    /// The owning aggregate. A hop belongs to exactly one aggregate.
    pub aggregate: AggregateId,
    /// Tags this hop can carry. In a manifest fragment this has collapsed to
    /// the single assigned tag.
    pub vlan_range: VlanRange,
    /// Tag suggested to the aggregate; `None` means "any".
    pub suggested_vlan: Option<u16>,
    /// Whether the owning device can translate between distinct tags here.
    pub vlan_translation: bool,
    /// Set by the dependency graph builder: the upstream hop this one
    /// imports its tag from.
    pub import_vlans_from: Option<HopRef>,
}

/// Stable reference to a hop: path id plus hop id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HopRef {
    pub path: PathId,
    pub hop: u32,
}

impl Topology {
    /// Validates cross-entity invariants after parsing: node client ids are
    /// unique within the topology, hop ids are unique within each path.
    pub fn validate(&self) -> Result<()> {
        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(&node.client_id) {
                return Err(Error::ParseError(format!(
                    "Duplicate node client_id '{}'",
                    node.client_id
                )));
            }
        }

        if let Some(stitching) = &self.stitching {
            for path in &stitching.paths {
                let mut hop_ids = HashSet::new();
                for hop in &path.hops {
                    if !hop_ids.insert(hop.id) {
                        return Err(Error::ParseError(format!(
                            "Duplicate hop id {} in path '{}'",
                            hop.id, path.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn find_node(&self, client_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.client_id == client_id)
    }

    pub fn find_link(&self, client_id: &LinkId) -> Option<&Link> {
        self.links.iter().find(|l| &l.client_id == client_id)
    }

    pub fn find_path(&self, path_id: &PathId) -> Option<&Path> {
        self.stitching
            .as_ref()
            .and_then(|s| s.paths.iter().find(|p| &p.id == path_id))
    }

    pub fn find_hop(&self, hop_ref: &HopRef) -> Option<&Hop> {
        self.find_path(&hop_ref.path)
            .and_then(|p| p.hops.iter().find(|h| h.id == hop_ref.hop))
    }

    pub fn find_hop_mut(&mut self, hop_ref: &HopRef) -> Option<&mut Hop> {
        self.stitching
            .as_mut()
            .and_then(|s| s.paths.iter_mut().find(|p| p.id == hop_ref.path))
            .and_then(|p| p.hops.iter_mut().find(|h| h.id == hop_ref.hop))
    }

    /// All hops of the topology with their stable references, in path order.
    pub fn hops(&self) -> impl Iterator<Item = (HopRef, &Hop)> {
        self.stitching
            .iter()
            .flat_map(|s| s.paths.iter())
            .flat_map(|p| {
                p.hops
                    .iter()
                    .map(move |h| (HopRef { path: p.id.clone(), hop: h.id }, h))
            })
    }
}

impl Path {
    /// Position of a hop along this path, the distance unit used when the
    /// graph builder selects a tag-import source.
    pub fn position_of(&self, hop_id: u32) -> Option<usize> {
        self.hops.iter().position(|h| h.id == hop_id)
    }
}
