use std::fs;
use std::path::Path;

use crate::domain::topology::Topology;
use crate::error::Result;
use crate::loader::rspec;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads and parses a request rspec from disk, initializing the logger
/// first. Entry point for the CLI and for embedding callers.
pub fn load_request(file_path: &Path) -> Result<Topology> {
    logger::init();
    log::info!("Logger initialized. Loading request rspec.");

    let text = fs::read_to_string(file_path)?;
    let topology = rspec::parse(&text)?;
    log::info!(
        "Request parsed: {} nodes, {} links, {} stitching paths.",
        topology.nodes.len(),
        topology.links.len(),
        topology.stitching.as_ref().map(|s| s.paths.len()).unwrap_or(0)
    );

    Ok(topology)
}
