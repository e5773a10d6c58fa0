mod api;
mod domain;
mod error;
mod loader;
mod logger;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::loader::rspec;

/// Inspects a stitched-circuit request rspec: parses it, reports the
/// topology and validates every hop's VLAN range.
#[derive(Parser, Debug)]
#[command(name = "stitch_broker", version)]
struct Cli {
    /// Path to the request rspec file.
    rspec: PathBuf,

    /// Slice urn the request belongs to (reporting only).
    #[arg(long)]
    slice: Option<String>,
}

fn main() -> ExitCode {
    logger::init();
    let cli = Cli::parse();

    log::info!("Loading request rspec from '{}'...", cli.rspec.display());
    let text = match fs::read_to_string(&cli.rspec) {
        Ok(text) => text,
        Err(e) => {
            log::error!("Could not read '{}': {}", cli.rspec.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let topology = match rspec::parse(&text) {
        Ok(topology) => topology,
        Err(e) => {
            log::error!("Request rspec is invalid: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(slice) = &cli.slice {
        log::info!("Request targets slice {}", slice);
    }
    log::info!(
        "Topology: {} nodes, {} links, {} stitching paths",
        topology.nodes.len(),
        topology.links.len(),
        topology.stitching.as_ref().map(|s| s.paths.len()).unwrap_or(0)
    );

    for node in &topology.nodes {
        log::info!("  node {} @ {}", node.client_id, node.aggregate);
    }
    if let Some(stitching) = &topology.stitching {
        for path in &stitching.paths {
            log::info!("  path {} ({} hops)", path.id, path.hops.len());
            for hop in &path.hops {
                log::info!(
                    "    hop {} @ {} vlans {} translation {}",
                    hop.id,
                    hop.aggregate,
                    hop.vlan_range,
                    hop.vlan_translation
                );
                if hop.vlan_range.is_empty() {
                    log::warn!("    hop {} has an empty VLAN range; request is infeasible", hop.id);
                }
            }
        }
    }

    ExitCode::SUCCESS
}
