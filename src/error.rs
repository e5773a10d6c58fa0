use thiserror::Error;

use crate::domain::util::id::{AggregateId, PathId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to decode service response: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Malformed rspec document: {0}")]
    ParseError(String),

    #[error("Invalid VLAN range: {0}")]
    RangeError(String),

    #[error("Workflow dependency graph has a cycle involving aggregate {0}")]
    DependencyCycleError(AggregateId),

    #[error("No feasible VLAN assignment through aggregate {aggregate}: {reason}")]
    CircuitFailedError {
        aggregate: AggregateId,
        path: Option<PathId>,
        reason: String,
    },

    #[error("Stitching computation service failed (geni_code {code}): {output}")]
    ServiceFailedError { code: i64, output: String },

    #[error("Manifest merge failed: {0}")]
    ManifestMergeError(String),

    #[error("Reservation at aggregate {aggregate} failed: {reason}")]
    ReservationError {
        aggregate: AggregateId,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
