use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Request envelope for the Stitching Computation Service.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScsRequestDto {
    pub slice_urn: String,
    pub request_rspec: String,
    pub options: ScsOptionsDto,
}

/// Options forwarded to the computation service. The exclusion list carries
/// hop urns of the form `<path>/<hop id>` that the computed topology must
/// avoid; the session fills it when it retries around a failed aggregate.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScsOptionsDto {
    #[serde(default)]
    pub hop_exclusion_list: Vec<String>,
}

/// Response envelope. A non-zero `geni_code` is a service failure; `value`
/// is only present on success.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScsResponseDto {
    pub code: ScsCodeDto,
    #[serde(default)]
    pub value: Option<ScsValueDto>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScsCodeDto {
    pub geni_code: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScsValueDto {
    /// The expanded topology, as rspec text.
    pub service_rspec: String,
    /// Hop-level workflow, keyed by path (link) name.
    #[serde(default)]
    pub workflow_data: HashMap<String, PathWorkflowDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PathWorkflowDto {
    #[serde(default)]
    pub dependencies: Vec<HopDependencyDto>,
}

/// One hop entry in the workflow, with the hops it depends on nested below
/// it. `import_vlans` marks that this hop takes its tag from a dependency
/// instead of choosing its own.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HopDependencyDto {
    pub aggregate_urn: String,
    pub aggregate_url: String,
    pub hop_id: u32,
    #[serde(default)]
    pub import_vlans: bool,
    #[serde(default)]
    pub dependencies: Vec<HopDependencyDto>,
}
