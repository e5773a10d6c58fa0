use std::collections::HashMap;

use async_trait::async_trait;

use crate::api::scs_dto::{HopDependencyDto, ScsOptionsDto, ScsResponseDto};
use crate::domain::util::id::{AggregateId, PathId, SliceId};
use crate::error::{Error, Result};

/// Seam to the external Stitching Computation Service.
///
/// The service is a black box: it receives the slice urn, the request rspec
/// text and the options, and returns an expanded topology plus the hop-level
/// reservation workflow. Transport (XML-RPC over TLS) lives behind this
/// trait and is out of scope here.
#[async_trait]
pub trait ScsClient: Send + Sync {
    async fn compute_path(
        &self,
        slice: &SliceId,
        request_rspec: &str,
        options: &ScsOptionsDto,
    ) -> Result<WorkflowResult>;
}

/// The computation service's answer for one session attempt: the expanded
/// rspec text plus the typed dependency workflow. Owned by the session for
/// the duration of the attempt and discarded on retry.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub service_rspec: String,
    /// Hop workflow entries per path, in service order.
    pub workflow_data: HashMap<PathId, Vec<HopWorkflow>>,
}

/// One hop's slot in the workflow: who owns it, whether it imports its tag,
/// and which hops must be reserved before it.
#[derive(Debug, Clone)]
pub struct HopWorkflow {
    pub aggregate_urn: String,
    pub aggregate: AggregateId,
    pub hop_id: u32,
    pub import_vlans: bool,
    pub dependencies: Vec<HopWorkflow>,
}

impl WorkflowResult {
    /// Converts the wire response, rejecting service-level failures.
    pub fn from_response(response: ScsResponseDto) -> Result<Self> {
        if response.code.geni_code != 0 {
            return Err(Error::ServiceFailedError {
                code: response.code.geni_code,
                output: response.output.unwrap_or_default(),
            });
        }
        let value = response.value.ok_or(Error::ServiceFailedError {
            code: 0,
            output: "Response carried no value".to_string(),
        })?;

        let workflow_data = value
            .workflow_data
            .into_iter()
            .map(|(path, data)| {
                (
                    PathId::new(path),
                    data.dependencies.into_iter().map(HopWorkflow::from_dto).collect(),
                )
            })
            .collect();

        Ok(WorkflowResult { service_rspec: value.service_rspec, workflow_data })
    }
}

impl HopWorkflow {
    fn from_dto(dto: HopDependencyDto) -> Self {
        HopWorkflow {
            aggregate_urn: dto.aggregate_urn,
            aggregate: AggregateId::new(dto.aggregate_url),
            hop_id: dto.hop_id,
            import_vlans: dto.import_vlans,
            dependencies: dto.dependencies.into_iter().map(Self::from_dto).collect(),
        }
    }
}
