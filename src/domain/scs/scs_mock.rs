use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::api::scs_dto::ScsOptionsDto;
use crate::domain::scs::scs::{ScsClient, WorkflowResult};
use crate::domain::util::id::SliceId;
use crate::error::{Error, Result};

/// Scripted computation service used by the integration tests: returns its
/// queued results in order and counts how often it was called, so tests can
/// assert whether a session recomputed the path.
pub struct MockScsClient {
    results: Mutex<VecDeque<Result<WorkflowResult>>>,
    calls: AtomicUsize,
    /// Exclusion lists received, one entry per call.
    exclusions: Mutex<Vec<Vec<String>>>,
}

impl MockScsClient {
    pub fn new(results: Vec<Result<WorkflowResult>>) -> Self {
        MockScsClient {
            results: Mutex::new(results.into_iter().collect()),
            calls: AtomicUsize::new(0),
            exclusions: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received_exclusions(&self) -> Vec<Vec<String>> {
        self.exclusions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScsClient for MockScsClient {
    async fn compute_path(
        &self,
        _slice: &SliceId,
        _request_rspec: &str,
        options: &ScsOptionsDto,
    ) -> Result<WorkflowResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.exclusions
            .lock()
            .unwrap()
            .push(options.hop_exclusion_list.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(Error::ServiceFailedError {
                    code: -1,
                    output: "Mock has no scripted result left".to_string(),
                })
            })
    }
}
