//! Job submission and the blocking poll loop.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::log as audit;
use crate::common::time;
use crate::data::domain::{ArtifactKind, ArtifactStore};
use crate::data::service as data_service;

use super::domain::{
    ComputeConfig, ComputeProvider, ComputeRef, ExecutionBackend, JobHandle, JobSpec, JobStatus,
    PollPolicy,
};

pub struct JobSubmitter<'a> {
    backend: &'a dyn ExecutionBackend,
    store: &'a dyn ArtifactStore,
    max_transient_retries: u32,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(backend: &'a dyn ExecutionBackend, store: &'a dyn ArtifactStore) -> Self {
        Self {
            backend,
            store,
            max_transient_retries: PollPolicy::default().max_transient_retries,
        }
    }

    pub fn with_retry_limit(mut self, max_transient_retries: u32) -> Self {
        self.max_transient_retries = max_transient_retries;
        self
    }

    /// Validate `spec` against itself and its training data, then hand it to the backend.
    pub fn submit(&self, spec: JobSpec) -> WorkflowResult<JobHandle> {
        spec.validate()?;
        let record = data_service::expect_kind(self.store, &spec.data_ref, ArtifactKind::Dataset)
            .map_err(|err| match err {
                WorkflowError::NotFound { .. } => WorkflowError::invalid_spec(
                    format!("job spec on {}", spec.data_ref),
                    "data_ref is not registered",
                ),
                other => other,
            })?;
        spec.validate_against(record.payload.schema())?;
        let location = self.store.resolve(&spec.data_ref)?;

        let job_id = self.backend.submit(&spec, &location)?;
        audit::event(
            "training",
            "submitted",
            &[
                ("job_id", json!(job_id)),
                ("task", json!(spec.task_kind.as_str())),
                ("data_ref", json!(spec.data_ref.to_string())),
                ("compute", json!(spec.target_compute.name)),
            ],
        );
        Ok(JobHandle::new(job_id, spec, time::now_ms()))
    }

    /// Block until the job reaches a terminal state or `timeout` elapses.
    ///
    /// The handle keeps the last observed status on every outcome, so a timed
    /// out wait can be resumed with another call. Timing out never cancels the
    /// remote job. Transient read failures are retried up to the configured
    /// limit of consecutive failures.
    pub fn await_terminal(
        &self,
        handle: &mut JobHandle,
        poll_interval: Duration,
        timeout: Duration,
    ) -> WorkflowResult<JobStatus> {
        self.await_policy(
            handle,
            &PollPolicy {
                interval: poll_interval,
                timeout,
                max_transient_retries: self.max_transient_retries,
            },
        )
    }

    pub fn await_policy(&self, handle: &mut JobHandle, policy: &PollPolicy) -> WorkflowResult<JobStatus> {
        if handle.status().is_terminal() {
            return Ok(handle.status());
        }

        let started = Instant::now();
        let mut failures = 0u32;
        loop {
            match self.backend.status(handle.id()) {
                Ok(status) => {
                    failures = 0;
                    if handle.observe(status) {
                        log::debug!("job {} is now {}", handle.id(), handle.status());
                    }
                    if handle.status().is_terminal() {
                        audit::event(
                            "training",
                            "terminal",
                            &[
                                ("job_id", json!(handle.id())),
                                ("status", json!(handle.status().as_str())),
                                ("waited_ms", json!(started.elapsed().as_millis() as u64)),
                            ],
                        );
                        return Ok(handle.status());
                    }
                }
                Err(err) if err.is_transient() => {
                    failures += 1;
                    if failures > policy.max_transient_retries {
                        return Err(WorkflowError::TransientBackend {
                            reference: format!("job {}", handle.id()),
                            attempts: failures,
                            reason: err.to_string(),
                        });
                    }
                    log::warn!(
                        "status read for job {} failed ({failures}/{}): {err}",
                        handle.id(),
                        policy.max_transient_retries
                    );
                }
                Err(err) => return Err(err),
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                return Err(WorkflowError::Timeout {
                    job_id: handle.id().to_string(),
                    status: handle.status().to_string(),
                    waited_ms: waited.as_millis(),
                });
            }
            thread::sleep(policy.interval.min(policy.timeout - waited));
        }
    }

    /// Ask the backend to cancel the job. Terminal jobs are left as they are.
    pub fn cancel(&self, handle: &mut JobHandle) -> WorkflowResult<JobStatus> {
        if handle.status().is_terminal() {
            return Ok(handle.status());
        }
        let status = self.backend.cancel(handle.id())?;
        handle.observe(status);
        log::info!("cancel requested for job {}: {}", handle.id(), handle.status());
        Ok(handle.status())
    }
}

/// Validate `config` and provision (or reuse) the named compute target.
pub fn provision_compute(
    provider: &dyn ComputeProvider,
    name: &str,
    config: &ComputeConfig,
) -> WorkflowResult<ComputeRef> {
    config.validate(name)?;
    let compute = provider.create_or_get_compute(name, config)?;
    log::info!("compute {} ready ({}, max {} nodes)", compute.name, compute.vm_size, compute.max_nodes);
    Ok(compute)
}
