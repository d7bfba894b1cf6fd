//! End-to-end flow over explicit collaborators: submit, wait, pick the best
//! child, predict through the proxy and publish a fairness dashboard.

use std::collections::BTreeMap;

use crate::common::config::AppCfg;
use crate::common::error::WorkflowResult;
use crate::dashboard::domain::{
    predictions_by_model, DashboardPayload, DashboardStore, ExperimentTracker,
    GroupMetricSetBuilder, PredictionType, RunContext, Scalar, UploadId,
};
use crate::dashboard::service::DashboardExchange;
use crate::data::domain::{ArtifactRef, ArtifactStore};
use crate::evaluation::domain::ResultBundle;
use crate::evaluation::service::ResultRetriever;
use crate::inference::domain::{ModelProxy, PredictionValue};
use crate::inference::service::ProxyPredictor;
use crate::training::domain::{ExecutionBackend, JobHandle, JobSpec, JobStatus, PollPolicy};
use crate::training::service::JobSubmitter;

/// Every collaborator the flow talks to, passed explicitly.
pub struct Workspace<'a> {
    pub artifacts: &'a dyn ArtifactStore,
    pub backend: &'a dyn ExecutionBackend,
    pub proxy: &'a dyn ModelProxy,
    pub tracker: &'a dyn ExperimentTracker,
    pub dashboards: &'a dyn DashboardStore,
    pub poll: PollPolicy,
}

impl<'a> Workspace<'a> {
    pub fn new(
        artifacts: &'a dyn ArtifactStore,
        backend: &'a dyn ExecutionBackend,
        proxy: &'a dyn ModelProxy,
        tracker: &'a dyn ExperimentTracker,
        dashboards: &'a dyn DashboardStore,
    ) -> Self {
        Self {
            artifacts,
            backend,
            proxy,
            tracker,
            dashboards,
            poll: PollPolicy::default(),
        }
    }

    /// Apply the poll policy from `cfg` and install the logger at its level.
    pub fn with_config(mut self, cfg: &AppCfg) -> Self {
        crate::common::log::init(&cfg.log_level);
        self.poll = cfg.poll_policy();
        self
    }

    pub fn submitter(&self) -> JobSubmitter<'a> {
        JobSubmitter::new(self.backend, self.artifacts)
            .with_retry_limit(self.poll.max_transient_retries)
    }

    pub fn retriever(&self) -> ResultRetriever<'a> {
        ResultRetriever::new(self.backend, self.artifacts)
    }

    pub fn predictor(&self) -> ProxyPredictor<'a> {
        ProxyPredictor::new(self.proxy, self.artifacts)
    }

    pub fn exchange(&self) -> DashboardExchange<'a> {
        DashboardExchange::new(self.dashboards)
    }

    pub fn submit(&self, spec: JobSpec) -> WorkflowResult<JobHandle> {
        self.submitter().submit(spec)
    }

    /// Block until `handle` is terminal under the configured poll policy.
    ///
    /// On `Timeout` or `TransientBackend` the handle still addresses the
    /// running job, so the caller can wait again or cancel it.
    pub fn wait(&self, handle: &mut JobHandle) -> WorkflowResult<JobStatus> {
        let status = self.submitter().await_policy(handle, &self.poll)?;
        if status != JobStatus::Completed {
            log::warn!("job {} ended {}", handle.id(), status);
        }
        Ok(status)
    }

    pub fn cancel(&self, handle: &mut JobHandle) -> WorkflowResult<JobStatus> {
        self.submitter().cancel(handle)
    }

    pub fn best_result(&self, handle: &JobHandle, metric: Option<&str>) -> WorkflowResult<ResultBundle> {
        self.retriever().best_child(handle, metric)
    }

    /// Predict `data_ref` with the bundle's best child, remotely.
    pub fn predict_best(&self, bundle: &ResultBundle, data_ref: &ArtifactRef) -> WorkflowResult<Vec<PredictionValue>> {
        self.predictor().predict(&bundle.best_child, data_ref)
    }

    /// Predict `data_ref` with each registered model, assemble the dashboard and
    /// upload it on a fresh run, which is completed afterwards.
    pub fn publish_dashboard(
        &self,
        experiment: &str,
        name: &str,
        request: DashboardRequest<'_>,
        builder: &dyn GroupMetricSetBuilder,
    ) -> WorkflowResult<(RunContext, UploadId)> {
        let predictor = self.predictor();
        let mut per_model = Vec::with_capacity(request.models.len());
        for model in request.models {
            per_model.push((model.clone(), predictor.predict_registered(model, request.data_ref)?));
        }
        let payload = DashboardPayload::assemble(
            request.prediction_type,
            request.true_values,
            predictions_by_model(per_model),
            request.sensitive_features,
            builder,
        )?;

        let run = self.tracker.start_run(experiment)?;
        let upload_id = self.exchange().upload(&run, &payload, name)?;
        self.tracker.complete(&run)?;
        Ok((run, upload_id))
    }

    /// Download `upload_id` and compare it with what was expected to be stored.
    pub fn verify_dashboard(
        &self,
        run: &RunContext,
        upload_id: &UploadId,
        expected: &DashboardPayload,
    ) -> WorkflowResult<bool> {
        let downloaded = self.exchange().download(run, upload_id)?;
        Ok(&downloaded == expected)
    }
}

/// Inputs for [`Workspace::publish_dashboard`].
pub struct DashboardRequest<'r> {
    pub prediction_type: PredictionType,
    pub models: &'r [ArtifactRef],
    pub data_ref: &'r ArtifactRef,
    pub true_values: Vec<Scalar>,
    pub sensitive_features: BTreeMap<String, Vec<Scalar>>,
}
