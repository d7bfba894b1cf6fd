//! Best-child selection over the child runs of a completed job.

use std::collections::BTreeMap;

use serde_json::json;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::log;
use crate::data::domain::{ArtifactKind, ArtifactRef, ArtifactStore};
use crate::data::service as data_service;
use crate::training::domain::{ExecutionBackend, JobHandle, JobStatus};

use super::domain::{metric_direction, ChildRunRef, ResultBundle};

pub struct ResultRetriever<'a> {
    backend: &'a dyn ExecutionBackend,
    store: &'a dyn ArtifactStore,
}

impl<'a> ResultRetriever<'a> {
    pub fn new(backend: &'a dyn ExecutionBackend, store: &'a dyn ArtifactStore) -> Self {
        Self { backend, store }
    }

    /// Pick the best completed child run by `metric`, or by the job's primary metric.
    ///
    /// Child runs that did not record the metric, or recorded a non-finite value,
    /// are skipped. Ties go to the child listed first by the backend.
    pub fn best_child(&self, handle: &JobHandle, metric: Option<&str>) -> WorkflowResult<ResultBundle> {
        ensure_completed(handle)?;
        let metric = metric.unwrap_or_else(|| handle.spec().primary_metric());
        let direction = metric_direction(metric).ok_or_else(|| WorkflowError::MetricNotFound {
            job_id: handle.id().to_string(),
            metric: metric.to_string(),
        })?;

        let children = self.backend.child_runs(handle.id())?;
        let mut best = None;
        for child in children.iter().filter(|c| c.status == JobStatus::Completed) {
            let Some(score) = child.metrics.get(metric).copied().filter(|v| v.is_finite()) else {
                continue;
            };
            match best {
                Some((_, incumbent)) if !direction.improves(score, incumbent) => {}
                _ => best = Some((child, score)),
            }
        }
        let (child, score) = best.ok_or_else(|| WorkflowError::MetricNotFound {
            job_id: handle.id().to_string(),
            metric: metric.to_string(),
        })?;

        let spec = handle.spec();
        let training = data_service::expect_kind(self.store, &spec.data_ref, ArtifactKind::Dataset)?;
        let bundle = ResultBundle {
            best_child: ChildRunRef {
                job_id: handle.id().to_string(),
                run_id: child.run_id.clone(),
                features: spec.feature_schema(training.payload.schema()),
                label_name: spec.label_name.clone(),
            },
            algorithm: child.algorithm.clone(),
            metric: metric.to_string(),
            score,
            metrics: child.metrics.clone(),
            ensemble: child.ensemble.clone(),
        };
        log::event(
            "evaluation",
            "best_child",
            &[
                ("job_id", json!(handle.id())),
                ("run_id", json!(bundle.best_child.run_id)),
                ("metric", json!(metric)),
                ("score", json!(score)),
            ],
        );
        Ok(bundle)
    }

    /// Metrics of every child run, keyed by run id.
    pub fn child_metrics(&self, handle: &JobHandle) -> WorkflowResult<BTreeMap<String, BTreeMap<String, f64>>> {
        ensure_completed(handle)?;
        Ok(self
            .backend
            .child_runs(handle.id())?
            .into_iter()
            .map(|c| (c.run_id, c.metrics))
            .collect())
    }

    /// Register the bundle's best model as a new version of `name`.
    pub fn register_best(&self, bundle: &ResultBundle, name: &str) -> WorkflowResult<ArtifactRef> {
        let child = &bundle.best_child;
        let mut tags = vec![
            ("algorithm".to_string(), bundle.algorithm.clone()),
            ("metric".to_string(), bundle.metric.clone()),
            ("score".to_string(), bundle.score.to_string()),
        ];
        if let Some(label) = &child.label_name {
            tags.push(("label".to_string(), label.clone()));
        }
        data_service::register_model(
            self.store,
            name,
            &child.job_id,
            &child.run_id,
            child.features.clone(),
            tags,
        )
    }
}

fn ensure_completed(handle: &JobHandle) -> WorkflowResult<()> {
    if handle.status() == JobStatus::Completed {
        Ok(())
    } else {
        Err(WorkflowError::NotCompleted {
            job_id: handle.id().to_string(),
            status: handle.status().to_string(),
        })
    }
}
