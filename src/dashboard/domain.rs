//! Fairness dashboard payloads, run contexts and the storage contracts.
//!
//! A payload is a plain value tree. Numbers must be finite so the JSON
//! document written on upload parses back to an equal payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::data::domain::ArtifactRef;
use crate::inference::domain::PredictionValue;

pub const SCHEMA_TYPE: &str = "dashboardDictionary";
pub const SCHEMA_VERSION: u32 = 0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Label(String),
}

impl From<PredictionValue> for Scalar {
    fn from(value: PredictionValue) -> Self {
        match value {
            PredictionValue::Numeric(v) => Scalar::Number(v),
            PredictionValue::Label(l) => Scalar::Label(l),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Label(v.to_string())
    }
}

/// Metric tree produced by a [`GroupMetricSetBuilder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    List(Vec<MetricValue>),
    Map(BTreeMap<String, MetricValue>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    BinaryClassification,
    Probability,
    Regression,
}

/// Computes disparity metrics across sensitive-feature groups. The algorithm
/// belongs to the implementor; this crate only transports its output.
pub trait GroupMetricSetBuilder {
    fn build(
        &self,
        prediction_type: PredictionType,
        true_values: &[Scalar],
        predictions: &BTreeMap<String, Vec<Scalar>>,
        sensitive_features: &BTreeMap<String, Vec<Scalar>>,
    ) -> WorkflowResult<BTreeMap<String, MetricValue>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardPayload {
    pub prediction_type: PredictionType,
    pub true_values: Vec<Scalar>,
    /// Keyed by model id, see [`model_key`].
    pub predictions: BTreeMap<String, Vec<Scalar>>,
    pub sensitive_features: BTreeMap<String, Vec<Scalar>>,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl DashboardPayload {
    /// Validate the inputs, then derive `metrics` with `builder`.
    pub fn assemble(
        prediction_type: PredictionType,
        true_values: Vec<Scalar>,
        predictions: BTreeMap<String, Vec<Scalar>>,
        sensitive_features: BTreeMap<String, Vec<Scalar>>,
        builder: &dyn GroupMetricSetBuilder,
    ) -> WorkflowResult<Self> {
        let mut payload = Self {
            prediction_type,
            true_values,
            predictions,
            sensitive_features,
            metrics: BTreeMap::new(),
        };
        payload.validate("dashboard payload")?;
        payload.metrics = builder.build(
            payload.prediction_type,
            &payload.true_values,
            &payload.predictions,
            &payload.sensitive_features,
        )?;
        payload.validate("dashboard payload")?;
        Ok(payload)
    }

    /// Shape and finiteness checks; `reference` names the payload in errors.
    pub fn validate(&self, reference: &str) -> WorkflowResult<()> {
        let expected = self.true_values.len();
        if self.predictions.is_empty() {
            return Err(WorkflowError::invalid_spec(reference, "no model predictions"));
        }
        let sequences = self
            .predictions
            .iter()
            .map(|(k, v)| (format!("predictions.{k}"), v))
            .chain(
                self.sensitive_features
                    .iter()
                    .map(|(k, v)| (format!("sensitive_features.{k}"), v)),
            );
        for (path, values) in sequences {
            if values.len() != expected {
                return Err(WorkflowError::invalid_spec(
                    reference,
                    format!("{path} has {} values, expected {expected}", values.len()),
                ));
            }
            check_scalars(reference, &path, values)?;
        }
        check_scalars(reference, "true_values", &self.true_values)?;
        for (key, value) in &self.metrics {
            check_metric(reference, &format!("metrics.{key}"), value)?;
        }
        Ok(())
    }
}

fn non_finite(reference: &str, path: &str) -> WorkflowError {
    WorkflowError::serialization(reference, format!("non-finite number at {path}"))
}

fn check_scalars(reference: &str, path: &str, values: &[Scalar]) -> WorkflowResult<()> {
    match values
        .iter()
        .position(|v| matches!(v, Scalar::Number(n) if !n.is_finite()))
    {
        Some(idx) => Err(non_finite(reference, &format!("{path}[{idx}]"))),
        None => Ok(()),
    }
}

fn check_metric(reference: &str, path: &str, value: &MetricValue) -> WorkflowResult<()> {
    match value {
        MetricValue::Number(n) if !n.is_finite() => Err(non_finite(reference, path)),
        MetricValue::Number(_) | MetricValue::Text(_) => Ok(()),
        MetricValue::List(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_metric(reference, &format!("{path}[{i}]"), item)),
        MetricValue::Map(entries) => entries
            .iter()
            .try_for_each(|(k, item)| check_metric(reference, &format!("{path}.{k}"), item)),
    }
}

/// Dashboard key for a registered model.
pub fn model_key(model: &ArtifactRef) -> String {
    model.to_string()
}

/// Key each model's predictions by its registered reference.
pub fn predictions_by_model(
    models: Vec<(ArtifactRef, Vec<PredictionValue>)>,
) -> BTreeMap<String, Vec<Scalar>> {
    models
        .into_iter()
        .map(|(model, values)| {
            (
                model_key(&model),
                values.into_iter().map(Scalar::from).collect(),
            )
        })
        .collect()
}

/// Document stored per upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardEnvelope {
    pub schema_type: String,
    pub schema_version: u32,
    pub name: String,
    pub payload: DashboardPayload,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub upload_id: UploadId,
    pub name: String,
}

/// Explicit handle to a tracked run; every dashboard operation takes one.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub experiment: String,
    pub run_id: String,
}

pub trait ExperimentTracker {
    fn start_run(&self, experiment: &str) -> WorkflowResult<RunContext>;
    fn complete(&self, run: &RunContext) -> WorkflowResult<()>;
}

/// Opaque document storage keyed by run and upload id.
pub trait DashboardStore {
    fn put(&self, run: &RunContext, name: &str, document: &str) -> WorkflowResult<UploadId>;
    /// Fails with `NotFound` naming the upload id when it is unknown.
    fn get(&self, run: &RunContext, upload_id: &UploadId) -> WorkflowResult<String>;
    fn list(&self, run: &RunContext) -> WorkflowResult<Vec<UploadSummary>>;
}
