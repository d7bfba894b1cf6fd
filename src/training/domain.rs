//! Domain types for remote AutoML jobs: specs, handles, child runs and compute.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::data::domain::{ArtifactRef, TabularSchema};
use crate::evaluation::domain::{metric_applies_to, metric_direction};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
    Forecasting,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Classification => "classification",
            TaskKind::Regression => "regression",
            TaskKind::Forecasting => "forecasting",
        }
    }

    /// Metric used to rank child runs when the settings name none.
    pub fn default_primary_metric(&self) -> &'static str {
        match self {
            TaskKind::Classification => "accuracy",
            TaskKind::Regression => "spearman_correlation",
            TaskKind::Forecasting => "normalized_root_mean_squared_error",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Featurization {
    #[default]
    Auto,
    Off,
}

/// Loosely typed value accepted by [`AutoMlSettings::from_map`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

/// Closed set of recognised AutoML options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoMlSettings {
    /// Ranking metric; `None` means the task kind's default.
    pub primary_metric: Option<String>,
    pub experiment_timeout_minutes: Option<u32>,
    pub iteration_timeout_minutes: Option<u32>,
    pub enable_early_stopping: bool,
    pub n_cross_validations: Option<u32>,
    pub max_concurrent_iterations: u32,
    pub featurization: Featurization,
    pub enable_onnx_compatible_models: bool,
    pub blocked_models: Vec<String>,
    /// Required for forecasting.
    pub time_column_name: Option<String>,
    pub forecast_horizon: Option<u32>,
}

impl Default for AutoMlSettings {
    fn default() -> Self {
        Self {
            primary_metric: None,
            experiment_timeout_minutes: None,
            iteration_timeout_minutes: None,
            enable_early_stopping: false,
            n_cross_validations: None,
            max_concurrent_iterations: 1,
            featurization: Featurization::Auto,
            enable_onnx_compatible_models: false,
            blocked_models: Vec::new(),
            time_column_name: None,
            forecast_horizon: None,
        }
    }
}

impl AutoMlSettings {
    /// Build settings from a free-form map, rejecting unknown keys and mistyped values.
    pub fn from_map(map: &BTreeMap<String, SettingValue>) -> WorkflowResult<Self> {
        let mut out = Self::default();
        for (key, value) in map {
            let bad = || {
                WorkflowError::invalid_spec(
                    format!("setting {key}"),
                    format!("unexpected value {value:?}"),
                )
            };
            match key.as_str() {
                "primary_metric" => out.primary_metric = Some(text(value).ok_or_else(bad)?),
                "experiment_timeout_minutes" => {
                    out.experiment_timeout_minutes = Some(count(value).ok_or_else(bad)?)
                }
                "iteration_timeout_minutes" => {
                    out.iteration_timeout_minutes = Some(count(value).ok_or_else(bad)?)
                }
                "enable_early_stopping" => out.enable_early_stopping = flag(value).ok_or_else(bad)?,
                "n_cross_validations" => {
                    out.n_cross_validations = Some(count(value).ok_or_else(bad)?)
                }
                "max_concurrent_iterations" => {
                    out.max_concurrent_iterations = count(value).ok_or_else(bad)?
                }
                "featurization" => {
                    out.featurization = match text(value).as_deref() {
                        Some("auto") => Featurization::Auto,
                        Some("off") => Featurization::Off,
                        _ => return Err(bad()),
                    }
                }
                "enable_onnx_compatible_models" => {
                    out.enable_onnx_compatible_models = flag(value).ok_or_else(bad)?
                }
                "blocked_models" => match value {
                    SettingValue::List(items) => out.blocked_models = items.clone(),
                    _ => return Err(bad()),
                },
                "time_column_name" => out.time_column_name = Some(text(value).ok_or_else(bad)?),
                "forecast_horizon" => out.forecast_horizon = Some(count(value).ok_or_else(bad)?),
                other => {
                    return Err(WorkflowError::invalid_spec(
                        format!("setting {other}"),
                        "unknown setting",
                    ))
                }
            }
        }
        Ok(out)
    }
}

fn text(v: &SettingValue) -> Option<String> {
    match v {
        SettingValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn flag(v: &SettingValue) -> Option<bool> {
    match v {
        SettingValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn count(v: &SettingValue) -> Option<u32> {
    match v {
        SettingValue::Int(i) => u32::try_from(*i).ok(),
        _ => None,
    }
}

/// Named, provisioned execution resource.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ComputeRef {
    pub name: String,
    pub vm_size: String,
    pub max_nodes: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub vm_size: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub idle_seconds_before_scaledown: u32,
}

impl ComputeConfig {
    pub fn new(vm_size: impl Into<String>, max_nodes: u32) -> Self {
        Self {
            vm_size: vm_size.into(),
            min_nodes: 0,
            max_nodes,
            idle_seconds_before_scaledown: 1800,
        }
    }

    pub fn validate(&self, name: &str) -> WorkflowResult<()> {
        let reference = format!("compute {name}");
        if name.trim().is_empty() {
            return Err(WorkflowError::invalid_spec(reference, "empty compute name"));
        }
        if self.vm_size.trim().is_empty() {
            return Err(WorkflowError::invalid_spec(reference, "vm_size is empty"));
        }
        if self.max_nodes == 0 {
            return Err(WorkflowError::invalid_spec(reference, "max_nodes must be at least 1"));
        }
        if self.min_nodes > self.max_nodes {
            return Err(WorkflowError::invalid_spec(
                reference,
                "min_nodes exceeds max_nodes",
            ));
        }
        Ok(())
    }
}

/// Declarative description of an AutoML job. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub experiment_name: String,
    pub task_kind: TaskKind,
    pub target_compute: ComputeRef,
    pub data_ref: ArtifactRef,
    pub label_name: Option<String>,
    pub settings: AutoMlSettings,
}

impl JobSpec {
    pub fn new(
        experiment_name: impl Into<String>,
        task_kind: TaskKind,
        target_compute: ComputeRef,
        data_ref: ArtifactRef,
    ) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            task_kind,
            target_compute,
            data_ref,
            label_name: None,
            settings: AutoMlSettings::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label_name = Some(label.into());
        self
    }

    pub fn with_settings(mut self, settings: AutoMlSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn primary_metric(&self) -> &str {
        self.settings
            .primary_metric
            .as_deref()
            .unwrap_or_else(|| self.task_kind.default_primary_metric())
    }

    /// Consistency checks that need nothing but the spec itself.
    pub fn validate(&self) -> WorkflowResult<()> {
        let reference = format!("job spec on {}", self.data_ref);
        let invalid = |reason: String| WorkflowError::invalid_spec(reference.clone(), reason);

        if self.experiment_name.trim().is_empty() {
            return Err(invalid("experiment_name is empty".into()));
        }
        match self.label_name.as_deref() {
            None | Some("") => {
                return Err(invalid(format!("{} requires label_name", self.task_kind)))
            }
            Some(_) => {}
        }
        if self.task_kind == TaskKind::Forecasting && self.settings.time_column_name.is_none() {
            return Err(invalid("forecasting requires time_column_name".into()));
        }
        if self.task_kind != TaskKind::Forecasting && self.settings.forecast_horizon.is_some() {
            return Err(invalid(format!(
                "forecast_horizon is not valid for {}",
                self.task_kind
            )));
        }

        let metric = self.primary_metric();
        if metric_direction(metric).is_none() {
            return Err(invalid(format!("unknown primary metric {metric}")));
        }
        if !metric_applies_to(metric, self.task_kind) {
            return Err(invalid(format!(
                "primary metric {metric} does not apply to {}",
                self.task_kind
            )));
        }

        if matches!(self.settings.n_cross_validations, Some(n) if n < 2) {
            return Err(invalid("n_cross_validations must be at least 2".into()));
        }
        let concurrency = self.settings.max_concurrent_iterations;
        if concurrency == 0 {
            return Err(invalid("max_concurrent_iterations must be at least 1".into()));
        }
        if concurrency > self.target_compute.max_nodes {
            return Err(invalid(format!(
                "max_concurrent_iterations {concurrency} exceeds {} nodes on {}",
                self.target_compute.max_nodes, self.target_compute.name
            )));
        }
        Ok(())
    }

    /// Checks that need the schema of the referenced training data.
    pub fn validate_against(&self, schema: &TabularSchema) -> WorkflowResult<()> {
        let reference = format!("job spec on {}", self.data_ref);
        let required = self
            .label_name
            .iter()
            .chain(self.settings.time_column_name.iter());
        for column in required {
            if !schema.contains(column) {
                return Err(WorkflowError::invalid_spec(
                    reference,
                    format!("column {column} is not in the dataset"),
                ));
            }
        }
        Ok(())
    }

    /// Feature columns the trained model expects at prediction time.
    pub fn feature_schema(&self, training: &TabularSchema) -> TabularSchema {
        match self.label_name.as_deref() {
            Some(label) => training.without(label),
            None => training.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local view of a submitted job. Status only moves forward and terminal states are absorbing.
#[derive(Clone, Debug, PartialEq)]
pub struct JobHandle {
    id: String,
    status: JobStatus,
    spec: JobSpec,
    submitted_ms: u64,
}

impl JobHandle {
    pub fn new(id: impl Into<String>, spec: JobSpec, submitted_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            spec,
            submitted_ms,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn submitted_ms(&self) -> u64 {
        self.submitted_ms
    }

    /// Record a status read from the backend. Returns whether the local status changed.
    pub fn observe(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() || next == self.status {
            return false;
        }
        self.status = next;
        true
    }
}

/// Recorded runtime and dependency pins of a child run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnvironment {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetadata {
    pub method: String,
    pub members: Vec<String>,
    pub weights: Vec<f64>,
}

/// One model fitted during an AutoML job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildRun {
    pub run_id: String,
    pub algorithm: String,
    pub status: JobStatus,
    pub metrics: BTreeMap<String, f64>,
    pub environment: Option<RunEnvironment>,
    pub ensemble: Option<EnsembleMetadata>,
}

impl ChildRun {
    /// Completed child run with the given metrics and no recorded environment.
    pub fn completed(run_id: impl Into<String>, algorithm: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            algorithm: algorithm.into(),
            status: JobStatus::Completed,
            metrics: BTreeMap::new(),
            environment: None,
            ensemble: None,
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_environment(mut self, env: RunEnvironment) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn with_ensemble(mut self, ensemble: EnsembleMetadata) -> Self {
        self.ensemble = Some(ensemble);
        self
    }
}

/// Timing knobs for [`crate::training::service::JobSubmitter::await_policy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_transient_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3600),
            max_transient_retries: 3,
        }
    }
}

/// Remote execution backend. Every read is idempotent.
pub trait ExecutionBackend {
    /// Schedule the job and return the backend's job id.
    fn submit(&self, spec: &JobSpec, data_location: &str) -> WorkflowResult<String>;
    fn status(&self, job_id: &str) -> WorkflowResult<JobStatus>;
    fn child_runs(&self, job_id: &str) -> WorkflowResult<Vec<ChildRun>>;
    fn cancel(&self, job_id: &str) -> WorkflowResult<JobStatus>;
}

/// Compute provisioning collaborator.
pub trait ComputeProvider {
    /// Return the named compute, creating it with `config` if it does not exist.
    fn create_or_get_compute(&self, name: &str, config: &ComputeConfig) -> WorkflowResult<ComputeRef>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::{Column, ColumnType};

    fn compute() -> ComputeRef {
        ComputeRef {
            name: "cpu-cluster".into(),
            vm_size: "STANDARD_D2_V2".into(),
            max_nodes: 4,
        }
    }

    fn regression() -> JobSpec {
        JobSpec::new(
            "automl-remote",
            TaskKind::Regression,
            compute(),
            ArtifactRef::new("housing", 1),
        )
    }

    #[test]
    fn regression_without_label_is_invalid() {
        let err = regression().validate().unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidSpec { .. }));
        assert!(err.to_string().contains("requires label_name"));
        assert!(regression().with_label("price").validate().is_ok());
    }

    #[test]
    fn forecasting_needs_a_time_column() {
        let spec = JobSpec::new("f", TaskKind::Forecasting, compute(), ArtifactRef::new("d", 1))
            .with_label("demand");
        assert!(spec.validate().is_err());

        let settings = AutoMlSettings {
            time_column_name: Some("date".into()),
            ..AutoMlSettings::default()
        };
        assert!(spec.with_settings(settings).validate().is_ok());
    }

    #[test]
    fn classification_metric_on_regression_is_rejected() {
        let settings = AutoMlSettings {
            primary_metric: Some("AUC_weighted".into()),
            ..AutoMlSettings::default()
        };
        let err = regression()
            .with_label("price")
            .with_settings(settings)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("does not apply to regression"));
    }

    #[test]
    fn concurrency_is_bounded_by_compute_nodes() {
        let settings = AutoMlSettings {
            max_concurrent_iterations: 5,
            ..AutoMlSettings::default()
        };
        let err = regression()
            .with_label("price")
            .with_settings(settings)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 4 nodes"));
    }

    #[test]
    fn settings_map_rejects_unknown_keys() {
        let mut map = BTreeMap::new();
        map.insert("enable_early_stopping".to_string(), SettingValue::from(true));
        map.insert("max_cores_per_iteration".to_string(), SettingValue::from(2i64));
        let err = AutoMlSettings::from_map(&map).unwrap_err();
        assert!(err.to_string().contains("max_cores_per_iteration"));
    }

    #[test]
    fn settings_map_rejects_mistyped_values() {
        let mut map = BTreeMap::new();
        map.insert("n_cross_validations".to_string(), SettingValue::from("five"));
        assert!(AutoMlSettings::from_map(&map).is_err());

        let mut map = BTreeMap::new();
        map.insert("experiment_timeout_minutes".to_string(), SettingValue::from(-1i64));
        assert!(AutoMlSettings::from_map(&map).is_err());
    }

    #[test]
    fn settings_map_populates_known_keys() {
        let mut map = BTreeMap::new();
        map.insert("primary_metric".to_string(), SettingValue::from("r2_score"));
        map.insert("experiment_timeout_minutes".to_string(), SettingValue::from(20i64));
        map.insert("n_cross_validations".to_string(), SettingValue::from(5i64));
        map.insert("featurization".to_string(), SettingValue::from("off"));
        map.insert(
            "blocked_models".to_string(),
            SettingValue::List(vec!["KNN".into()]),
        );
        let settings = AutoMlSettings::from_map(&map).unwrap();
        assert_eq!(settings.primary_metric.as_deref(), Some("r2_score"));
        assert_eq!(settings.experiment_timeout_minutes, Some(20));
        assert_eq!(settings.n_cross_validations, Some(5));
        assert_eq!(settings.featurization, Featurization::Off);
        assert_eq!(settings.blocked_models, vec!["KNN".to_string()]);
    }

    #[test]
    fn label_must_exist_in_training_schema() {
        let schema = TabularSchema::new(vec![Column::new("rooms", ColumnType::Numeric)]).unwrap();
        let spec = regression().with_label("price");
        assert!(spec.validate_against(&schema).is_err());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut handle = JobHandle::new("job-1", regression(), 0);
        assert!(handle.observe(JobStatus::Running));
        assert!(!handle.observe(JobStatus::Queued));
        assert_eq!(handle.status(), JobStatus::Running);
        assert!(handle.observe(JobStatus::Failed));
        assert!(!handle.observe(JobStatus::Completed));
        assert!(!handle.observe(JobStatus::Running));
        assert_eq!(handle.status(), JobStatus::Failed);
    }

    #[test]
    fn queued_may_jump_straight_to_completed() {
        let mut handle = JobHandle::new("job-2", regression(), 0);
        assert!(handle.observe(JobStatus::Completed));
        assert!(handle.status().is_terminal());
    }

    #[test]
    fn compute_config_bounds() {
        assert!(ComputeConfig::new("STANDARD_D2_V2", 4).validate("cpu").is_ok());
        assert!(ComputeConfig::new("STANDARD_D2_V2", 0).validate("cpu").is_err());
        assert!(ComputeConfig::new("", 4).validate("cpu").is_err());
        let mut cfg = ComputeConfig::new("STANDARD_D2_V2", 2);
        cfg.min_nodes = 3;
        assert!(cfg.validate("cpu").is_err());
    }
}
