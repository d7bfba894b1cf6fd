//! Metric directions and the result bundle derived from a completed job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::domain::TabularSchema;
use crate::training::domain::{EnsembleMetadata, TaskKind};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// Whether `candidate` beats `incumbent` under this direction. Ties keep the incumbent.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Family {
    Classification,
    Regression,
}

use Direction::{Maximize, Minimize};
use Family::{Classification, Regression};

// Regression metrics also serve forecasting.
const METRICS: &[(&str, Direction, Family)] = &[
    ("accuracy", Maximize, Classification),
    ("AUC_weighted", Maximize, Classification),
    ("AUC_macro", Maximize, Classification),
    ("average_precision_score_weighted", Maximize, Classification),
    ("balanced_accuracy", Maximize, Classification),
    ("f1_score_weighted", Maximize, Classification),
    ("f1_score_macro", Maximize, Classification),
    ("norm_macro_recall", Maximize, Classification),
    ("precision_score_weighted", Maximize, Classification),
    ("recall_score_weighted", Maximize, Classification),
    ("matthews_correlation", Maximize, Classification),
    ("log_loss", Minimize, Classification),
    ("spearman_correlation", Maximize, Regression),
    ("r2_score", Maximize, Regression),
    ("explained_variance", Maximize, Regression),
    ("root_mean_squared_error", Minimize, Regression),
    ("normalized_root_mean_squared_error", Minimize, Regression),
    ("root_mean_squared_log_error", Minimize, Regression),
    ("normalized_root_mean_squared_log_error", Minimize, Regression),
    ("mean_absolute_error", Minimize, Regression),
    ("normalized_mean_absolute_error", Minimize, Regression),
    ("median_absolute_error", Minimize, Regression),
    ("normalized_median_absolute_error", Minimize, Regression),
    ("mean_absolute_percentage_error", Minimize, Regression),
];

/// Optimisation direction from the fixed metric table; `None` for unknown metrics.
pub fn metric_direction(metric: &str) -> Option<Direction> {
    METRICS
        .iter()
        .find(|(name, _, _)| *name == metric)
        .map(|(_, direction, _)| *direction)
}

/// Whether the metric is meaningful for the task kind.
pub fn metric_applies_to(metric: &str, task: TaskKind) -> bool {
    let wanted = match task {
        TaskKind::Classification => Classification,
        TaskKind::Regression | TaskKind::Forecasting => Regression,
    };
    METRICS
        .iter()
        .any(|(name, _, family)| *name == metric && *family == wanted)
}

/// Names of every metric in the table applicable to `task`.
pub fn metrics_for(task: TaskKind) -> Vec<&'static str> {
    METRICS
        .iter()
        .map(|(name, _, _)| *name)
        .filter(|name| metric_applies_to(name, task))
        .collect()
}

/// Everything needed to address a child run's model remotely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildRunRef {
    pub job_id: String,
    pub run_id: String,
    /// Columns the model was trained on, label excluded.
    pub features: TabularSchema,
    pub label_name: Option<String>,
}

/// Best child of a completed job. Read-only once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub best_child: ChildRunRef,
    pub algorithm: String,
    /// Metric used for selection and the winning value.
    pub metric: String,
    pub score: f64,
    pub metrics: BTreeMap<String, f64>,
    pub ensemble: Option<EnsembleMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_metrics_are_minimised() {
        assert_eq!(metric_direction("root_mean_squared_error"), Some(Minimize));
        assert_eq!(metric_direction("log_loss"), Some(Minimize));
        assert_eq!(metric_direction("r2_score"), Some(Maximize));
        assert_eq!(metric_direction("made_up"), None);
    }

    #[test]
    fn defaults_are_in_the_table() {
        for task in [
            TaskKind::Classification,
            TaskKind::Regression,
            TaskKind::Forecasting,
        ] {
            let metric = task.default_primary_metric();
            assert!(metric_applies_to(metric, task), "{metric} for {task}");
        }
    }

    #[test]
    fn families_do_not_leak() {
        assert!(!metric_applies_to("accuracy", TaskKind::Regression));
        assert!(metric_applies_to("r2_score", TaskKind::Forecasting));
        assert!(!metrics_for(TaskKind::Classification).contains(&"r2_score"));
    }

    #[test]
    fn ties_keep_the_incumbent() {
        assert!(!Maximize.improves(0.5, 0.5));
        assert!(Minimize.improves(0.4, 0.5));
        assert!(!Minimize.improves(0.6, 0.5));
    }
}
