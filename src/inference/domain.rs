//! Remote prediction contracts: the model proxy and its inputs and outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::WorkflowResult;
use crate::data::domain::{ArtifactRef, TabularSchema};
use crate::evaluation::domain::ChildRunRef;

/// Single prediction: a regression value or a class label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionValue {
    Numeric(f64),
    Label(String),
}

impl PredictionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PredictionValue::Numeric(v) => Some(*v),
            PredictionValue::Label(_) => None,
        }
    }
}

impl fmt::Display for PredictionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionValue::Numeric(v) => write!(f, "{v}"),
            PredictionValue::Label(l) => f.write_str(l),
        }
    }
}

/// Training environment rebuilt on the remote side for a child run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub run_id: String,
    pub name: String,
    pub version: String,
}

/// Data handed to the proxy. Rows stay remote; only their location travels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyInput {
    pub data_ref: ArtifactRef,
    pub location: String,
    pub rows: u64,
    pub schema: TabularSchema,
}

/// Runs inference inside the original training environment, without
/// materialising the model locally.
pub trait ModelProxy {
    /// Fails with `EnvironmentMismatch` if the recorded dependencies cannot be rebuilt.
    fn reconstruct_environment(&self, child: &ChildRunRef) -> WorkflowResult<EnvironmentHandle>;

    fn predict(
        &self,
        child: &ChildRunRef,
        env: &EnvironmentHandle,
        input: &ProxyInput,
    ) -> WorkflowResult<Vec<PredictionValue>>;
}
