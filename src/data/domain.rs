//! Versioned artifact references, tabular schemas and the store contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::{WorkflowError, WorkflowResult};

/// `{name, version}` pair identifying a registered dataset or model.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: u32,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dataset,
    Model,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Text,
    Boolean,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered column list of a tabular dataset.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TabularSchema {
    pub columns: Vec<Column>,
}

impl TabularSchema {
    /// Build a schema, rejecting empty and duplicate column names.
    pub fn new(columns: Vec<Column>) -> WorkflowResult<Self> {
        for (idx, col) in columns.iter().enumerate() {
            if col.name.trim().is_empty() {
                return Err(WorkflowError::invalid_spec(
                    "schema",
                    format!("column {idx} has an empty name"),
                ));
            }
            if columns[..idx].iter().any(|c| c.name == col.name) {
                return Err(WorkflowError::invalid_spec(
                    "schema",
                    format!("duplicate column {}", col.name),
                ));
            }
        }
        Ok(Self { columns })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Schema without the named column; used to derive feature columns from training data.
    pub fn without(&self, name: &str) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|c| c.name != name)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// What is being registered under a name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Dataset {
        location: String,
        schema: TabularSchema,
        rows: u64,
        fingerprint: String,
    },
    Model {
        /// Job and child run the model artifact was produced by.
        source_job: String,
        source_run: String,
        /// Feature schema the model was trained on.
        schema: TabularSchema,
        tags: Vec<(String, String)>,
    },
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::Dataset { .. } => ArtifactKind::Dataset,
            ArtifactPayload::Model { .. } => ArtifactKind::Model,
        }
    }

    pub fn schema(&self) -> &TabularSchema {
        match self {
            ArtifactPayload::Dataset { schema, .. } | ArtifactPayload::Model { schema, .. } => {
                schema
            }
        }
    }
}

/// Immutable metadata stored for every registered version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub reference: ArtifactRef,
    pub created_ms: u64,
    pub payload: ArtifactPayload,
}

impl ArtifactRecord {
    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }
}

/// Versioned registration and lookup of datasets and models.
///
/// Versions start at 1 and increase by one per name. Existing versions are
/// never rewritten.
pub trait ArtifactStore {
    fn register(&self, name: &str, payload: ArtifactPayload) -> WorkflowResult<ArtifactRef>;
    fn record(&self, reference: &ArtifactRef) -> WorkflowResult<ArtifactRecord>;
    /// All versions registered under `name`, ascending. Empty if unknown.
    fn versions(&self, name: &str) -> WorkflowResult<Vec<u32>>;

    /// Location the remote backend reads the artifact from.
    fn resolve(&self, reference: &ArtifactRef) -> WorkflowResult<String> {
        let record = self.record(reference)?;
        Ok(match record.payload {
            ArtifactPayload::Dataset { location, .. } => location,
            ArtifactPayload::Model { source_run, .. } => format!("runs/{source_run}/outputs/model"),
        })
    }

    fn latest(&self, name: &str) -> WorkflowResult<ArtifactRef> {
        self.versions(name)?
            .last()
            .map(|v| ArtifactRef::new(name, *v))
            .ok_or_else(|| WorkflowError::not_found(format!("artifact {name}")))
    }
}

pub(crate) fn validate_name(name: &str) -> WorkflowResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(WorkflowError::invalid_spec(
            format!("artifact {name:?}"),
            "names use [A-Za-z0-9._-] and must not start with '.'",
        ))
    }
}
