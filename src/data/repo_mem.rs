//! In-process artifact store for local workflows and tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::time;

use super::domain::{validate_name, ArtifactPayload, ArtifactRecord, ArtifactRef, ArtifactStore};

#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<BTreeMap<String, Vec<ArtifactRecord>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<ArtifactRecord>>>> {
        self.entries
            .lock()
            .map_err(|_| WorkflowError::backend("artifact store", "lock poisoned"))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn register(&self, name: &str, payload: ArtifactPayload) -> WorkflowResult<ArtifactRef> {
        validate_name(name)?;
        let mut entries = self.lock()?;
        let versions = entries.entry(name.to_string()).or_default();
        let reference = ArtifactRef::new(name, versions.len() as u32 + 1);
        versions.push(ArtifactRecord {
            reference: reference.clone(),
            created_ms: time::now_ms(),
            payload,
        });
        Ok(reference)
    }

    fn record(&self, reference: &ArtifactRef) -> WorkflowResult<ArtifactRecord> {
        let entries = self.lock()?;
        entries
            .get(&reference.name)
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|r| r.reference.version == reference.version)
            })
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("artifact {reference}")))
    }

    fn versions(&self, name: &str) -> WorkflowResult<Vec<u32>> {
        let entries = self.lock()?;
        Ok(entries
            .get(name)
            .map(|v| v.iter().map(|r| r.reference.version).collect())
            .unwrap_or_default())
    }
}
