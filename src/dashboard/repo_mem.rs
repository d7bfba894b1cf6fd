//! In-process run tracker and dashboard store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::data::domain::validate_name;

use super::domain::{DashboardStore, ExperimentTracker, RunContext, UploadId, UploadSummary};

#[derive(Default)]
struct MemRun {
    completed: bool,
    uploads: Vec<(UploadSummary, String)>,
}

#[derive(Default)]
pub struct MemoryDashboardStore {
    runs: Mutex<BTreeMap<String, MemRun>>,
}

impl MemoryDashboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<MutexGuard<'_, BTreeMap<String, MemRun>>> {
        self.runs
            .lock()
            .map_err(|_| WorkflowError::backend("dashboard store", "lock poisoned"))
    }

    pub fn is_completed(&self, run: &RunContext) -> bool {
        self.lock()
            .map(|runs| runs.get(&run.run_id).is_some_and(|r| r.completed))
            .unwrap_or(false)
    }
}

impl ExperimentTracker for MemoryDashboardStore {
    fn start_run(&self, experiment: &str) -> WorkflowResult<RunContext> {
        validate_name(experiment)?;
        let run = RunContext {
            experiment: experiment.to_string(),
            run_id: format!("{experiment}_{}", Uuid::new_v4().simple()),
        };
        self.lock()?.insert(run.run_id.clone(), MemRun::default());
        Ok(run)
    }

    fn complete(&self, run: &RunContext) -> WorkflowResult<()> {
        let mut runs = self.lock()?;
        let entry = runs
            .get_mut(&run.run_id)
            .ok_or_else(|| WorkflowError::not_found(format!("run {}", run.run_id)))?;
        entry.completed = true;
        Ok(())
    }
}

impl DashboardStore for MemoryDashboardStore {
    fn put(&self, run: &RunContext, name: &str, document: &str) -> WorkflowResult<UploadId> {
        let mut runs = self.lock()?;
        let entry = runs
            .get_mut(&run.run_id)
            .ok_or_else(|| WorkflowError::not_found(format!("run {}", run.run_id)))?;
        let upload_id = UploadId(Uuid::new_v4().to_string());
        entry.uploads.push((
            UploadSummary {
                upload_id: upload_id.clone(),
                name: name.to_string(),
            },
            document.to_string(),
        ));
        Ok(upload_id)
    }

    fn get(&self, run: &RunContext, upload_id: &UploadId) -> WorkflowResult<String> {
        let runs = self.lock()?;
        runs.get(&run.run_id)
            .and_then(|r| r.uploads.iter().find(|(s, _)| &s.upload_id == upload_id))
            .map(|(_, doc)| doc.clone())
            .ok_or_else(|| WorkflowError::not_found(format!("upload {upload_id}")))
    }

    fn list(&self, run: &RunContext) -> WorkflowResult<Vec<UploadSummary>> {
        let runs = self.lock()?;
        runs.get(&run.run_id)
            .map(|r| r.uploads.iter().map(|(s, _)| s.clone()).collect())
            .ok_or_else(|| WorkflowError::not_found(format!("run {}", run.run_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_requires_a_started_run() {
        let store = MemoryDashboardStore::new();
        let ghost = RunContext {
            experiment: "fairness".into(),
            run_id: "nope".into(),
        };
        assert!(matches!(
            store.put(&ghost, "d", "{}"),
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[test]
    fn documents_are_scoped_to_their_run() {
        let store = MemoryDashboardStore::new();
        let a = store.start_run("fairness").unwrap();
        let b = store.start_run("fairness").unwrap();
        assert_ne!(a.run_id, b.run_id);
        let id = store.put(&a, "dash", "{\"k\":1}").unwrap();
        assert_eq!(store.get(&a, &id).unwrap(), "{\"k\":1}");
        assert!(store.get(&b, &id).is_err());
        assert_eq!(store.list(&a).unwrap().len(), 1);
        assert!(store.list(&b).unwrap().is_empty());
    }

    #[test]
    fn complete_marks_the_run() {
        let store = MemoryDashboardStore::new();
        let run = store.start_run("fairness").unwrap();
        assert!(!store.is_completed(&run));
        store.complete(&run).unwrap();
        assert!(store.is_completed(&run));
    }
}
