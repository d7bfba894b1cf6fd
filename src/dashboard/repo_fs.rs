//! Filesystem run tracker and dashboard store.
//!
//! Layout: `<data_root>/runs/<run_id>/run.json` and
//! `<data_root>/runs/<run_id>/dashboards/<upload_id>.json`.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::config::AppCfg;
use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::time;
use crate::data::domain::validate_name;

use super::domain::{DashboardStore, ExperimentTracker, RunContext, UploadId, UploadSummary};

#[derive(Serialize, Deserialize)]
struct RunFile {
    experiment: String,
    run_id: String,
    started_ms: u64,
    completed_ms: Option<u64>,
    uploads: Vec<UploadSummary>,
}

pub struct FsDashboardStore {
    root: PathBuf,
    // serialises read-modify-write of run.json within this process
    write_lock: Mutex<()>,
}

impl FsDashboardStore {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::at(cfg.data_root().join("runs"))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> WorkflowResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| WorkflowError::backend("dashboard store", "lock poisoned"))
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn read_run(&self, run: &RunContext) -> WorkflowResult<RunFile> {
        validate_name(&run.run_id)?;
        let path = self.run_dir(&run.run_id).join("run.json");
        let buf = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WorkflowError::not_found(format!("run {}", run.run_id)),
            _ => e.into(),
        })?;
        serde_json::from_slice(&buf)
            .map_err(|e| WorkflowError::serialization(format!("run {}", run.run_id), e))
    }

    fn write_run(&self, file: &RunFile) -> WorkflowResult<()> {
        let dir = self.run_dir(&file.run_id);
        fs::create_dir_all(dir.join("dashboards"))?;
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| WorkflowError::serialization(format!("run {}", file.run_id), e))?;
        fs::write(dir.join("run.json"), json)?;
        Ok(())
    }
}

impl ExperimentTracker for FsDashboardStore {
    fn start_run(&self, experiment: &str) -> WorkflowResult<RunContext> {
        validate_name(experiment)?;
        let run_id = format!("{experiment}_{}", Uuid::new_v4().simple());
        self.write_run(&RunFile {
            experiment: experiment.to_string(),
            run_id: run_id.clone(),
            started_ms: time::now_ms(),
            completed_ms: None,
            uploads: Vec::new(),
        })?;
        Ok(RunContext {
            experiment: experiment.to_string(),
            run_id,
        })
    }

    fn complete(&self, run: &RunContext) -> WorkflowResult<()> {
        let _guard = self.lock()?;
        let mut file = self.read_run(run)?;
        file.completed_ms.get_or_insert(time::now_ms());
        self.write_run(&file)
    }
}

impl DashboardStore for FsDashboardStore {
    fn put(&self, run: &RunContext, name: &str, document: &str) -> WorkflowResult<UploadId> {
        let _guard = self.lock()?;
        let mut file = self.read_run(run)?;
        let upload_id = UploadId(Uuid::new_v4().to_string());
        let path = self
            .run_dir(&run.run_id)
            .join("dashboards")
            .join(format!("{upload_id}.json"));
        fs::write(&path, document)?;
        file.uploads.push(UploadSummary {
            upload_id: upload_id.clone(),
            name: name.to_string(),
        });
        if let Err(err) = self.write_run(&file) {
            if let Err(cleanup) = fs::remove_file(&path) {
                log::warn!("orphaned dashboard {}: {cleanup}", path.display());
            }
            return Err(err);
        }
        Ok(upload_id)
    }

    fn get(&self, run: &RunContext, upload_id: &UploadId) -> WorkflowResult<String> {
        let file = self.read_run(run)?;
        // only ids recorded for the run are looked up, so arbitrary strings never reach a path
        if !file.uploads.iter().any(|u| &u.upload_id == upload_id) {
            return Err(WorkflowError::not_found(format!("upload {upload_id}")));
        }
        let path = self
            .run_dir(&run.run_id)
            .join("dashboards")
            .join(format!("{upload_id}.json"));
        fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WorkflowError::not_found(format!("upload {upload_id}")),
            _ => e.into(),
        })
    }

    fn list(&self, run: &RunContext) -> WorkflowResult<Vec<UploadSummary>> {
        Ok(self.read_run(run)?.uploads)
    }
}
