//! Filesystem-backed artifact store: one JSON metadata file per name/version.
//!
//! Layout: `<data_root>/artifacts/<name>/<version>.json`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::common::config::AppCfg;
use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::time;

use super::domain::{validate_name, ArtifactPayload, ArtifactRecord, ArtifactRef, ArtifactStore};

pub struct FsArtifactStore {
    root: PathBuf,
    // serialises version allocation within this process
    write_lock: Mutex<()>,
}

impl FsArtifactStore {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::at(cfg.data_root().join("artifacts"))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn record_path(&self, reference: &ArtifactRef) -> PathBuf {
        self.root
            .join(&reference.name)
            .join(format!("{}.json", reference.version))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn register(&self, name: &str, payload: ArtifactPayload) -> WorkflowResult<ArtifactRef> {
        validate_name(name)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| WorkflowError::backend("artifact store", "lock poisoned"))?;

        fs::create_dir_all(self.root.join(name))?;
        let next = self.versions(name)?.last().copied().unwrap_or(0) + 1;
        let record = ArtifactRecord {
            reference: ArtifactRef::new(name, next),
            created_ms: time::now_ms(),
            payload,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| WorkflowError::serialization(record.reference.to_string(), e))?;

        // create_new keeps an existing version from ever being overwritten
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.record_path(&record.reference))?;
        file.write_all(&json)?;
        log::debug!("registered artifact {}", record.reference);
        Ok(record.reference)
    }

    fn record(&self, reference: &ArtifactRef) -> WorkflowResult<ArtifactRecord> {
        validate_name(&reference.name)?;
        let path = self.record_path(reference);
        let buf = match fs::read(&path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorkflowError::not_found(format!("artifact {reference}")))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&buf)
            .map_err(|e| WorkflowError::serialization(reference.to_string(), e))
    }

    fn versions(&self, name: &str) -> WorkflowResult<Vec<u32>> {
        validate_name(name)?;
        let dir = self.root.join(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(v) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}
