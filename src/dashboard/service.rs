//! Upload and download of dashboard payloads through a [`DashboardStore`].

use serde_json::json;

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::log as audit;

use super::domain::{
    DashboardEnvelope, DashboardPayload, DashboardStore, RunContext, UploadId, UploadSummary,
    SCHEMA_TYPE, SCHEMA_VERSION,
};

pub struct DashboardExchange<'a> {
    store: &'a dyn DashboardStore,
}

impl<'a> DashboardExchange<'a> {
    pub fn new(store: &'a dyn DashboardStore) -> Self {
        Self { store }
    }

    /// Serialise `payload` under `name` and store it on the run.
    pub fn upload(&self, run: &RunContext, payload: &DashboardPayload, name: &str) -> WorkflowResult<UploadId> {
        let reference = format!("dashboard {name} on run {}", run.run_id);
        payload.validate(&reference)?;
        let envelope = DashboardEnvelope {
            schema_type: SCHEMA_TYPE.to_string(),
            schema_version: SCHEMA_VERSION,
            name: name.to_string(),
            payload: payload.clone(),
        };
        let document = serde_json::to_string(&envelope)
            .map_err(|e| WorkflowError::serialization(reference, e))?;
        let upload_id = self.store.put(run, name, &document)?;
        audit::event(
            "dashboard",
            "uploaded",
            &[
                ("run_id", json!(run.run_id)),
                ("upload_id", json!(upload_id.as_str())),
                ("name", json!(name)),
                ("models", json!(payload.predictions.len())),
                ("bytes", json!(document.len())),
            ],
        );
        Ok(upload_id)
    }

    /// Fetch a payload previously returned by [`Self::upload`].
    pub fn download(&self, run: &RunContext, upload_id: &UploadId) -> WorkflowResult<DashboardPayload> {
        let reference = format!("upload {upload_id}");
        let document = self.store.get(run, upload_id)?;
        let envelope: DashboardEnvelope = serde_json::from_str(&document)
            .map_err(|e| WorkflowError::serialization(reference.clone(), e))?;
        if envelope.schema_type != SCHEMA_TYPE || envelope.schema_version != SCHEMA_VERSION {
            return Err(WorkflowError::serialization(
                reference,
                format!(
                    "unsupported schema {} v{}",
                    envelope.schema_type, envelope.schema_version
                ),
            ));
        }
        envelope.payload.validate(&reference)?;
        log::debug!("downloaded {reference} ({} bytes)", document.len());
        Ok(envelope.payload)
    }

    pub fn list_uploads(&self, run: &RunContext) -> WorkflowResult<Vec<UploadSummary>> {
        self.store.list(run)
    }
}
