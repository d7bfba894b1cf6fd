//! In-process execution backend for local simulation and tests.
//!
//! Jobs follow scripted status sequences, transient read failures can be
//! injected, and predictions come from closures registered per child run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::common::ids::Fingerprint;
use crate::evaluation::domain::ChildRunRef;
use crate::inference::domain::{EnvironmentHandle, ModelProxy, PredictionValue, ProxyInput};

use super::domain::{
    ChildRun, ComputeConfig, ComputeProvider, ComputeRef, ExecutionBackend, JobSpec, JobStatus,
};

pub type Predictor = Box<dyn Fn(&ProxyInput) -> Vec<PredictionValue> + Send + Sync>;

struct MemJob {
    current: JobStatus,
    script: VecDeque<JobStatus>,
    children: Vec<ChildRun>,
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, MemJob>,
    pending: VecDeque<(Vec<JobStatus>, Vec<ChildRun>)>,
    /// Outcome of upcoming status reads; `true` fails the read.
    read_faults: VecDeque<bool>,
    status_reads: u64,
    submitted: u64,
    computes: BTreeMap<String, ComputeRef>,
    broken_environments: BTreeSet<String>,
    predictors: BTreeMap<String, Predictor>,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| WorkflowError::backend("memory backend", "lock poisoned"))
    }

    /// Queue the status sequence and child runs for the next submitted job.
    ///
    /// Each status read advances one step; the last status then repeats.
    /// Jobs submitted without a script run straight to Completed with no children.
    pub fn script_next(&self, statuses: Vec<JobStatus>, children: Vec<ChildRun>) {
        if let Ok(mut inner) = self.lock() {
            inner.pending.push_back((statuses, children));
        }
    }

    /// Queue `count` status reads that fail with a transient error.
    ///
    /// Queued outcomes are consumed in order, after any queued earlier.
    pub fn fail_next_reads(&self, count: u32) {
        self.queue_reads(count, true);
    }

    /// Queue `count` status reads that are served normally.
    pub fn pass_next_reads(&self, count: u32) {
        self.queue_reads(count, false);
    }

    fn queue_reads(&self, count: u32, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.read_faults.extend((0..count).map(|_| fail));
        }
    }

    /// Number of status reads served, including failed ones.
    pub fn status_reads(&self) -> u64 {
        self.lock().map(|inner| inner.status_reads).unwrap_or_default()
    }

    /// Make the recorded environment of `run_id` impossible to rebuild.
    pub fn break_environment(&self, run_id: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.broken_environments.insert(run_id.to_string());
        }
    }

    pub fn set_predictor<F>(&self, run_id: &str, predictor: F)
    where
        F: Fn(&ProxyInput) -> Vec<PredictionValue> + Send + Sync + 'static,
    {
        if let Ok(mut inner) = self.lock() {
            inner
                .predictors
                .insert(run_id.to_string(), Box::new(predictor));
        }
    }

    fn find_child(inner: &Inner, child: &ChildRunRef) -> WorkflowResult<ChildRun> {
        inner
            .jobs
            .get(&child.job_id)
            .and_then(|job| job.children.iter().find(|c| c.run_id == child.run_id))
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("run {}", child.run_id)))
    }
}

impl ExecutionBackend for MemoryBackend {
    fn submit(&self, spec: &JobSpec, data_location: &str) -> WorkflowResult<String> {
        let mut inner = self.lock()?;
        inner.submitted += 1;
        let mut fp = Fingerprint::of(spec.experiment_name.as_bytes());
        fp.update(data_location.as_bytes());
        fp.update(&inner.submitted.to_le_bytes());
        let job_id = format!("{}_{}", spec.experiment_name, fp.finish_hex());

        let (script, children) = inner
            .pending
            .pop_front()
            .unwrap_or_else(|| (vec![JobStatus::Completed], Vec::new()));
        inner.jobs.insert(
            job_id.clone(),
            MemJob {
                current: JobStatus::Queued,
                script: script.into(),
                children,
            },
        );
        Ok(job_id)
    }

    fn status(&self, job_id: &str) -> WorkflowResult<JobStatus> {
        let mut inner = self.lock()?;
        inner.status_reads += 1;
        if inner.read_faults.pop_front().unwrap_or(false) {
            return Err(WorkflowError::unavailable(job_id, "connection reset"));
        }
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| WorkflowError::not_found(format!("job {job_id}")))?;
        if !job.current.is_terminal() {
            if let Some(next) = job.script.pop_front() {
                job.current = next;
            }
        }
        Ok(job.current)
    }

    fn child_runs(&self, job_id: &str) -> WorkflowResult<Vec<ChildRun>> {
        let inner = self.lock()?;
        inner
            .jobs
            .get(job_id)
            .map(|job| job.children.clone())
            .ok_or_else(|| WorkflowError::not_found(format!("job {job_id}")))
    }

    fn cancel(&self, job_id: &str) -> WorkflowResult<JobStatus> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| WorkflowError::not_found(format!("job {job_id}")))?;
        if !job.current.is_terminal() {
            job.current = JobStatus::Canceled;
            job.script.clear();
        }
        Ok(job.current)
    }
}

impl ComputeProvider for MemoryBackend {
    fn create_or_get_compute(&self, name: &str, config: &ComputeConfig) -> WorkflowResult<ComputeRef> {
        config.validate(name)?;
        let mut inner = self.lock()?;
        let compute = inner
            .computes
            .entry(name.to_string())
            .or_insert_with(|| ComputeRef {
                name: name.to_string(),
                vm_size: config.vm_size.clone(),
                max_nodes: config.max_nodes,
            });
        Ok(compute.clone())
    }
}

impl ModelProxy for MemoryBackend {
    fn reconstruct_environment(&self, child: &ChildRunRef) -> WorkflowResult<EnvironmentHandle> {
        let inner = self.lock()?;
        let run = Self::find_child(&inner, child)?;
        let mismatch = |reason: &str| WorkflowError::EnvironmentMismatch {
            run_id: child.run_id.clone(),
            reason: reason.to_string(),
        };
        let env = run
            .environment
            .ok_or_else(|| mismatch("no environment was recorded"))?;
        if inner.broken_environments.contains(&child.run_id) {
            return Err(mismatch("recorded dependency pins cannot be resolved"));
        }
        Ok(EnvironmentHandle {
            run_id: child.run_id.clone(),
            name: env.name,
            version: env.version,
        })
    }

    fn predict(
        &self,
        child: &ChildRunRef,
        env: &EnvironmentHandle,
        input: &ProxyInput,
    ) -> WorkflowResult<Vec<PredictionValue>> {
        let inner = self.lock()?;
        if env.run_id != child.run_id {
            return Err(WorkflowError::EnvironmentMismatch {
                run_id: child.run_id.clone(),
                reason: format!("environment belongs to run {}", env.run_id),
            });
        }
        let predictor = inner.predictors.get(&child.run_id).ok_or_else(|| {
            WorkflowError::backend(format!("run {}", child.run_id), "no model deployed")
        })?;
        Ok(predictor(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::ArtifactRef;
    use crate::training::domain::TaskKind;

    fn spec() -> JobSpec {
        JobSpec::new(
            "exp",
            TaskKind::Regression,
            ComputeRef {
                name: "cpu".into(),
                vm_size: "small".into(),
                max_nodes: 1,
            },
            ArtifactRef::new("d", 1),
        )
    }

    #[test]
    fn scripted_statuses_advance_per_read_then_hold() {
        let backend = MemoryBackend::new();
        backend.script_next(vec![JobStatus::Running, JobStatus::Completed], vec![]);
        let id = backend.submit(&spec(), "mem://d").unwrap();
        assert_eq!(backend.status(&id).unwrap(), JobStatus::Running);
        assert_eq!(backend.status(&id).unwrap(), JobStatus::Completed);
        assert_eq!(backend.status(&id).unwrap(), JobStatus::Completed);
        assert_eq!(backend.status_reads(), 3);
    }

    #[test]
    fn job_ids_are_unique_per_submission() {
        let backend = MemoryBackend::new();
        let a = backend.submit(&spec(), "mem://d").unwrap();
        let b = backend.submit(&spec(), "mem://d").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("exp_"));
    }

    #[test]
    fn cancel_does_not_touch_terminal_jobs() {
        let backend = MemoryBackend::new();
        let id = backend.submit(&spec(), "mem://d").unwrap();
        assert_eq!(backend.status(&id).unwrap(), JobStatus::Completed);
        assert_eq!(backend.cancel(&id).unwrap(), JobStatus::Completed);
    }

    #[test]
    fn compute_is_created_once_per_name() {
        let backend = MemoryBackend::new();
        let first = backend
            .create_or_get_compute("cpu", &ComputeConfig::new("STANDARD_D2_V2", 4))
            .unwrap();
        let again = backend
            .create_or_get_compute("cpu", &ComputeConfig::new("STANDARD_NC6", 8))
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(again.max_nodes, 4);
    }

    #[test]
    fn transient_failures_are_consumed() {
        let backend = MemoryBackend::new();
        let id = backend.submit(&spec(), "mem://d").unwrap();
        backend.fail_next_reads(1);
        assert!(backend.status(&id).unwrap_err().is_transient());
        assert!(backend.status(&id).is_ok());
    }
}
