//! Remote AutoML job submission: specs, handles, polling and compute.

pub mod backend_mem;
pub mod domain;
pub mod service;

pub use backend_mem::MemoryBackend;
pub use domain::{
    AutoMlSettings, ChildRun, ComputeConfig, ComputeRef, ExecutionBackend, JobHandle, JobSpec,
    JobStatus, PollPolicy, TaskKind,
};
pub use service::JobSubmitter;
