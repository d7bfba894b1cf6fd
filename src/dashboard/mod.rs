//! Fairness dashboard exchange: payload assembly, upload and download.

pub mod domain;
pub mod repo_fs;
pub mod repo_mem;
pub mod service;

pub use domain::{
    DashboardPayload, DashboardStore, ExperimentTracker, GroupMetricSetBuilder, MetricValue,
    PredictionType, RunContext, Scalar, UploadId,
};
pub use repo_fs::FsDashboardStore;
pub use repo_mem::MemoryDashboardStore;
pub use service::DashboardExchange;
