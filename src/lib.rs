//! Orchestration for remote AutoML jobs: submit against versioned data,
//! pick the best child run, predict through a model proxy and exchange
//! fairness dashboards.
pub mod api;
pub mod common;
pub mod dashboard;
pub mod data;
pub mod evaluation;
pub mod inference;
pub mod training;

pub use api::Workspace;
pub use common::{ErrorCode, WorkflowError, WorkflowResult};
