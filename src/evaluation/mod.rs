//! Result retrieval: metric directions and best-child selection.

pub mod domain;
pub mod service;

pub use domain::{metric_direction, ChildRunRef, Direction, ResultBundle};
pub use service::ResultRetriever;
