//! Predict-by-proxy: remote inference in the original training environment.

pub mod domain;
pub mod service;

pub use domain::{ModelProxy, PredictionValue};
pub use service::ProxyPredictor;
