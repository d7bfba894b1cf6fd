//! Public entry points composing the domains into one flow.

pub mod workflow;

pub use workflow::{DashboardRequest, Workspace};
