//! Data domain: versioned registration of datasets and model artifacts.

pub mod domain;
pub mod repo_fs;
pub mod repo_mem;
pub mod service;

pub use domain::{
    ArtifactKind, ArtifactPayload, ArtifactRecord, ArtifactRef, ArtifactStore, Column, ColumnType,
    TabularSchema,
};
pub use repo_fs::FsArtifactStore;
pub use repo_mem::MemoryArtifactStore;
