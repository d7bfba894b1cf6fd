//! Runtime configuration layered from defaults, an optional JSON file and the environment.
//!
//! Precedence (last wins): built-in defaults, `$MLRELAY_CONFIG` or `./mlrelay.json`,
//! `MLRELAY_*` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::{WorkflowError, WorkflowResult};
use crate::training::domain::PollPolicy;

const CONFIG_ENV: &str = "MLRELAY_CONFIG";
const LOCAL_CONFIG: &str = "mlrelay.json";

/// Snapshot of configuration values consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppCfg {
    /// Root directory for the filesystem-backed stores.
    pub data_root: String,
    /// Experiment that dashboard runs are grouped under.
    pub experiment_name: String,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    /// Consecutive transient read failures tolerated by the poll loop.
    pub max_transient_retries: u32,
    pub log_level: String,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            data_root: "./data".to_string(),
            experiment_name: "mlrelay".to_string(),
            poll_interval_ms: 5_000,
            poll_timeout_ms: 3_600_000,
            max_transient_retries: 3,
            log_level: "info".to_string(),
        }
    }
}

impl AppCfg {
    /// Build a configuration from every layer available to the process.
    pub fn load() -> WorkflowResult<Self> {
        let mut cfg = match config_path() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a JSON file; missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> WorkflowResult<Self> {
        let buf = fs::read(path)?;
        serde_json::from_slice(&buf)
            .map_err(|e| WorkflowError::Config(format!("{}: {e}", path.display())))
    }

    /// Save the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> WorkflowResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WorkflowError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Overlay values looked up by `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> WorkflowResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MLRELAY_DATA_ROOT") {
            self.data_root = v;
        }
        if let Some(v) = lookup("MLRELAY_EXPERIMENT") {
            self.experiment_name = v;
        }
        if let Some(v) = lookup("MLRELAY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_num("MLRELAY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("MLRELAY_POLL_TIMEOUT_MS") {
            self.poll_timeout_ms = parse_num("MLRELAY_POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MLRELAY_MAX_TRANSIENT_RETRIES") {
            self.max_transient_retries = parse_num("MLRELAY_MAX_TRANSIENT_RETRIES", &v)?;
        }
        if let Some(v) = lookup("MLRELAY_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(WorkflowError::Config("poll_interval_ms must be positive".into()));
        }
        if self.poll_timeout_ms < self.poll_interval_ms {
            return Err(WorkflowError::Config(
                "poll_timeout_ms must not be shorter than poll_interval_ms".into(),
            ));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(WorkflowError::Config("experiment_name is empty".into()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.poll_timeout_ms),
            max_transient_retries: self.max_transient_retries,
        }
    }

    pub fn data_root(&self) -> PathBuf {
        PathBuf::from(&self.data_root)
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(explicit));
    }
    let local = PathBuf::from(LOCAL_CONFIG);
    local.exists().then_some(local)
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> WorkflowResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| WorkflowError::Config(format!("{key}={raw} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_recovers_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("mlrelay.json");
        let cfg = AppCfg {
            experiment_name: "fairness".into(),
            poll_interval_ms: 10,
            ..AppCfg::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(AppCfg::load_from_file(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mlrelay.json");
        fs::write(&path, r#"{"poll_interval_ms": 250}"#).unwrap();
        let cfg = AppCfg::load_from_file(&path).unwrap();
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.max_transient_retries, 3);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mlrelay.json");
        fs::write(&path, r#"{"poll_intervall_ms": 250}"#).unwrap();
        assert!(matches!(
            AppCfg::load_from_file(&path),
            Err(WorkflowError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("MLRELAY_POLL_TIMEOUT_MS", "9000"),
            ("MLRELAY_EXPERIMENT", "automl-remote"),
        ]
        .into_iter()
        .collect();
        let mut cfg = AppCfg::default();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.poll_timeout_ms, 9000);
        assert_eq!(cfg.experiment_name, "automl-remote");

        let policy = cfg.poll_policy();
        assert_eq!(policy.timeout, Duration::from_millis(9000));
    }

    #[test]
    fn malformed_env_number_is_a_config_error() {
        let mut cfg = AppCfg::default();
        let err = cfg
            .apply_env(|k| (k == "MLRELAY_POLL_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
    }

    #[test]
    fn timeout_shorter_than_interval_is_invalid() {
        let cfg = AppCfg {
            poll_interval_ms: 100,
            poll_timeout_ms: 10,
            ..AppCfg::default()
        };
        assert!(cfg.validate().is_err());
    }
}
