//! Logging setup plus a JSON-line helper for audit events.

use serde_json::{Map, Value};

/// Install `env_logger`, honouring `RUST_LOG` and falling back to `default_level`.
///
/// Safe to call repeatedly; only the first call installs the logger.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Emit a single-line JSON record for a workflow event.
pub fn event(module: &str, name: &str, fields: &[(&str, Value)]) {
    log::info!(target: "mlrelay::audit", "{}", render(module, name, fields));
}

fn render(module: &str, name: &str, fields: &[(&str, Value)]) -> String {
    let mut record = Map::new();
    record.insert("ts".into(), Value::from(crate::common::time::now_ms()));
    record.insert("mod".into(), Value::from(module));
    record.insert("ev".into(), Value::from(name));
    for (key, value) in fields {
        record.insert((*key).to_string(), value.clone());
    }
    Value::Object(record).to_string()
}
