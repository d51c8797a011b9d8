//! Collaborator settings: radio, fanout, store, telemetry.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadioSettings {
    pub enabled: bool,
    /// Device path, or `tcp://host:port` for a serial bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Outbound frame queue depth.
    pub queue_size: usize,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device: None,
            queue_size: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    pub enabled: bool,
    /// Tag identifying this process on the shared channel. Generated when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Channel buffer depth.
    pub capacity: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            origin: None,
            capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub enabled: bool,
    /// Database path, relative to the settings directory unless absolute.
    pub path: String,
    /// Pending writes held before new ones are dropped.
    pub queue_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "vicinity.db".to_string(),
            queue_size: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Per-module overrides, e.g. `{"vicinity_radio": "debug"}`.
    pub module_levels: std::collections::BTreeMap<String, String>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist warn+ events to SQLite.
    pub log_to_sqlite: bool,
    /// Log database path, relative to the settings directory unless absolute.
    pub log_db_path: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Default::default(),
            json: false,
            log_to_sqlite: false,
            log_db_path: "logs.db".to_string(),
        }
    }
}
