//! Process-wide engine configuration.
//!
//! A run reads the configuration once at bootstrap; changing it mid-run
//! affects later runs only.

use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Tunables shared by every network in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backend resolved when `execute` is called without an explicit one.
    #[serde(default = "default_backend")]
    pub default_backend: String,
    /// Root under which per-run scratch directories are created.
    #[serde(default = "default_temp_mount")]
    pub temp_mount: PathBuf,
    /// Upper bound, in milliseconds, on how long a run waits between
    /// re-checks of chunk completion when no completion signal arrives.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_temp_mount() -> PathBuf {
    std::env::temp_dir()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_backend: default_backend(),
            temp_mount: default_temp_mount(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

static CONFIG: RwLock<Option<EngineConfig>> = RwLock::new(None);

/// Replace the process-wide configuration.
pub fn set(config: EngineConfig) {
    *CONFIG.write() = Some(config);
}

/// The current configuration, or the defaults if none was set.
pub fn get() -> EngineConfig {
    CONFIG.read().clone().unwrap_or_default()
}
