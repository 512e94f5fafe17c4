//! Process launching configuration types.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Entry point name for a host agent.
pub const HOST_ENTRY: &str = "host";
/// Entry point name for the manager itself.
pub const MANAGER_ENTRY: &str = "manager";

/// How the manager spawns its default local host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultHostConfig {
    /// Name suggested to the spawned host.
    pub name: String,
    /// Launcher entry point to run.
    pub entry: String,
}

impl Default for DefaultHostConfig {
    fn default() -> Self {
        Self {
            name: "default-host".to_string(),
            entry: HOST_ENTRY.to_string(),
        }
    }
}

/// Commands the launcher may run, keyed by entry point name.
///
/// Each command is an array: executable first, then arguments. No shell
/// interpretation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub entries: HashMap<String, Vec<String>>,
    /// How long a launched process has to report its bound address.
    pub ready_timeout_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let entries = HashMap::from([
            (HOST_ENTRY.to_string(), vec!["acqman-host".to_string()]),
            (MANAGER_ENTRY.to_string(), vec!["acqman-manager".to_string()]),
        ]);
        Self {
            entries,
            ready_timeout_secs: 30,
        }
    }
}

impl LauncherConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
