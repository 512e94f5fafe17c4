//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod process;
mod server;

pub use process::{DefaultHostConfig, LauncherConfig, HOST_ENTRY, MANAGER_ENTRY};
pub use server::{ManagerConfig, RpcConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "acqman.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ACQMAN_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ACQMAN";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ACQMAN_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and bind address of the manager.
    pub manager: ManagerConfig,
    /// How the manager spawns its own local host.
    pub default_host: DefaultHostConfig,
    /// Entry points available to the process launcher.
    pub launcher: LauncherConfig,
    /// Timeouts for calls to host and nodegroup agents.
    pub rpc: RpcConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `acqman.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix,
    ///    e.g. `ACQMAN__MANAGER__ADDRESS`
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.manager.name, "manager");
        assert_eq!(config.manager.address, "tcp://127.0.0.1:*");
        assert_eq!(config.default_host.name, "default-host");
        assert!(config.launcher.entries.contains_key("host"));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "manager:\n  name: rig-manager\n  address: tcp://10.1.1.1:5300\n\
             launcher:\n  ready_timeout_secs: 3\n  entries:\n    host: [\"/opt/rig/host\", \"--quiet\"]\n"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.manager.name, "rig-manager");
        assert_eq!(config.manager.address, "tcp://10.1.1.1:5300");
        assert_eq!(config.launcher.ready_timeout_secs, 3);
        assert_eq!(
            config.launcher.entries.get("host").unwrap(),
            &vec!["/opt/rig/host".to_string(), "--quiet".to_string()]
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.rpc, RpcConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("ACQMAN__MANAGER__NAME", "from-env");
        let config = Config::load(None);
        std::env::remove_var("ACQMAN__MANAGER__NAME");

        assert_eq!(config.unwrap().manager.name, "from-env");
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load(Some("/nonexistent/acqman.yaml")).is_err());
    }
}
