//! Manager identity and RPC configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// RPC name of the manager.
    pub name: String,
    /// Address to serve on. A `*` port lets the OS choose.
    pub address: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "manager".to_string(),
            address: "tcp://127.0.0.1:*".to_string(),
        }
    }
}

/// Timeouts applied to every call made to a host or nodegroup agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl RpcConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_config_default() {
        let rpc = RpcConfig::default();
        assert_eq!(rpc.connect_timeout(), Duration::from_secs(5));
        assert_eq!(rpc.request_timeout(), Duration::from_secs(30));
    }
}
