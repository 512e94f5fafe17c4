//! Manager factory.
//!
//! Builds a manager either inside the calling process or as a separate
//! `acqman-manager` child reached over gRPC.

use std::sync::Arc;

use tracing::{info, warn};

use crate::address::{Address, AddressError};
use crate::config::{Config, MANAGER_ENTRY};
use crate::grpc::{GrpcConnector, ManagerProxy, ProxyError};
use crate::interfaces::{LaunchError, ProcessLauncher};
use crate::manager::Manager;
use crate::process::SubprocessLauncher;

/// Where the manager runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerMode {
    /// In this process, called directly.
    Local,
    /// In a child process on the loopback interface.
    Spawned,
}

/// Address a spawned manager is asked to bind.
const SPAWN_ADDRESS: &str = "tcp://127.0.0.1:*";

/// Errors from [`create_manager`].
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("invalid manager address: {0}")]
    Address(#[from] AddressError),

    #[error("failed to launch manager: {0}")]
    Launch(#[from] LaunchError),

    #[error("failed to reach spawned manager: {0}")]
    Connect(#[from] ProxyError),
}

/// A manager created by [`create_manager`].
pub enum ManagerHandle {
    Local(Arc<Manager>),
    /// Proxy that owns the spawned manager process.
    Remote(ManagerProxy),
}

impl ManagerHandle {
    pub fn name(&self) -> &str {
        match self {
            ManagerHandle::Local(manager) => manager.name(),
            ManagerHandle::Remote(proxy) => proxy.name(),
        }
    }

    pub fn address(&self) -> &Address {
        match self {
            ManagerHandle::Local(manager) => manager.address(),
            ManagerHandle::Remote(proxy) => proxy.address(),
        }
    }

    pub fn as_local(&self) -> Option<&Arc<Manager>> {
        match self {
            ManagerHandle::Local(manager) => Some(manager),
            ManagerHandle::Remote(_) => None,
        }
    }

    pub fn into_proxy(self) -> Option<ManagerProxy> {
        match self {
            ManagerHandle::Local(_) => None,
            ManagerHandle::Remote(proxy) => Some(proxy),
        }
    }
}

/// Build a manager wired to real gRPC agents and subprocess launching.
pub fn local_manager(config: &Config) -> Result<Manager, FactoryError> {
    let address = Address::parse(&config.manager.address)?;
    Ok(local_manager_at(config, &config.manager.name, address))
}

/// Same as [`local_manager`], for a name and address already resolved.
pub fn local_manager_at(config: &Config, name: &str, address: Address) -> Manager {
    Manager::new(
        name,
        address,
        Arc::new(GrpcConnector::new(config.rpc.clone())),
        Arc::new(SubprocessLauncher::new(&config.launcher)),
    )
    .with_default_host(config.default_host.clone())
}

/// Create a manager in the requested mode.
pub async fn create_manager(mode: ManagerMode, config: &Config) -> Result<ManagerHandle, FactoryError> {
    match mode {
        ManagerMode::Local => {
            let manager = local_manager(config)?;
            info!(manager = %manager.name(), "Created local manager");
            Ok(ManagerHandle::Local(Arc::new(manager)))
        }
        ManagerMode::Spawned => {
            let launcher = SubprocessLauncher::new(&config.launcher);
            spawn_manager(&launcher, &config.manager.name).await.map(ManagerHandle::Remote)
        }
    }
}

async fn spawn_manager(
    launcher: &dyn ProcessLauncher,
    name: &str,
) -> Result<ManagerProxy, FactoryError> {
    let template = Address::parse(SPAWN_ADDRESS)?;
    let mut process = launcher.launch(MANAGER_ENTRY, name, &template).await?;
    let (name, address) = (process.name().to_string(), process.address().clone());

    match ManagerProxy::connect(&name, &address).await {
        Ok(proxy) => {
            info!(manager = %name, address = %address, "Spawned manager");
            Ok(proxy.with_process(process))
        }
        Err(e) => {
            if let Err(stop) = process.stop().await {
                warn!(manager = %name, error = %stop, "Failed to stop unreachable manager");
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;

    #[tokio::test]
    async fn test_local_manager_uses_config_identity() {
        let mut config = Config::for_test();
        config.manager.name = "rig".to_string();
        config.manager.address = "tcp://127.0.0.1:5300".to_string();

        let handle = create_manager(ManagerMode::Local, &config).await.unwrap();
        assert_eq!(handle.name(), "rig");
        assert_eq!(handle.address().to_string(), "tcp://127.0.0.1:5300");

        let manager = handle.as_local().unwrap();
        assert!(manager.list_hosts().await.is_empty());
        assert!(handle.into_proxy().is_none());
    }

    #[tokio::test]
    async fn test_local_manager_rejects_bad_address() {
        let mut config = Config::for_test();
        config.manager.address = "127.0.0.1".to_string();

        let result = create_manager(ManagerMode::Local, &config).await;
        assert!(matches!(result, Err(FactoryError::Address(_))));
    }

    #[tokio::test]
    async fn test_spawned_manager_needs_entry_point() {
        let mut config = Config::for_test();
        config.launcher = LauncherConfig {
            entries: Default::default(),
            ready_timeout_secs: 1,
        };

        let result = create_manager(ManagerMode::Spawned, &config).await;
        assert!(matches!(
            result,
            Err(FactoryError::Launch(LaunchError::UnknownEntry(_)))
        ));
    }
}
