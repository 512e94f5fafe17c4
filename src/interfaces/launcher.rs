//! Process launcher interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::address::Address;

/// Errors that can occur while launching or stopping a service process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("No command configured for entry point {0:?}")]
    UnknownEntry(String),

    #[error("Failed to spawn {entry}: {source}")]
    Spawn {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{entry} did not report ready within {timeout:?}")]
    ReadyTimeout { entry: String, timeout: Duration },

    #[error("{entry} exited before reporting ready")]
    ExitedEarly { entry: String },

    #[error("{entry} reported a malformed ready line: {line:?}")]
    Handshake { entry: String, line: String },

    #[error("Failed to stop {name}: {source}")]
    Stop {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running service started by a [`ProcessLauncher`].
#[async_trait]
pub trait LaunchedProcess: Send + Sync {
    /// RPC name the process registered under.
    fn name(&self) -> &str;

    /// Address the process actually bound.
    fn address(&self) -> &Address;

    /// Terminate the process. Stopping twice is not an error.
    async fn stop(&mut self) -> Result<(), LaunchError>;
}

/// Starts RPC services in fresh operating-system processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launch `entry` as an RPC server.
    ///
    /// Resolves once the process reports its bound name and address.
    async fn launch(
        &self,
        entry: &str,
        suggested_name: &str,
        address: &Address,
    ) -> Result<Box<dyn LaunchedProcess>, LaunchError>;
}
