//! Remote agent client interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::address::Address;

/// Caller-supplied keyword options, forwarded to agents untouched.
pub type Options = serde_json::Map<String, Value>;

/// Result type for remote agent calls.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Failures surfaced by the remote call channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Remote call rejected: {0}")]
    Rejected(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    #[error("Invalid remote address: {0}")]
    InvalidAddress(String),

    #[error("Malformed payload: {0}")]
    Codec(String),
}

impl RemoteError {
    /// True when the peer could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Connection(_) | RemoteError::Timeout(_))
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Codec(e.to_string())
    }
}

/// Client handle to a host agent.
///
/// A host agent is a long-lived service on one machine that spawns and
/// closes nodegroup worker processes there.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Spawn a nodegroup process.
    ///
    /// `address` may carry a wildcard port; the returned address is the
    /// one the worker actually bound.
    async fn create_nodegroup(&self, name: &str, address: &Address) -> Result<(String, Address)>;

    /// Ask the host agent to shut itself down.
    async fn close(&self) -> Result<()>;
}

/// Client handle to a nodegroup agent (one worker process).
#[async_trait]
pub trait NodegroupClient: Send + Sync {
    /// Instantiate a node of class `classname`.
    ///
    /// Returns the output stream descriptors the worker reports for it.
    async fn create_node(&self, name: &str, classname: &str, options: &Options)
        -> Result<Vec<Value>>;

    /// Invoke `method` on a node and return the agent's result verbatim.
    async fn control_node(&self, name: &str, method: &str, options: &Options) -> Result<Value>;

    async fn delete_node(&self, name: &str) -> Result<()>;

    async fn start_all_nodes(&self) -> Result<()>;

    async fn stop_all_nodes(&self) -> Result<()>;

    /// Ask the worker process to shut itself down.
    async fn close(&self) -> Result<()>;
}

/// Opens remote-call handles.
///
/// Opening a handle binds a name to an address; it must not contact the
/// peer. The first actual call does.
pub trait RemoteConnector: Send + Sync {
    fn connect_host(&self, name: &str, address: &Address) -> Result<Arc<dyn HostClient>>;

    fn connect_nodegroup(&self, name: &str, address: &Address) -> Result<Arc<dyn NodegroupClient>>;
}
