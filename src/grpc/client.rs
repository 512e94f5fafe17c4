//! gRPC clients: agent handles used by the manager, and a proxy used to
//! drive a manager running elsewhere.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use serde_json::Value;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{info, warn};

use super::{decode_value, encode_options};
use crate::address::Address;
use crate::config::RpcConfig;
use crate::interfaces::{
    HostClient, LaunchedProcess, NodegroupClient, Options, RemoteConnector, RemoteError,
    RemoteResult,
};
use crate::manager::NodeInfo;
use crate::proto::host_agent_client::HostAgentClient;
use crate::proto::manager_client::ManagerClient;
use crate::proto::nodegroup_agent_client::NodegroupAgentClient;
use crate::proto::{
    ConnectHostRequest, ControlNodeRequest, CreateNodeRequest, CreateNodegroupRequest, Empty,
    InstantiateNodeRequest, InvokeNodeRequest, ListNodegroupsRequest, ListNodesRequest, NameRef,
    SpawnNodegroupRequest,
};
use crate::utils::retry::connection_backoff;

fn invalid_address(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::InvalidAddress(e.to_string())
}

// ============================================================================
// Agent clients
// ============================================================================

/// Opens lazy gRPC channels to host and nodegroup agents.
///
/// No connection is attempted until the first call; connection and
/// per-request timeouts come from [`RpcConfig`].
pub struct GrpcConnector {
    rpc: RpcConfig,
}

impl GrpcConnector {
    pub fn new(rpc: RpcConfig) -> Self {
        Self { rpc }
    }

    fn channel(&self, address: &Address) -> RemoteResult<Channel> {
        let uri = address.endpoint_uri().map_err(invalid_address)?;
        let endpoint = Endpoint::from_shared(uri)
            .map_err(invalid_address)?
            .connect_timeout(self.rpc.connect_timeout())
            .timeout(self.rpc.request_timeout());
        Ok(endpoint.connect_lazy())
    }
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

impl RemoteConnector for GrpcConnector {
    fn connect_host(&self, name: &str, address: &Address) -> RemoteResult<Arc<dyn HostClient>> {
        let channel = self.channel(address)?;
        Ok(Arc::new(GrpcHostClient::from_channel(name, channel)))
    }

    fn connect_nodegroup(
        &self,
        name: &str,
        address: &Address,
    ) -> RemoteResult<Arc<dyn NodegroupClient>> {
        let channel = self.channel(address)?;
        Ok(Arc::new(GrpcNodegroupClient::from_channel(name, channel)))
    }
}

/// Host agent client over gRPC.
#[derive(Clone)]
pub struct GrpcHostClient {
    name: String,
    inner: HostAgentClient<Channel>,
}

impl GrpcHostClient {
    pub fn from_channel(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            inner: HostAgentClient::new(channel),
        }
    }
}

#[async_trait]
impl HostClient for GrpcHostClient {
    async fn create_nodegroup(
        &self,
        name: &str,
        address: &Address,
    ) -> RemoteResult<(String, Address)> {
        let endpoint = self
            .inner
            .clone()
            .create_nodegroup(SpawnNodegroupRequest {
                name: name.to_string(),
                address: address.to_string(),
            })
            .await?
            .into_inner();

        let bound = Address::parse(&endpoint.address).map_err(|e| {
            RemoteError::Codec(format!(
                "host {} reported a bad address for {}: {}",
                self.name, name, e
            ))
        })?;
        Ok((endpoint.name, bound))
    }

    async fn close(&self) -> RemoteResult<()> {
        self.inner.clone().close(Empty {}).await?;
        Ok(())
    }
}

/// Nodegroup agent client over gRPC.
#[derive(Clone)]
pub struct GrpcNodegroupClient {
    name: String,
    inner: NodegroupAgentClient<Channel>,
}

impl GrpcNodegroupClient {
    pub fn from_channel(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            inner: NodegroupAgentClient::new(channel),
        }
    }
}

#[async_trait]
impl NodegroupClient for GrpcNodegroupClient {
    async fn create_node(
        &self,
        name: &str,
        classname: &str,
        options: &Options,
    ) -> RemoteResult<Vec<Value>> {
        let response = self
            .inner
            .clone()
            .create_node(InstantiateNodeRequest {
                name: name.to_string(),
                classname: classname.to_string(),
                options_json: encode_options(options),
            })
            .await?
            .into_inner();

        let outputs = response
            .outputs_json
            .iter()
            .map(|json| decode_value(json))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outputs)
    }

    async fn control_node(&self, name: &str, method: &str, options: &Options) -> RemoteResult<Value> {
        let response = self
            .inner
            .clone()
            .control_node(InvokeNodeRequest {
                name: name.to_string(),
                method: method.to_string(),
                options_json: encode_options(options),
            })
            .await?
            .into_inner();
        Ok(decode_value(&response.result_json)?)
    }

    async fn delete_node(&self, name: &str) -> RemoteResult<()> {
        self.inner
            .clone()
            .delete_node(NameRef {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn start_all_nodes(&self) -> RemoteResult<()> {
        self.inner.clone().start_all_nodes(Empty {}).await?;
        Ok(())
    }

    async fn stop_all_nodes(&self) -> RemoteResult<()> {
        self.inner.clone().stop_all_nodes(Empty {}).await?;
        Ok(())
    }

    async fn close(&self) -> RemoteResult<()> {
        info!(nodegroup = %self.name, "Closing nodegroup process");
        self.inner.clone().close(Empty {}).await?;
        Ok(())
    }
}

// ============================================================================
// Manager proxy
// ============================================================================

/// Result type for proxy operations.
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Errors returned by [`ManagerProxy`].
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Failed to establish connection to the manager.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transport-level error from tonic.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC error from the manager.
    #[error("grpc error: {0}")]
    Grpc(Box<Status>),

    /// The manager replied with a payload that could not be decoded.
    #[error("malformed reply: {0}")]
    Codec(String),
}

impl From<Status> for ProxyError {
    fn from(status: Status) -> Self {
        ProxyError::Grpc(Box::new(status))
    }
}

impl ProxyError {
    /// Returns the gRPC status code if this is a gRPC error.
    pub fn code(&self) -> Option<Code> {
        match self {
            ProxyError::Grpc(s) => Some(s.code()),
            _ => None,
        }
    }

    /// Returns true if the manager reported an unknown host/nodegroup/node.
    pub fn is_not_found(&self) -> bool {
        matches!(self.code(), Some(Code::NotFound))
    }

    /// Returns true if the manager reported a name conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self.code(), Some(Code::AlreadyExists))
    }

    /// Returns true if an agent call made by the manager failed.
    pub fn is_remote(&self) -> bool {
        matches!(self.code(), Some(Code::Unavailable | Code::Aborted))
    }
}

/// Typed client for a manager served over gRPC.
///
/// When the manager was launched by this process, the proxy owns the child
/// and kills it if dropped without [`close`](Self::close).
pub struct ManagerProxy {
    name: String,
    address: Address,
    inner: ManagerClient<Channel>,
    process: Option<Box<dyn LaunchedProcess>>,
}

impl ManagerProxy {
    /// Connect to a running manager, retrying while it comes up.
    pub async fn connect(name: &str, address: &Address) -> ProxyResult<Self> {
        let uri = address
            .endpoint_uri()
            .map_err(|e| ProxyError::Connection(e.to_string()))?;
        let endpoint = Endpoint::from_shared(uri)?;

        let channel = (|| endpoint.connect())
            .retry(connection_backoff())
            .notify(|err: &tonic::transport::Error, dur: Duration| {
                warn!(manager = %name, error = %err, delay = ?dur, "Connection failed, retrying");
            })
            .await?;

        info!(manager = %name, address = %address, "Connected to manager");
        Ok(Self::from_channel(name, address.clone(), channel))
    }

    pub fn from_channel(name: impl Into<String>, address: Address, channel: Channel) -> Self {
        Self {
            name: name.into(),
            address,
            inner: ManagerClient::new(channel),
            process: None,
        }
    }

    /// Take ownership of the process the manager runs in.
    pub fn with_process(mut self, process: Box<dyn LaunchedProcess>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn client(&self) -> ManagerClient<Channel> {
        self.inner.clone()
    }

    pub async fn connect_host(&self, name: &str, address: &str) -> ProxyResult<()> {
        self.client()
            .connect_host(ConnectHostRequest {
                name: name.to_string(),
                address: address.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn disconnect_host(&self, name: &str) -> ProxyResult<()> {
        self.client()
            .disconnect_host(NameRef {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn default_host(&self) -> ProxyResult<(String, Address)> {
        let endpoint = self.client().default_host(Empty {}).await?.into_inner();
        let address =
            Address::parse(&endpoint.address).map_err(|e| ProxyError::Codec(e.to_string()))?;
        Ok((endpoint.name, address))
    }

    pub async fn close_host(&self, name: &str) -> ProxyResult<()> {
        self.client()
            .close_host(NameRef {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn list_hosts(&self) -> ProxyResult<Vec<String>> {
        Ok(self.client().list_hosts(Empty {}).await?.into_inner().names)
    }

    pub async fn create_nodegroup(&self, host: &str, name: &str) -> ProxyResult<(String, Address)> {
        let endpoint = self
            .client()
            .create_nodegroup(CreateNodegroupRequest {
                host: host.to_string(),
                name: name.to_string(),
            })
            .await?
            .into_inner();
        let address =
            Address::parse(&endpoint.address).map_err(|e| ProxyError::Codec(e.to_string()))?;
        Ok((endpoint.name, address))
    }

    pub async fn list_nodegroups(&self, host: Option<&str>) -> ProxyResult<Vec<String>> {
        let request = ListNodegroupsRequest {
            host: host.map(str::to_string),
        };
        Ok(self.client().list_nodegroups(request).await?.into_inner().names)
    }

    pub async fn close_nodegroup(&self, name: &str) -> ProxyResult<()> {
        self.client()
            .close_nodegroup(NameRef {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn create_node(
        &self,
        nodegroup: &str,
        name: &str,
        classname: &str,
        options: &Options,
    ) -> ProxyResult<()> {
        self.client()
            .create_node(CreateNodeRequest {
                nodegroup: nodegroup.to_string(),
                name: name.to_string(),
                classname: classname.to_string(),
                options_json: encode_options(options),
            })
            .await?;
        Ok(())
    }

    pub async fn list_nodes(&self, nodegroup: Option<&str>) -> ProxyResult<Vec<String>> {
        let request = ListNodesRequest {
            nodegroup: nodegroup.map(str::to_string),
        };
        Ok(self.client().list_nodes(request).await?.into_inner().names)
    }

    pub async fn node_info(&self, name: &str) -> ProxyResult<NodeInfo> {
        let info = self
            .client()
            .node_details(NameRef {
                name: name.to_string(),
            })
            .await?
            .into_inner();
        let outputs = info
            .outputs_json
            .iter()
            .map(|json| decode_value(json))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Codec(e.to_string()))?;
        Ok(NodeInfo {
            name: info.name,
            classname: info.classname,
            nodegroup: info.nodegroup,
            outputs,
        })
    }

    pub async fn control_node(
        &self,
        name: &str,
        method: &str,
        options: &Options,
    ) -> ProxyResult<Value> {
        let response = self
            .client()
            .control_node(ControlNodeRequest {
                name: name.to_string(),
                method: method.to_string(),
                options_json: encode_options(options),
            })
            .await?
            .into_inner();
        decode_value(&response.result_json).map_err(|e| ProxyError::Codec(e.to_string()))
    }

    pub async fn delete_node(&self, name: &str) -> ProxyResult<()> {
        self.client()
            .delete_node(NameRef {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn suggest_nodegroup_name(&self) -> ProxyResult<String> {
        Ok(self
            .client()
            .suggest_nodegroup_name(Empty {})
            .await?
            .into_inner()
            .name)
    }

    pub async fn suggest_node_name(&self) -> ProxyResult<String> {
        Ok(self.client().suggest_node_name(Empty {}).await?.into_inner().name)
    }

    /// Start all nodes; returns `(nodegroup, message)` for each failure.
    pub async fn start_all_nodes(&self) -> ProxyResult<Vec<(String, String)>> {
        let response = self.client().start_all_nodes(Empty {}).await?.into_inner();
        Ok(response
            .failures
            .into_iter()
            .map(|f| (f.nodegroup, f.message))
            .collect())
    }

    /// Stop all nodes; returns `(nodegroup, message)` for each failure.
    pub async fn stop_all_nodes(&self) -> ProxyResult<Vec<(String, String)>> {
        let response = self.client().stop_all_nodes(Empty {}).await?.into_inner();
        Ok(response
            .failures
            .into_iter()
            .map(|f| (f.nodegroup, f.message))
            .collect())
    }

    /// Close the manager, then reap its process if this proxy owns it.
    pub async fn close(mut self) -> ProxyResult<()> {
        let closed = self.client().close(Empty {}).await;
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.stop().await {
                warn!(manager = %self.name, error = %e, "Failed to stop manager process");
            }
        }
        closed?;
        Ok(())
    }
}
