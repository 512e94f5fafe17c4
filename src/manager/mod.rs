//! The manager: central point of control for hosts, nodegroups and nodes.
//!
//! The manager keeps an in-memory mirror of the hierarchy it has built:
//!
//! ```text
//! Manager
//!  ├── Host "h1"            (connected agent on one machine)
//!  │    ├── Nodegroup "ngA" (worker process spawned by h1)
//!  │    │    ├── Node "nodeA"
//!  │    │    └── Node "nodeB"
//!  │    └── Nodegroup "ngB"
//!  └── Host "default-host"  (spawned and owned by the manager)
//! ```
//!
//! Every mutation is forwarded to the owning agent first and committed
//! locally only once the agent has confirmed it. The registry lock is never
//! held across a remote call.

pub mod naming;
pub mod registry;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::address::{Address, Port};
use crate::config::DefaultHostConfig;
use crate::error::{ManagerError, Result};
use crate::interfaces::{
    LaunchedProcess, NodegroupClient, Options, ProcessLauncher, RemoteConnector, RemoteError,
};
use registry::{HostRecord, NodeRecord, NodegroupRecord, Registry};

/// Public view of a registered node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub classname: String,
    pub nodegroup: String,
    pub outputs: Vec<Value>,
}

impl From<&NodeRecord> for NodeInfo {
    fn from(node: &NodeRecord) -> Self {
        Self {
            name: node.name.clone(),
            classname: node.classname.clone(),
            nodegroup: node.nodegroup.clone(),
            outputs: node.outputs.clone(),
        }
    }
}

/// One nodegroup that failed during a broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastFailure {
    pub nodegroup: String,
    pub error: RemoteError,
}

/// Outcome of `start_all_nodes` / `stop_all_nodes`.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// Number of nodegroups the call was issued to.
    pub attempted: usize,
    pub failures: Vec<BroadcastFailure>,
}

impl BroadcastReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Orchestration registry and control API.
pub struct Manager {
    name: String,
    address: Address,
    registry: RwLock<Registry>,
    connector: Arc<dyn RemoteConnector>,
    launcher: Arc<dyn ProcessLauncher>,
    default_host_config: DefaultHostConfig,
    default_host: Mutex<Option<Box<dyn LaunchedProcess>>>,
    closed: watch::Sender<bool>,
}

impl Manager {
    /// Create a manager reachable as `name` at `address`.
    ///
    /// `address` is the manager's own bind address; a default host is
    /// spawned on the same machine with a wildcard port.
    pub fn new(
        name: impl Into<String>,
        address: Address,
        connector: Arc<dyn RemoteConnector>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            registry: RwLock::new(Registry::new()),
            connector,
            launcher,
            default_host_config: DefaultHostConfig::default(),
            default_host: Mutex::new(None),
            closed: watch::channel(false).0,
        }
    }

    /// Override how the default host is launched.
    pub fn with_default_host(mut self, config: DefaultHostConfig) -> Self {
        self.default_host_config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    /// Connect to the host agent at `address` under `name`.
    ///
    /// Connecting a name that is already connected is a no-op. Only a
    /// handle is opened; the agent is not contacted.
    pub async fn connect_host(&self, name: &str, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        self.connect_host_at(name, address).await
    }

    async fn connect_host_at(&self, name: &str, address: Address) -> Result<()> {
        if self.registry.read().await.contains_host(name) {
            debug!(host = %name, "Host already connected");
            return Ok(());
        }

        let client = self
            .connector
            .connect_host(name, &address)
            .map_err(|e| ManagerError::remote(name, e))?;

        let record = HostRecord::new(name, address.clone(), client);
        if self.registry.write().await.insert_host(record) {
            info!(host = %name, address = %address, "Connected host");
        }
        Ok(())
    }

    /// Disconnect a host, dropping every nodegroup it owns and every node
    /// inside those nodegroups.
    pub async fn disconnect_host(&self, name: &str) -> Result<()> {
        let removed = self.registry.write().await.remove_host(name)?;
        info!(
            host = %name,
            nodegroups = removed.nodegroups.len(),
            nodes = removed.nodes.len(),
            "Disconnected host"
        );
        Ok(())
    }

    /// Name and address of the manager's own local host, spawning it on
    /// first use.
    pub async fn default_host(&self) -> Result<(String, Address)> {
        let mut slot = self.default_host.lock().await;
        if self.is_closed() {
            return Err(ManagerError::Closed);
        }
        if let Some(process) = slot.as_ref() {
            return Ok((process.name().to_string(), process.address().clone()));
        }

        let template = self.address.with_wildcard_port();
        info!(
            entry = %self.default_host_config.entry,
            address = %template,
            "Spawning default host"
        );
        let mut process = self
            .launcher
            .launch(
                &self.default_host_config.entry,
                &self.default_host_config.name,
                &template,
            )
            .await?;

        let name = process.name().to_string();
        let address = process.address().clone();
        if let Err(e) = self.connect_host_at(&name, address.clone()).await {
            if let Err(stop_err) = process.stop().await {
                warn!(host = %name, error = %stop_err, "Failed to stop default host");
            }
            return Err(e);
        }

        *slot = Some(process);
        Ok((name, address))
    }

    /// Ask a host agent to shut itself down.
    ///
    /// The host stays registered; disconnect it to forget it.
    pub async fn close_host(&self, name: &str) -> Result<()> {
        let client = Arc::clone(&self.registry.read().await.host(name)?.client);
        client
            .close()
            .await
            .map_err(|e| ManagerError::remote(name, e))?;
        info!(host = %name, "Closed host");
        Ok(())
    }

    pub async fn list_hosts(&self) -> Vec<String> {
        self.registry.read().await.host_names()
    }

    // ------------------------------------------------------------------
    // Nodegroups
    // ------------------------------------------------------------------

    /// Spawn a nodegroup on `host` and register it as `name`.
    ///
    /// Returns the name and the address the worker actually bound.
    pub async fn create_nodegroup(&self, host: &str, name: &str) -> Result<(String, Address)> {
        let (client, generation, template) = {
            let mut registry = self.registry.write().await;
            registry.reserve_nodegroup(name)?;
            match registry.host(host) {
                Ok(record) => (
                    Arc::clone(&record.client),
                    record.generation(),
                    Address::new(record.address.scheme(), record.hostname(), Port::Wildcard),
                ),
                Err(e) => {
                    registry.release_nodegroup(name);
                    return Err(e);
                }
            }
        };

        debug!(host = %host, nodegroup = %name, address = %template, "Spawning nodegroup");
        let spawned = client
            .create_nodegroup(name, &template)
            .await
            .map_err(|e| ManagerError::remote(host, e))
            .and_then(|(_, address)| {
                self.connector
                    .connect_nodegroup(name, &address)
                    .map(|client| (address, client))
                    .map_err(|e| ManagerError::remote(name, e))
            });

        let mut registry = self.registry.write().await;
        let (address, ng_client) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                registry.release_nodegroup(name);
                warn!(host = %host, nodegroup = %name, error = %e, "Nodegroup spawn failed");
                return Err(e);
            }
        };
        registry.commit_nodegroup(
            NodegroupRecord::new(name, address.clone(), host, ng_client),
            generation,
        )?;

        info!(host = %host, nodegroup = %name, address = %address, "Created nodegroup");
        Ok((name.to_string(), address))
    }

    /// Nodegroup names, globally or only those owned by `host`.
    pub async fn list_nodegroups(&self, host: Option<&str>) -> Result<Vec<String>> {
        self.registry.read().await.nodegroup_names(host)
    }

    /// Ask a nodegroup worker to shut down, then forget it and its nodes.
    pub async fn close_nodegroup(&self, name: &str) -> Result<()> {
        let client = Arc::clone(&self.registry.read().await.nodegroup(name)?.client);
        client
            .close()
            .await
            .map_err(|e| ManagerError::remote(name, e))?;

        // A concurrent disconnect may already have dropped it.
        match self.registry.write().await.remove_nodegroup(name) {
            Ok(removed) => {
                info!(nodegroup = %name, nodes = removed.nodes.len(), "Closed nodegroup")
            }
            Err(_) => debug!(nodegroup = %name, "Nodegroup already gone after close"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Instantiate a node of class `classname` inside `nodegroup`.
    ///
    /// `options` are passed to the nodegroup agent untouched.
    pub async fn create_node(
        &self,
        nodegroup: &str,
        name: &str,
        classname: &str,
        options: Options,
    ) -> Result<()> {
        let (client, generation) = {
            let mut registry = self.registry.write().await;
            registry.reserve_node(name)?;
            match registry.nodegroup(nodegroup) {
                Ok(record) => (Arc::clone(&record.client), record.generation()),
                Err(e) => {
                    registry.release_node(name);
                    return Err(e);
                }
            }
        };

        let created = client.create_node(name, classname, &options).await;

        let mut registry = self.registry.write().await;
        let outputs = match created {
            Ok(outputs) => outputs,
            Err(e) => {
                registry.release_node(name);
                warn!(nodegroup = %nodegroup, node = %name, error = %e, "Node creation failed");
                return Err(ManagerError::remote(nodegroup, e));
            }
        };
        let record = NodeRecord {
            name: name.to_string(),
            classname: classname.to_string(),
            nodegroup: nodegroup.to_string(),
            outputs,
        };
        registry.commit_node(record, generation)?;

        info!(nodegroup = %nodegroup, node = %name, classname = %classname, "Created node");
        Ok(())
    }

    /// Node names, globally or only those inside `nodegroup`.
    pub async fn list_nodes(&self, nodegroup: Option<&str>) -> Result<Vec<String>> {
        self.registry.read().await.node_names(nodegroup)
    }

    pub async fn node_info(&self, name: &str) -> Result<NodeInfo> {
        self.registry.read().await.node(name).map(NodeInfo::from)
    }

    /// Forward `method` to the node's nodegroup and return its result as-is.
    pub async fn control_node(&self, name: &str, method: &str, options: Options) -> Result<Value> {
        let (nodegroup, client) = self.registry.read().await.node_owner(name)?;
        debug!(node = %name, nodegroup = %nodegroup, method = %method, "Controlling node");
        client
            .control_node(name, method, &options)
            .await
            .map_err(|e| ManagerError::remote(nodegroup, e))
    }

    /// Delete a node remotely, then drop it from the registry.
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let (nodegroup, client) = self.registry.read().await.node_owner(name)?;
        client
            .delete_node(name)
            .await
            .map_err(|e| ManagerError::remote(&nodegroup, e))?;

        if self.registry.write().await.remove_node(name).is_some() {
            info!(nodegroup = %nodegroup, node = %name, "Deleted node");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    pub async fn suggest_nodegroup_name(&self) -> String {
        self.registry.write().await.suggest_nodegroup_name()
    }

    pub async fn suggest_node_name(&self) -> String {
        self.registry.write().await.suggest_node_name()
    }

    // ------------------------------------------------------------------
    // Broadcasts
    // ------------------------------------------------------------------

    /// Start every node in every nodegroup.
    pub async fn start_all_nodes(&self) -> BroadcastReport {
        self.broadcast("start_all_nodes", |client| async move {
            client.start_all_nodes().await
        })
        .await
    }

    /// Stop every node in every nodegroup.
    pub async fn stop_all_nodes(&self) -> BroadcastReport {
        self.broadcast("stop_all_nodes", |client| async move {
            client.stop_all_nodes().await
        })
        .await
    }

    /// Issue one call per nodegroup concurrently. A failing nodegroup never
    /// keeps the others from being called.
    async fn broadcast<F, Fut>(&self, operation: &str, call: F) -> BroadcastReport
    where
        F: Fn(Arc<dyn NodegroupClient>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), RemoteError>>,
    {
        let targets = self.registry.read().await.nodegroup_clients();
        let attempted = targets.len();

        let results = join_all(targets.into_iter().map(|(name, client)| {
            let fut = call(client);
            async move { (name, fut.await) }
        }))
        .await;

        let failures: Vec<BroadcastFailure> = results
            .into_iter()
            .filter_map(|(nodegroup, result)| {
                result.err().map(|error| {
                    warn!(
                        operation,
                        nodegroup = %nodegroup,
                        unreachable = error.is_unreachable(),
                        error = %error,
                        "Broadcast failed"
                    );
                    BroadcastFailure { nodegroup, error }
                })
            })
            .collect();

        info!(
            operation,
            attempted,
            failed = failures.len(),
            "Broadcast complete"
        );
        BroadcastReport {
            attempted,
            failures,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop the default host if one was spawned, then signal the serving
    /// layer to shut down. Calling this more than once is harmless.
    ///
    /// The default host also leaves the registry, along with its nodegroups
    /// and their nodes. Once closed, `default_host` no longer spawns.
    pub async fn close(&self) -> Result<()> {
        // Flag first so a default_host call queued on the slot sees it.
        let was_closed = self.closed.send_replace(true);

        let process = self.default_host.lock().await.take();
        if let Some(mut process) = process {
            self.forget_default_host(process.as_ref()).await;
            info!(host = %process.name(), "Stopping default host");
            if let Err(e) = process.stop().await {
                warn!(host = %process.name(), error = %e, "Failed to stop default host");
            }
        }

        if !was_closed {
            info!(manager = %self.name, "Manager closed");
        }
        Ok(())
    }

    /// Drop the registry entry of the default host, unless the name now
    /// belongs to a host connected at some other address.
    async fn forget_default_host(&self, process: &dyn LaunchedProcess) {
        let mut registry = self.registry.write().await;
        let owned = registry
            .host(process.name())
            .map(|record| &record.address == process.address())
            .unwrap_or(false);
        if !owned {
            return;
        }
        if let Ok(removed) = registry.remove_host(process.name()) {
            info!(
                host = %process.name(),
                nodegroups = removed.nodegroups.len(),
                nodes = removed.nodes.len(),
                "Disconnected default host"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
