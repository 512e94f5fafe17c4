//! In-memory agents and launcher for testing.
//!
//! Lets the manager run its full protocol without sockets or child
//! processes. Each mock records what it was asked to do and can be told
//! to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Notify, RwLock};

use crate::address::{Address, Port};
use crate::interfaces::{
    HostClient, LaunchError, LaunchedProcess, NodegroupClient, Options, ProcessLauncher,
    RemoteConnector, RemoteError, RemoteResult,
};

/// First port handed out when resolving wildcard addresses.
const FIRST_PORT: u16 = 40000;

fn resolve(address: &Address, ports: &AtomicU16) -> Address {
    match address.port() {
        Port::Fixed(_) => address.clone(),
        Port::Wildcard => address.with_port(ports.fetch_add(1, Ordering::SeqCst)),
    }
}

/// Mock host agent.
pub struct MockHostAgent {
    name: String,
    spawned: RwLock<Vec<(String, Address)>>,
    fail_on_create: RwLock<bool>,
    gate: RwLock<Option<Arc<Notify>>>,
    creates_started: AtomicUsize,
    closed: AtomicBool,
    ports: AtomicU16,
}

impl MockHostAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: RwLock::new(Vec::new()),
            fail_on_create: RwLock::new(false),
            gate: RwLock::new(None),
            creates_started: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            ports: AtomicU16::new(FIRST_PORT),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        *self.fail_on_create.write().await = fail;
    }

    /// Make every later `create_nodegroup` wait until the returned gate is
    /// notified once per call.
    pub async fn hold_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.write().await = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `create_nodegroup` calls received, held or not.
    pub fn creates_started(&self) -> usize {
        self.creates_started.load(Ordering::SeqCst)
    }

    /// Nodegroups this agent was asked to spawn, with resolved addresses.
    pub async fn spawned(&self) -> Vec<(String, Address)> {
        self.spawned.read().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostClient for MockHostAgent {
    async fn create_nodegroup(
        &self,
        name: &str,
        address: &Address,
    ) -> RemoteResult<(String, Address)> {
        self.creates_started.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.read().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if *self.fail_on_create.read().await {
            return Err(RemoteError::Rejected(format!(
                "{} refused to spawn {}",
                self.name, name
            )));
        }
        let bound = resolve(address, &self.ports);
        self.spawned
            .write()
            .await
            .push((name.to_string(), bound.clone()));
        Ok((name.to_string(), bound))
    }

    async fn close(&self) -> RemoteResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock nodegroup agent.
pub struct MockNodegroupAgent {
    name: String,
    nodes: RwLock<HashMap<String, String>>,
    calls: RwLock<Vec<String>>,
    fail_on_create: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
    fail_on_close: RwLock<bool>,
    fail_on_broadcast: RwLock<bool>,
    running: AtomicBool,
    closed: AtomicBool,
}

impl MockNodegroupAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            fail_on_create: RwLock::new(false),
            fail_on_delete: RwLock::new(false),
            fail_on_close: RwLock::new(false),
            fail_on_broadcast: RwLock::new(false),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        *self.fail_on_create.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn set_fail_on_close(&self, fail: bool) {
        *self.fail_on_close.write().await = fail;
    }

    pub async fn set_fail_on_broadcast(&self, fail: bool) {
        *self.fail_on_broadcast.write().await = fail;
    }

    /// Node name -> classname of nodes currently alive in this worker.
    pub async fn nodes(&self) -> HashMap<String, String> {
        self.nodes.read().await.clone()
    }

    /// Every call received, in order, as `"<method> <node>"` strings.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn record(&self, call: String) {
        self.calls.write().await.push(call);
    }
}

#[async_trait]
impl NodegroupClient for MockNodegroupAgent {
    async fn create_node(
        &self,
        name: &str,
        classname: &str,
        options: &Options,
    ) -> RemoteResult<Vec<Value>> {
        self.record(format!("create_node {}", name)).await;
        if *self.fail_on_create.read().await {
            return Err(RemoteError::Rejected(format!(
                "cannot instantiate {}",
                classname
            )));
        }
        self.nodes
            .write()
            .await
            .insert(name.to_string(), classname.to_string());
        let streams = options
            .get("nb_output")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok((0..streams)
            .map(|i| json!({ "node": name, "stream": i }))
            .collect())
    }

    async fn control_node(&self, name: &str, method: &str, options: &Options) -> RemoteResult<Value> {
        self.record(format!("control_node {}", name)).await;
        if !self.nodes.read().await.contains_key(name) {
            return Err(RemoteError::Rejected(format!("no node {}", name)));
        }
        Ok(json!({
            "nodegroup": self.name,
            "node": name,
            "method": method,
            "options": options,
        }))
    }

    async fn delete_node(&self, name: &str) -> RemoteResult<()> {
        self.record(format!("delete_node {}", name)).await;
        if *self.fail_on_delete.read().await {
            return Err(RemoteError::Timeout(format!("{} did not answer", self.name)));
        }
        self.nodes
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RemoteError::Rejected(format!("no node {}", name)))
    }

    async fn start_all_nodes(&self) -> RemoteResult<()> {
        self.record("start_all_nodes".to_string()).await;
        if *self.fail_on_broadcast.read().await {
            return Err(RemoteError::Connection(format!("{} unreachable", self.name)));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_all_nodes(&self) -> RemoteResult<()> {
        self.record("stop_all_nodes".to_string()).await;
        if *self.fail_on_broadcast.read().await {
            return Err(RemoteError::Connection(format!("{} unreachable", self.name)));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> RemoteResult<()> {
        self.record("close".to_string()).await;
        if *self.fail_on_close.read().await {
            return Err(RemoteError::Connection(format!("{} unreachable", self.name)));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that hands out mock agents keyed by name.
///
/// Agents are created on first use and shared afterwards, so a test can
/// fetch one before or after the manager connects to it.
#[derive(Default)]
pub struct MockConnector {
    hosts: Mutex<HashMap<String, Arc<MockHostAgent>>>,
    nodegroups: Mutex<HashMap<String, Arc<MockNodegroupAgent>>>,
    host_connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_agent(&self, name: &str) -> Arc<MockHostAgent> {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            hosts
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MockHostAgent::new(name))),
        )
    }

    pub fn nodegroup_agent(&self, name: &str) -> Arc<MockNodegroupAgent> {
        let mut nodegroups = self.nodegroups.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            nodegroups
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MockNodegroupAgent::new(name))),
        )
    }

    /// Number of host handles opened so far.
    pub fn host_connects(&self) -> usize {
        self.host_connects.load(Ordering::SeqCst)
    }
}

impl RemoteConnector for MockConnector {
    fn connect_host(&self, name: &str, _address: &Address) -> RemoteResult<Arc<dyn HostClient>> {
        self.host_connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.host_agent(name))
    }

    fn connect_nodegroup(
        &self,
        name: &str,
        _address: &Address,
    ) -> RemoteResult<Arc<dyn NodegroupClient>> {
        Ok(self.nodegroup_agent(name))
    }
}

/// Launcher that pretends to start processes.
#[derive(Default)]
pub struct MockLauncher {
    launches: AtomicUsize,
    stops: Arc<AtomicUsize>,
    ports: AtomicU16,
    fail: AtomicBool,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            ports: AtomicU16::new(FIRST_PORT + 1000),
            ..Default::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(
        &self,
        entry: &str,
        suggested_name: &str,
        address: &Address,
    ) -> Result<Box<dyn LaunchedProcess>, LaunchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LaunchError::ExitedEarly {
                entry: entry.to_string(),
            });
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProcess {
            name: suggested_name.to_string(),
            address: resolve(address, &self.ports),
            stopped: false,
            stops: Arc::clone(&self.stops),
        }))
    }
}

struct MockProcess {
    name: String,
    address: Address,
    stopped: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl LaunchedProcess for MockProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &Address {
        &self.address
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        if !self.stopped {
            self.stopped = true;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_host_resolves_wildcard() {
        let host = MockHostAgent::new("h1");
        let template = Address::parse("tcp://127.0.0.1:*").unwrap();

        let (name, bound) = host.create_nodegroup("ng1", &template).await.unwrap();
        assert_eq!(name, "ng1");
        assert_eq!(bound.hostname(), "127.0.0.1");
        assert!(!bound.is_wildcard());
    }

    #[tokio::test]
    async fn test_mock_connector_shares_agents() {
        let connector = MockConnector::new();
        let agent = connector.nodegroup_agent("ng1");
        agent.set_fail_on_create(true).await;

        let client = connector
            .connect_nodegroup("ng1", &Address::parse("tcp://h:1").unwrap())
            .unwrap();
        let result = client.create_node("n1", "Cls", &Options::new()).await;
        assert!(result.is_err());
        assert_eq!(agent.calls().await, vec!["create_node n1"]);
    }
}
