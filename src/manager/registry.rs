//! In-memory registry of hosts, nodegroups and nodes.
//!
//! The registry is plain data: it never talks to agents. The manager
//! performs remote calls with the lock released and then commits here.
//!
//! Names of nodegroups and nodes are unique across the whole registry.
//! A create in flight holds a reservation on its name so that a second
//! create with the same name fails with a conflict. Reservations are
//! never listed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::naming::NameCounter;
use crate::address::Address;
use crate::error::{EntityKind, ManagerError, Result};
use crate::interfaces::{HostClient, NodegroupClient};

/// A connected host agent.
pub struct HostRecord {
    pub name: String,
    pub address: Address,
    pub client: Arc<dyn HostClient>,
    generation: u64,
    nodegroups: BTreeSet<String>,
}

impl HostRecord {
    pub fn new(name: impl Into<String>, address: Address, client: Arc<dyn HostClient>) -> Self {
        Self {
            name: name.into(),
            address,
            client,
            generation: 0,
            nodegroups: BTreeSet::new(),
        }
    }

    /// Machine name used to build addresses for nodegroups spawned here.
    pub fn hostname(&self) -> &str {
        self.address.hostname()
    }

    /// Identifies this connection; a host reconnected under the same
    /// name gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodegroups(&self) -> impl Iterator<Item = &str> {
        self.nodegroups.iter().map(String::as_str)
    }
}

/// A nodegroup worker process spawned on a host.
pub struct NodegroupRecord {
    pub name: String,
    pub address: Address,
    pub host: String,
    pub client: Arc<dyn NodegroupClient>,
    generation: u64,
    nodes: BTreeSet<String>,
}

impl NodegroupRecord {
    pub fn new(
        name: impl Into<String>,
        address: Address,
        host: impl Into<String>,
        client: Arc<dyn NodegroupClient>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            host: host.into(),
            client,
            generation: 0,
            nodes: BTreeSet::new(),
        }
    }

    /// Identifies this registration; a nodegroup recreated under the
    /// same name gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }
}

/// A node living inside a nodegroup.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub classname: String,
    pub nodegroup: String,
    /// Output stream descriptors; stored, never interpreted.
    pub outputs: Vec<Value>,
}

/// Entries dropped by a cascading removal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Removed {
    pub nodegroups: Vec<String>,
    pub nodes: Vec<String>,
}

/// Hosts, nodegroups and nodes keyed by name, plus naming counters.
pub struct Registry {
    hosts: HashMap<String, HostRecord>,
    nodegroups: HashMap<String, NodegroupRecord>,
    nodes: HashMap<String, NodeRecord>,
    pending_nodegroups: HashSet<String>,
    pending_nodes: HashSet<String>,
    nodegroup_names: NameCounter,
    node_names: NameCounter,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            hosts: HashMap::new(),
            nodegroups: HashMap::new(),
            nodes: HashMap::new(),
            pending_nodegroups: HashSet::new(),
            pending_nodes: HashSet::new(),
            nodegroup_names: NameCounter::new("nodegroup"),
            node_names: NameCounter::new("node"),
            next_generation: 0,
        }
    }

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    pub fn contains_host(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// Insert a host unless one with the same name is already connected.
    ///
    /// Returns false (and leaves the existing entry alone) on duplicates.
    pub fn insert_host(&mut self, mut host: HostRecord) -> bool {
        if self.hosts.contains_key(&host.name) {
            return false;
        }
        host.generation = self.bump_generation();
        self.hosts.insert(host.name.clone(), host);
        true
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn host(&self, name: &str) -> Result<&HostRecord> {
        self.hosts
            .get(name)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Host, name))
    }

    /// Remove a host along with every nodegroup it owns and every node
    /// those nodegroups own.
    pub fn remove_host(&mut self, name: &str) -> Result<Removed> {
        let host = self
            .hosts
            .remove(name)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Host, name))?;

        let mut removed = Removed::default();
        for ng_name in host.nodegroups {
            if let Some(ng) = self.nodegroups.remove(&ng_name) {
                for node in ng.nodes {
                    self.nodes.remove(&node);
                    removed.nodes.push(node);
                }
            }
            removed.nodegroups.push(ng_name);
        }
        Ok(removed)
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Nodegroups
    // ------------------------------------------------------------------

    /// Claim a nodegroup name for a create in flight.
    pub fn reserve_nodegroup(&mut self, name: &str) -> Result<()> {
        if self.nodegroups.contains_key(name) || self.pending_nodegroups.contains(name) {
            return Err(ManagerError::conflict(EntityKind::Nodegroup, name));
        }
        self.pending_nodegroups.insert(name.to_string());
        Ok(())
    }

    pub fn release_nodegroup(&mut self, name: &str) {
        self.pending_nodegroups.remove(name);
    }

    /// Turn a reservation into a registered nodegroup.
    ///
    /// `host_generation` is the generation of the host the spawn went
    /// through. Fails if that host was disconnected while the spawn was in
    /// flight, even when a new host has since connected under the same
    /// name. The reservation is released either way.
    pub fn commit_nodegroup(
        &mut self,
        mut nodegroup: NodegroupRecord,
        host_generation: u64,
    ) -> Result<()> {
        self.pending_nodegroups.remove(&nodegroup.name);
        let generation = self.bump_generation();
        let host = self
            .hosts
            .get_mut(&nodegroup.host)
            .filter(|host| host.generation == host_generation)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Host, &nodegroup.host))?;
        host.nodegroups.insert(nodegroup.name.clone());
        nodegroup.generation = generation;
        self.nodegroups.insert(nodegroup.name.clone(), nodegroup);
        Ok(())
    }

    pub fn nodegroup(&self, name: &str) -> Result<&NodegroupRecord> {
        self.nodegroups
            .get(name)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Nodegroup, name))
    }

    /// Remove one nodegroup and its nodes, unlinking it from its host.
    pub fn remove_nodegroup(&mut self, name: &str) -> Result<Removed> {
        let ng = self
            .nodegroups
            .remove(name)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Nodegroup, name))?;

        if let Some(host) = self.hosts.get_mut(&ng.host) {
            host.nodegroups.remove(name);
        }

        let mut removed = Removed {
            nodegroups: vec![ng.name],
            nodes: Vec::new(),
        };
        for node in ng.nodes {
            self.nodes.remove(&node);
            removed.nodes.push(node);
        }
        Ok(removed)
    }

    /// Nodegroup names, globally or restricted to one host.
    pub fn nodegroup_names(&self, host: Option<&str>) -> Result<Vec<String>> {
        match host {
            None => Ok(self.nodegroups.keys().cloned().collect()),
            Some(host) => Ok(self.host(host)?.nodegroups().map(str::to_string).collect()),
        }
    }

    /// Snapshot of every nodegroup client, for broadcasts.
    pub fn nodegroup_clients(&self) -> Vec<(String, Arc<dyn NodegroupClient>)> {
        self.nodegroups
            .values()
            .map(|ng| (ng.name.clone(), Arc::clone(&ng.client)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    pub fn reserve_node(&mut self, name: &str) -> Result<()> {
        if self.nodes.contains_key(name) || self.pending_nodes.contains(name) {
            return Err(ManagerError::conflict(EntityKind::Node, name));
        }
        self.pending_nodes.insert(name.to_string());
        Ok(())
    }

    pub fn release_node(&mut self, name: &str) {
        self.pending_nodes.remove(name);
    }

    /// Turn a reservation into a registered node.
    ///
    /// `nodegroup_generation` is the generation of the nodegroup the create
    /// went through. Fails if that nodegroup vanished while the create was
    /// in flight; the reservation is released either way.
    pub fn commit_node(&mut self, node: NodeRecord, nodegroup_generation: u64) -> Result<()> {
        self.pending_nodes.remove(&node.name);
        let ng = self
            .nodegroups
            .get_mut(&node.nodegroup)
            .filter(|ng| ng.generation == nodegroup_generation)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Nodegroup, &node.nodegroup))?;
        ng.nodes.insert(node.name.clone());
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    pub fn node(&self, name: &str) -> Result<&NodeRecord> {
        self.nodes
            .get(name)
            .ok_or_else(|| ManagerError::not_found(EntityKind::Node, name))
    }

    /// Client of the nodegroup owning `node`.
    pub fn node_owner(&self, node: &str) -> Result<(String, Arc<dyn NodegroupClient>)> {
        let node = self.node(node)?;
        let ng = self.nodegroup(&node.nodegroup)?;
        Ok((ng.name.clone(), Arc::clone(&ng.client)))
    }

    /// Remove a node from the global map and from its nodegroup.
    pub fn remove_node(&mut self, name: &str) -> Option<NodeRecord> {
        let node = self.nodes.remove(name)?;
        if let Some(ng) = self.nodegroups.get_mut(&node.nodegroup) {
            ng.nodes.remove(name);
        }
        Some(node)
    }

    /// Node names, globally or restricted to one nodegroup.
    pub fn node_names(&self, nodegroup: Option<&str>) -> Result<Vec<String>> {
        match nodegroup {
            None => Ok(self.nodes.keys().cloned().collect()),
            Some(ng) => Ok(self.nodegroup(ng)?.nodes().map(str::to_string).collect()),
        }
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    pub fn suggest_nodegroup_name(&mut self) -> String {
        self.nodegroup_names.next_name()
    }

    pub fn suggest_node_name(&mut self) -> String {
        self.node_names.next_name()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
