//! acqman - acquisition orchestration manager
//!
//! Keeps the registry of hosts, nodegroups and nodes that make up a
//! distributed acquisition system, and drives the agents that own them.
//!
//! - [`manager::Manager`]: the registry and control API
//! - [`grpc`]: the manager served over gRPC, plus agent clients
//! - [`factory::create_manager`]: run a manager in-process or as a child

pub mod address;
pub mod config;
pub mod error;
pub mod factory;
pub mod grpc;
pub mod interfaces;
pub mod manager;
pub mod process;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod utils;

pub mod proto {
    tonic::include_proto!("acqman");
}

pub use address::{Address, Port};
pub use error::{EntityKind, ManagerError, Result};
pub use factory::{create_manager, ManagerHandle, ManagerMode};
pub use manager::{BroadcastReport, Manager, NodeInfo};
