//! Abstract interfaces for the manager's collaborators.
//!
//! These traits define the contracts for:
//! - Host agents (spawn and close nodegroup worker processes)
//! - Nodegroup agents (create, control and delete nodes)
//! - Opening remote-call handles to either
//! - Launching local services as subprocesses

pub mod launcher;
pub mod remote;

pub use launcher::{LaunchError, LaunchedProcess, ProcessLauncher};
pub use remote::{
    HostClient, NodegroupClient, Options, RemoteConnector, RemoteError, Result as RemoteResult,
};
