//! Manager error taxonomy.

use std::fmt;

use crate::address::AddressError;
use crate::interfaces::{LaunchError, RemoteError};

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Kind of registry entry an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Host,
    Nodegroup,
    Node,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Host => "Host",
            EntityKind::Nodegroup => "Nodegroup",
            EntityKind::Node => "Node",
        })
    }
}

/// Errors returned by orchestration operations.
///
/// Conflict and NotFound are raised before any remote call is issued.
/// Remote means the agent call itself failed; the registry is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("{kind} named {name} already exists")]
    Conflict { kind: EntityKind, name: String },

    #[error("{kind} named {name} not found")]
    NotFound { kind: EntityKind, name: String },

    #[error("Remote call to {target} failed: {source}")]
    Remote {
        target: String,
        #[source]
        source: RemoteError,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("Manager is closed")]
    Closed,
}

impl ManagerError {
    pub fn conflict(kind: EntityKind, name: impl Into<String>) -> Self {
        ManagerError::Conflict {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        ManagerError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn remote(target: impl Into<String>, source: RemoteError) -> Self {
        ManagerError::Remote {
            target: target.into(),
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ManagerError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::NotFound { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ManagerError::Remote { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_entity() {
        let err = ManagerError::conflict(EntityKind::Nodegroup, "ngA");
        assert_eq!(err.to_string(), "Nodegroup named ngA already exists");

        let err = ManagerError::not_found(EntityKind::Host, "h1");
        assert_eq!(err.to_string(), "Host named h1 not found");
    }

    #[test]
    fn test_remote_keeps_source() {
        let err = ManagerError::remote("ngA", RemoteError::Timeout("deadline".to_string()));
        assert!(err.is_remote());
        assert!(std::error::Error::source(&err).is_some());
    }
}
