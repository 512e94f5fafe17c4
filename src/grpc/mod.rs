//! gRPC binding of the orchestration protocol.
//!
//! - `server`: exposes a [`Manager`](crate::manager::Manager) as the
//!   `acqman.Manager` service
//! - `client`: host/nodegroup agent clients and a typed manager proxy
//!
//! Options and results cross the wire as JSON text; an empty string stands
//! for an empty option set or a null result.

pub mod client;
pub mod server;

pub use client::{GrpcConnector, GrpcHostClient, GrpcNodegroupClient, ManagerProxy, ProxyError};
pub use server::ManagerService;

use serde_json::Value;
use tonic::{Code, Status};

use crate::error::ManagerError;
use crate::interfaces::{Options, RemoteError};

impl From<ManagerError> for Status {
    fn from(err: ManagerError) -> Self {
        let message = err.to_string();
        match err {
            ManagerError::Conflict { .. } => Status::already_exists(message),
            ManagerError::NotFound { .. } => Status::not_found(message),
            ManagerError::InvalidAddress(_) => Status::invalid_argument(message),
            ManagerError::Remote { source, .. } => match source {
                RemoteError::Connection(_) | RemoteError::Timeout(_) => {
                    Status::unavailable(message)
                }
                RemoteError::Rejected(_) => Status::aborted(message),
                RemoteError::InvalidAddress(_) | RemoteError::Codec(_) => Status::internal(message),
            },
            ManagerError::Launch(_) => Status::internal(message),
            ManagerError::Closed => Status::failed_precondition(message),
        }
    }
}

impl From<Status> for RemoteError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unavailable => RemoteError::Connection(message),
            Code::DeadlineExceeded | Code::Cancelled => RemoteError::Timeout(message),
            code => RemoteError::Rejected(format!("{:?}: {}", code, message)),
        }
    }
}

pub(crate) fn encode_options(options: &Options) -> String {
    if options.is_empty() {
        String::new()
    } else {
        Value::Object(options.clone()).to_string()
    }
}

pub(crate) fn decode_options(json: &str) -> Result<Options, serde_json::Error> {
    if json.is_empty() {
        return Ok(Options::new());
    }
    serde_json::from_str(json)
}

pub(crate) fn encode_value(value: &Value) -> String {
    if value.is_null() {
        String::new()
    } else {
        value.to_string()
    }
}

pub(crate) fn decode_value(json: &str) -> Result<Value, serde_json::Error> {
    if json.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(json)
}
