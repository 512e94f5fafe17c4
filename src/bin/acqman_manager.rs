//! acqman-manager: orchestration manager service
//!
//! Serves the `acqman.Manager` gRPC service. Hosts, nodegroups and nodes
//! are driven through the agents' own gRPC services.
//!
//! ## Configuration
//! - ACQMAN_CONFIG: Path to a YAML config file (optional)
//! - ACQMAN__MANAGER__NAME / ACQMAN__MANAGER__ADDRESS: identity and bind address
//! - ACQMAN_RPC_NAME / ACQMAN_RPC_ADDRESS: set by a launching process,
//!   override the configured identity
//! - ACQMAN_LOG: tracing filter (default: info)
//!
//! Once listening, prints `ready <name> <address>` on stdout.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use acqman::address::Address;
use acqman::config::Config;
use acqman::factory::local_manager_at;
use acqman::grpc::ManagerService;
use acqman::process::{announce_ready, RPC_ADDRESS_ENV_VAR, RPC_NAME_ENV_VAR};
use acqman::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;

    let name = std::env::var(RPC_NAME_ENV_VAR).unwrap_or_else(|_| config.manager.name.clone());
    let requested = std::env::var(RPC_ADDRESS_ENV_VAR)
        .unwrap_or_else(|_| config.manager.address.clone());
    let requested = Address::parse(&requested)?;

    let listener = TcpListener::bind(requested.bind_target()).await?;
    let address = requested.bound_at(listener.local_addr()?.port());

    let manager = Arc::new(local_manager_at(&config, &name, address.clone()));
    let service = ManagerService::new(Arc::clone(&manager));

    info!(manager = %name, address = %address, "acqman-manager started");
    announce_ready(&name, &address)?;

    let shutdown = {
        let manager = Arc::clone(&manager);
        async move {
            tokio::select! {
                _ = manager.closed() => info!("Manager closed, shutting down"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
            }
        }
    };

    Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    // Reap the default host whichever way we got here.
    if let Err(e) = manager.close().await {
        error!(error = %e, "Error while closing manager");
    }

    Ok(())
}
