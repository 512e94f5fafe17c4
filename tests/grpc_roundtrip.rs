//! gRPC round trip over loopback.
//!
//! Serves a manager and a pair of minimal agents on real sockets, then
//! drives the manager through `ManagerProxy`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use acqman::address::Address;
use acqman::grpc::{GrpcConnector, ManagerProxy, ManagerService};
use acqman::interfaces::Options;
use acqman::manager::Manager;
use acqman::proto::host_agent_server::{HostAgent, HostAgentServer};
use acqman::proto::nodegroup_agent_server::{NodegroupAgent, NodegroupAgentServer};
use acqman::proto::{
    ControlNodeResponse, Empty, Endpoint, InstantiateNodeRequest, InstantiateNodeResponse,
    InvokeNodeRequest, NameRef, SpawnNodegroupRequest,
};
use acqman::testing::MockLauncher;

/// Host agent that reports every nodegroup as living at its own address.
struct LoopbackHost {
    address: Address,
}

#[tonic::async_trait]
impl HostAgent for LoopbackHost {
    async fn create_nodegroup(
        &self,
        request: Request<SpawnNodegroupRequest>,
    ) -> Result<Response<Endpoint>, Status> {
        let req = request.into_inner();
        let template = Address::parse(&req.address)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        assert_eq!(template.hostname(), self.address.hostname());
        assert!(template.is_wildcard());
        Ok(Response::new(Endpoint {
            name: req.name,
            address: self.address.to_string(),
        }))
    }

    async fn close(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }
}

/// Nodegroup agent keeping node names and classes in memory.
#[derive(Default)]
struct LoopbackNodegroup {
    nodes: Mutex<HashMap<String, String>>,
}

#[tonic::async_trait]
impl NodegroupAgent for LoopbackNodegroup {
    async fn create_node(
        &self,
        request: Request<InstantiateNodeRequest>,
    ) -> Result<Response<InstantiateNodeResponse>, Status> {
        let req = request.into_inner();
        if req.classname == "Broken" {
            return Err(Status::invalid_argument("unknown class Broken"));
        }
        self.nodes
            .lock()
            .unwrap()
            .insert(req.name.clone(), req.classname);
        let output = json!({ "node": req.name, "stream": 0 });
        Ok(Response::new(InstantiateNodeResponse {
            outputs_json: vec![output.to_string()],
        }))
    }

    async fn control_node(
        &self,
        request: Request<InvokeNodeRequest>,
    ) -> Result<Response<ControlNodeResponse>, Status> {
        let req = request.into_inner();
        if !self.nodes.lock().unwrap().contains_key(&req.name) {
            return Err(Status::not_found(req.name));
        }
        let options: Value = if req.options_json.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&req.options_json).unwrap()
        };
        let result = json!({ "node": req.name, "method": req.method, "options": options });
        Ok(Response::new(ControlNodeResponse {
            result_json: result.to_string(),
        }))
    }

    async fn delete_node(&self, request: Request<NameRef>) -> Result<Response<Empty>, Status> {
        let name = request.into_inner().name;
        self.nodes
            .lock()
            .unwrap()
            .remove(&name)
            .map(|_| Response::new(Empty {}))
            .ok_or_else(|| Status::not_found(name))
    }

    async fn start_all_nodes(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }

    async fn stop_all_nodes(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }

    async fn close(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }
}

async fn bind() -> (TcpListener, Address) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = Address::parse(&format!("tcp://127.0.0.1:{}", port)).unwrap();
    (listener, address)
}

/// Serve both agents on one port; returns its address.
async fn start_agents() -> Address {
    let (listener, address) = bind().await;
    let host = LoopbackHost {
        address: address.clone(),
    };
    tokio::spawn(
        Server::builder()
            .add_service(HostAgentServer::new(host))
            .add_service(NodegroupAgentServer::new(LoopbackNodegroup::default()))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    address
}

/// Serve a manager; returns it alongside a connected proxy.
async fn start_manager() -> (Arc<Manager>, ManagerProxy) {
    let (listener, address) = bind().await;
    let manager = Arc::new(Manager::new(
        "manager",
        address.clone(),
        Arc::new(GrpcConnector::default()),
        Arc::new(MockLauncher::new()),
    ));

    let shutdown = {
        let manager = Arc::clone(&manager);
        async move { manager.closed().await }
    };
    tokio::spawn(
        Server::builder()
            .add_service(ManagerService::new(Arc::clone(&manager)).into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown),
    );

    let proxy = ManagerProxy::connect("manager", &address).await.unwrap();
    (manager, proxy)
}

#[tokio::test]
async fn test_lifecycle_over_grpc() {
    let agents = start_agents().await;
    let (_manager, proxy) = start_manager().await;

    proxy.connect_host("h1", &agents.to_string()).await.unwrap();
    assert_eq!(proxy.list_hosts().await.unwrap(), vec!["h1"]);

    let (name, address) = proxy.create_nodegroup("h1", "ngA").await.unwrap();
    assert_eq!(name, "ngA");
    assert_eq!(address, agents);

    let mut options = Options::new();
    options.insert("rate".to_string(), json!(1000));
    proxy
        .create_node("ngA", "nodeA", "Acquirer", &options)
        .await
        .unwrap();
    assert_eq!(proxy.list_nodes(Some("ngA")).await.unwrap(), vec!["nodeA"]);

    let info = proxy.node_info("nodeA").await.unwrap();
    assert_eq!(info.classname, "Acquirer");
    assert_eq!(info.nodegroup, "ngA");
    assert_eq!(info.outputs, vec![json!({ "node": "nodeA", "stream": 0 })]);

    let result = proxy
        .control_node("nodeA", "configure", &options)
        .await
        .unwrap();
    assert_eq!(
        result,
        json!({ "node": "nodeA", "method": "configure", "options": { "rate": 1000 } })
    );

    assert!(proxy.start_all_nodes().await.unwrap().is_empty());
    assert!(proxy.stop_all_nodes().await.unwrap().is_empty());

    proxy.delete_node("nodeA").await.unwrap();
    assert!(proxy.list_nodes(None).await.unwrap().is_empty());

    proxy.disconnect_host("h1").await.unwrap();
    assert!(proxy.list_hosts().await.unwrap().is_empty());
    assert!(proxy.list_nodegroups(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_errors_keep_their_kind_over_grpc() {
    let agents = start_agents().await;
    let (_manager, proxy) = start_manager().await;

    let err = proxy.create_nodegroup("missing", "ng").await.unwrap_err();
    assert!(err.is_not_found());

    proxy.connect_host("h1", &agents.to_string()).await.unwrap();
    proxy.create_nodegroup("h1", "ng").await.unwrap();
    let err = proxy.create_nodegroup("h1", "ng").await.unwrap_err();
    assert!(err.is_conflict());

    let err = proxy
        .create_node("ng", "bad", "Broken", &Options::new())
        .await
        .unwrap_err();
    assert!(err.is_remote());
    assert!(proxy.list_nodes(None).await.unwrap().is_empty());

    let err = proxy
        .control_node("ghost", "start", &Options::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_bad_host_address_is_invalid_argument() {
    let (_manager, proxy) = start_manager().await;

    let err = proxy.connect_host("h1", "not-an-address").await.unwrap_err();
    assert_eq!(err.code(), Some(tonic::Code::InvalidArgument));
    assert!(proxy.list_hosts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_shuts_manager_down() {
    let (manager, proxy) = start_manager().await;

    let name = proxy.suggest_node_name().await.unwrap();
    assert!(name.starts_with("node-"));

    proxy.close().await.unwrap();
    manager.closed().await;
    assert!(manager.is_closed());
}
