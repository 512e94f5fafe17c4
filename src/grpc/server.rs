//! `acqman.Manager` gRPC service backed by an in-process manager.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, error};

use super::{decode_options, encode_value};
use crate::manager::{BroadcastReport, Manager};
use crate::proto::manager_server::{Manager as ManagerRpc, ManagerServer};
use crate::proto::{
    BroadcastFailure, BroadcastResponse, ConnectHostRequest, ControlNodeRequest,
    ControlNodeResponse, CreateNodeRequest, CreateNodegroupRequest, Empty, Endpoint,
    ListNodegroupsRequest, ListNodesRequest, NameList, NameRef, NodeInfo,
};

/// Serves a [`Manager`] over gRPC.
pub struct ManagerService {
    manager: Arc<Manager>,
}

impl ManagerService {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// Wrap into the generated tonic server.
    pub fn into_server(self) -> ManagerServer<Self> {
        ManagerServer::new(self)
    }
}

fn invalid_options(e: serde_json::Error) -> Status {
    Status::invalid_argument(format!("options must be a JSON object: {}", e))
}

fn broadcast_response(report: BroadcastReport) -> BroadcastResponse {
    BroadcastResponse {
        failures: report
            .failures
            .into_iter()
            .map(|f| BroadcastFailure {
                nodegroup: f.nodegroup,
                message: f.error.to_string(),
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl ManagerRpc for ManagerService {
    async fn connect_host(
        &self,
        request: Request<ConnectHostRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        self.manager.connect_host(&req.name, &req.address).await?;
        Ok(Response::new(Empty {}))
    }

    async fn disconnect_host(&self, request: Request<NameRef>) -> Result<Response<Empty>, Status> {
        self.manager
            .disconnect_host(&request.into_inner().name)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn default_host(&self, _request: Request<Empty>) -> Result<Response<Endpoint>, Status> {
        let (name, address) = self.manager.default_host().await.map_err(|e| {
            error!(error = %e, "Default host unavailable");
            Status::from(e)
        })?;
        Ok(Response::new(Endpoint {
            name,
            address: address.to_string(),
        }))
    }

    async fn close_host(&self, request: Request<NameRef>) -> Result<Response<Empty>, Status> {
        self.manager.close_host(&request.into_inner().name).await?;
        Ok(Response::new(Empty {}))
    }

    async fn close(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.manager.close().await?;
        Ok(Response::new(Empty {}))
    }

    async fn list_hosts(&self, _request: Request<Empty>) -> Result<Response<NameList>, Status> {
        let names = self.manager.list_hosts().await;
        Ok(Response::new(NameList { names }))
    }

    async fn create_nodegroup(
        &self,
        request: Request<CreateNodegroupRequest>,
    ) -> Result<Response<Endpoint>, Status> {
        let req = request.into_inner();
        let (name, address) = self.manager.create_nodegroup(&req.host, &req.name).await?;
        Ok(Response::new(Endpoint {
            name,
            address: address.to_string(),
        }))
    }

    async fn list_nodegroups(
        &self,
        request: Request<ListNodegroupsRequest>,
    ) -> Result<Response<NameList>, Status> {
        let req = request.into_inner();
        let names = self.manager.list_nodegroups(req.host.as_deref()).await?;
        Ok(Response::new(NameList { names }))
    }

    async fn close_nodegroup(&self, request: Request<NameRef>) -> Result<Response<Empty>, Status> {
        self.manager
            .close_nodegroup(&request.into_inner().name)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn create_node(
        &self,
        request: Request<CreateNodeRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let options = decode_options(&req.options_json).map_err(invalid_options)?;
        self.manager
            .create_node(&req.nodegroup, &req.name, &req.classname, options)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn list_nodes(
        &self,
        request: Request<ListNodesRequest>,
    ) -> Result<Response<NameList>, Status> {
        let req = request.into_inner();
        let names = self.manager.list_nodes(req.nodegroup.as_deref()).await?;
        Ok(Response::new(NameList { names }))
    }

    async fn node_details(&self, request: Request<NameRef>) -> Result<Response<NodeInfo>, Status> {
        let info = self.manager.node_info(&request.into_inner().name).await?;
        Ok(Response::new(NodeInfo {
            name: info.name,
            classname: info.classname,
            nodegroup: info.nodegroup,
            outputs_json: info.outputs.iter().map(encode_value).collect(),
        }))
    }

    async fn control_node(
        &self,
        request: Request<ControlNodeRequest>,
    ) -> Result<Response<ControlNodeResponse>, Status> {
        let req = request.into_inner();
        let options = decode_options(&req.options_json).map_err(invalid_options)?;
        debug!(node = %req.name, method = %req.method, "ControlNode");
        let result = self
            .manager
            .control_node(&req.name, &req.method, options)
            .await?;
        Ok(Response::new(ControlNodeResponse {
            result_json: encode_value(&result),
        }))
    }

    async fn delete_node(&self, request: Request<NameRef>) -> Result<Response<Empty>, Status> {
        self.manager.delete_node(&request.into_inner().name).await?;
        Ok(Response::new(Empty {}))
    }

    async fn suggest_nodegroup_name(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<NameRef>, Status> {
        let name = self.manager.suggest_nodegroup_name().await;
        Ok(Response::new(NameRef { name }))
    }

    async fn suggest_node_name(&self, _request: Request<Empty>) -> Result<Response<NameRef>, Status> {
        let name = self.manager.suggest_node_name().await;
        Ok(Response::new(NameRef { name }))
    }

    async fn start_all_nodes(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<BroadcastResponse>, Status> {
        let report = self.manager.start_all_nodes().await;
        Ok(Response::new(broadcast_response(report)))
    }

    async fn stop_all_nodes(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<BroadcastResponse>, Status> {
        let report = self.manager.stop_all_nodes().await;
        Ok(Response::new(broadcast_response(report)))
    }
}
