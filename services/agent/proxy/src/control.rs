//! Control API for the services and ports of this agent.
//!
//! The same dispatcher answers requests other agents relay through a hub and
//! requests made against the local API server. Every change goes to the live
//! state first (registry or port table) and is then persisted.

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use mesh_hub::ServiceRegistry;
use mesh_storage::MeshStore;
use mesh_wire::{
    empty_response, error_response, json_response, PathParams, PathPattern, PortRecord, PortSpec,
    ServiceRecord, ServiceTarget,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::ports::PortTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Services,
    Service,
    Ports,
    Port,
}

/// Path-matched dispatcher over the local service registry, port table and store
pub struct ControlApi {
    mesh: String,
    store: Arc<dyn MeshStore>,
    registry: Arc<ServiceRegistry>,
    ports: Arc<PortTable>,
    routes: Vec<(PathPattern, Route)>,
}

impl ControlApi {
    /// Create a dispatcher for the mesh named `mesh`
    pub fn new(
        mesh: impl Into<String>,
        store: Arc<dyn MeshStore>,
        registry: Arc<ServiceRegistry>,
        ports: Arc<PortTable>,
    ) -> Self {
        let routes = vec![
            (PathPattern::new("/api/services"), Route::Services),
            (PathPattern::new("/api/services/{proto}/{svc}"), Route::Service),
            (PathPattern::new("/api/ports"), Route::Ports),
            (PathPattern::new("/api/ports/{ip}/{proto}/{port}"), Route::Port),
        ];

        Self {
            mesh: mesh.into(),
            store,
            registry,
            ports,
            routes,
        }
    }

    /// Registry of published services
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Table of open ports
    pub fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    /// Persistent store
    pub fn store(&self) -> &Arc<dyn MeshStore> {
        &self.store
    }

    /// Answer one control API request
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let path = request.uri().path().to_string();
        let matched = self
            .routes
            .iter()
            .find_map(|(pattern, route)| pattern.matches(&path).map(|params| (*route, params)));

        let Some((route, params)) = matched else {
            return error_response(StatusCode::NOT_FOUND, &format!("No route for {}", path));
        };

        let outcome = match (route, request.method()) {
            (Route::Services, &Method::GET) => self.list_services().await,
            (Route::Service, &Method::GET) => self.get_service(&params).await,
            (Route::Service, &Method::POST) => self.post_service(&params, request.body()).await,
            (Route::Service, &Method::DELETE) => self.delete_service_at(&params).await,
            (Route::Ports, &Method::GET) => self.list_ports().await,
            (Route::Port, &Method::GET) => self.get_port(&params).await,
            (Route::Port, &Method::POST) => self.post_port(&params, request.body()).await,
            (Route::Port, &Method::DELETE) => self.delete_port_at(&params).await,
            (_, method) => {
                debug!("{} not allowed on {}", method, path);
                return error_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &format!("{} not allowed on {}", method, path),
                );
            }
        };

        outcome.unwrap_or_else(|e| {
            warn!("{} {} failed: {}", request.method(), path, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        })
    }

    /// Publish and persist a local service
    pub async fn publish_service(
        &self,
        protocol: &str,
        name: &str,
        target: ServiceTarget,
    ) -> Result<ServiceRecord, ProxyError> {
        self.registry.publish(protocol, name, &target.host, target.port);
        Ok(self.store.set_service(&self.mesh, protocol, name, target).await?)
    }

    /// Withdraw and forget a local service
    pub async fn delete_service(&self, protocol: &str, name: &str) -> Result<(), ProxyError> {
        self.registry.delete(protocol, name);
        Ok(self.store.del_service(&self.mesh, protocol, name).await?)
    }

    /// Open and persist a local port
    pub async fn open_port(
        &self,
        ip: &str,
        protocol: &str,
        port: u16,
        spec: PortSpec,
    ) -> Result<PortRecord, ProxyError> {
        self.ports.open(ip, protocol, port, spec.target.clone()).await?;
        Ok(self.store.set_port(&self.mesh, ip, protocol, port, spec).await?)
    }

    /// Close and forget a local port
    pub async fn close_port(&self, ip: &str, protocol: &str, port: u16) -> Result<(), ProxyError> {
        self.ports.close(ip, protocol, port);
        Ok(self.store.del_port(&self.mesh, ip, protocol, port).await?)
    }

    async fn list_services(&self) -> Result<Response<Bytes>, ProxyError> {
        let services = self.store.all_services(&self.mesh).await?;
        Ok(json_response(StatusCode::OK, &services))
    }

    async fn get_service(&self, params: &PathParams) -> Result<Response<Bytes>, ProxyError> {
        let (protocol, name) = service_params(params)?;
        match self.store.get_service(&self.mesh, protocol, name).await? {
            Some(record) => Ok(json_response(StatusCode::OK, &record)),
            None => Ok(not_found(&format!("Service {}/{}", protocol, name))),
        }
    }

    async fn post_service(
        &self,
        params: &PathParams,
        body: &Bytes,
    ) -> Result<Response<Bytes>, ProxyError> {
        let (protocol, name) = service_params(params)?;
        let target: ServiceTarget = parse_body(body)?;
        let record = self.publish_service(protocol, name, target).await?;
        Ok(json_response(StatusCode::CREATED, &record))
    }

    async fn delete_service_at(&self, params: &PathParams) -> Result<Response<Bytes>, ProxyError> {
        let (protocol, name) = service_params(params)?;
        self.delete_service(protocol, name).await?;
        Ok(empty_response(StatusCode::NO_CONTENT))
    }

    async fn list_ports(&self) -> Result<Response<Bytes>, ProxyError> {
        let ports = self.store.all_ports(&self.mesh).await?;
        Ok(json_response(StatusCode::OK, &ports))
    }

    async fn get_port(&self, params: &PathParams) -> Result<Response<Bytes>, ProxyError> {
        let (ip, protocol, port) = port_params(params)?;
        match self.store.get_port(&self.mesh, ip, protocol, port).await? {
            Some(record) => Ok(json_response(StatusCode::OK, &record)),
            None => Ok(not_found(&format!("Port {}/{}/{}", ip, protocol, port))),
        }
    }

    async fn post_port(
        &self,
        params: &PathParams,
        body: &Bytes,
    ) -> Result<Response<Bytes>, ProxyError> {
        let (ip, protocol, port) = port_params(params)?;
        let spec: PortSpec = parse_body(body)?;
        let record = self.open_port(ip, protocol, port, spec).await?;
        Ok(json_response(StatusCode::CREATED, &record))
    }

    async fn delete_port_at(&self, params: &PathParams) -> Result<Response<Bytes>, ProxyError> {
        let (ip, protocol, port) = port_params(params)?;
        self.close_port(ip, protocol, port).await?;
        Ok(empty_response(StatusCode::NO_CONTENT))
    }
}

fn service_params(params: &PathParams) -> Result<(&str, &str), ProxyError> {
    Ok((params.require("proto")?, params.require("svc")?))
}

fn port_params(params: &PathParams) -> Result<(&str, &str, u16), ProxyError> {
    Ok((
        params.require("ip")?,
        params.require("proto")?,
        params
            .port("port")
            .map_err(|_| ProxyError::BadRequest("Invalid port number".to_string()))?,
    ))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProxyError> {
    serde_json::from_slice(body).map_err(|e| ProxyError::BadRequest(e.to_string()))
}

fn not_found(what: &str) -> Response<Bytes> {
    error_response(StatusCode::NOT_FOUND, &format!("{} not found", what))
}
