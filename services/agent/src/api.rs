//! Local HTTP/1.1 control API.
//!
//! Serves the control API of this agent plus operator views: the agent log,
//! the mesh error list, directory lookups and calls relayed to remote
//! endpoints. Paths the agent does not claim fall through to the same
//! dispatcher hubs reach through the reverse tunnel.

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use mesh_wire::{
    empty_response, error_response, json_response, PathParams, PathPattern, PortSpec,
    ServiceTarget,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::agent::{Agent, AgentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiRoute {
    Log,
    Errors,
    Status,
    Endpoints,
    Endpoint,
    EndpointServices,
    RemoteServices,
    RemoteService,
    RemotePorts,
    RemotePort,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("{0}")]
    Malformed(String),
    #[error("method not allowed")]
    MethodNotAllowed,
}

type ApiResult = Result<Response<Bytes>, ApiError>;

/// Local control API over one agent
pub struct ApiServer {
    agent: Arc<Agent>,
    routes: Vec<(PathPattern, ApiRoute)>,
}

impl ApiServer {
    /// Create a server for `agent`
    pub fn new(agent: Arc<Agent>) -> Self {
        let routes = vec![
            (PathPattern::new("/api/log"), ApiRoute::Log),
            (PathPattern::new("/api/errors"), ApiRoute::Errors),
            (PathPattern::new("/api/status"), ApiRoute::Status),
            (PathPattern::new("/api/endpoints"), ApiRoute::Endpoints),
            (PathPattern::new("/api/endpoints/{ep}"), ApiRoute::Endpoint),
            (PathPattern::new("/api/endpoints/{ep}/services"), ApiRoute::EndpointServices),
            (PathPattern::new("/api/endpoints/{ep}/remote/services"), ApiRoute::RemoteServices),
            (
                PathPattern::new("/api/endpoints/{ep}/remote/services/{proto}/{svc}"),
                ApiRoute::RemoteService,
            ),
            (PathPattern::new("/api/endpoints/{ep}/remote/ports"), ApiRoute::RemotePorts),
            (
                PathPattern::new("/api/endpoints/{ep}/remote/ports/{ip}/{proto}/{port}"),
                ApiRoute::RemotePort,
            ),
        ];
        Self { agent, routes }
    }

    /// Accept connections on `listener` until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Control API listening on http://{}", addr);
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.serve_request(request).await) }
                });

                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service);
                if let Err(e) = conn.await {
                    debug!("Control API connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    async fn serve_request(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        let response = match body.collect().await {
            Ok(collected) => self.handle(Request::from_parts(parts, collected.to_bytes())).await,
            Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        response.map(Full::new)
    }

    /// Answer one request
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let path = request.uri().path().to_string();
        let matched = self
            .routes
            .iter()
            .find_map(|(pattern, route)| pattern.matches(&path).map(|params| (*route, params)));

        let Some((route, params)) = matched else {
            return self.agent.control().handle(request).await;
        };

        match self.dispatch(route, &params, &request).await {
            Ok(response) => response,
            Err(ApiError::MethodNotAllowed) => error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("{} not allowed on {}", request.method(), path),
            ),
            Err(e) => {
                debug!("{} {} failed: {}", request.method(), path, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        route: ApiRoute,
        params: &PathParams,
        request: &Request<Bytes>,
    ) -> ApiResult {
        match (route, request.method()) {
            (ApiRoute::Log, &Method::GET) => Ok(json_response(StatusCode::OK, &self.agent.log())),
            (ApiRoute::Errors, &Method::GET) => {
                Ok(json_response(StatusCode::OK, &self.agent.errors()))
            }
            (ApiRoute::Status, &Method::GET) => {
                Ok(json_response(StatusCode::OK, &self.agent.status()))
            }
            (ApiRoute::Endpoints, &Method::GET) => Ok(json_response(
                StatusCode::OK,
                &self.agent.discover_endpoints().await,
            )),
            (ApiRoute::Endpoint, &Method::GET) => self.endpoint(params).await,
            (ApiRoute::EndpointServices, &Method::GET) => {
                let ep = param(params, "ep")?;
                Ok(json_response(
                    StatusCode::OK,
                    &self.agent.discover_services(Some(ep)).await,
                ))
            }
            (ApiRoute::RemoteServices, &Method::GET) => {
                let ep = param(params, "ep")?;
                Ok(json_response(
                    StatusCode::OK,
                    &self.agent.remote_query_services(ep).await?,
                ))
            }
            (ApiRoute::RemoteService, &Method::POST) => {
                self.remote_publish(params, request.body()).await
            }
            (ApiRoute::RemoteService, &Method::DELETE) => self.remote_delete(params).await,
            (ApiRoute::RemotePorts, &Method::GET) => {
                let ep = param(params, "ep")?;
                Ok(json_response(
                    StatusCode::OK,
                    &self.agent.remote_query_ports(ep).await?,
                ))
            }
            (ApiRoute::RemotePort, &Method::POST) => self.remote_open(params, request.body()).await,
            (ApiRoute::RemotePort, &Method::DELETE) => self.remote_close(params).await,
            _ => Err(ApiError::MethodNotAllowed),
        }
    }

    async fn endpoint(&self, params: &PathParams) -> ApiResult {
        let ep = param(params, "ep")?;
        Ok(match self.agent.find_endpoint(ep).await {
            Some(info) => json_response(StatusCode::OK, &info),
            None => error_response(StatusCode::NOT_FOUND, &format!("Endpoint {} not found", ep)),
        })
    }

    async fn remote_publish(&self, params: &PathParams, body: &Bytes) -> ApiResult {
        let ep = param(params, "ep")?;
        let target: ServiceTarget = parse_body(body)?;
        let record = self
            .agent
            .remote_publish_service(
                ep,
                param(params, "proto")?,
                param(params, "svc")?,
                &target.host,
                target.port,
            )
            .await?;
        Ok(created_or_rejected(ep, record))
    }

    async fn remote_delete(&self, params: &PathParams) -> ApiResult {
        let ep = param(params, "ep")?;
        let done = self
            .agent
            .remote_delete_service(ep, param(params, "proto")?, param(params, "svc")?)
            .await?;
        Ok(deleted_or_rejected(ep, done))
    }

    async fn remote_open(&self, params: &PathParams, body: &Bytes) -> ApiResult {
        let ep = param(params, "ep")?;
        let spec: PortSpec = parse_body(body)?;
        let record = self
            .agent
            .remote_open_port(
                ep,
                param(params, "ip")?,
                param(params, "proto")?,
                port_param(params)?,
                spec.target,
            )
            .await?;
        Ok(created_or_rejected(ep, record))
    }

    async fn remote_close(&self, params: &PathParams) -> ApiResult {
        let ep = param(params, "ep")?;
        let done = self
            .agent
            .remote_close_port(ep, param(params, "ip")?, param(params, "proto")?, port_param(params)?)
            .await?;
        Ok(deleted_or_rejected(ep, done))
    }
}

fn param<'a>(params: &'a PathParams, name: &str) -> Result<&'a str, ApiError> {
    params
        .require(name)
        .map_err(|e| ApiError::Malformed(e.to_string()))
}

fn port_param(params: &PathParams) -> Result<u16, ApiError> {
    params
        .port("port")
        .map_err(|e| ApiError::Malformed(e.to_string()))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Malformed(format!("malformed body: {}", e)))
}

fn created_or_rejected<T: Serialize>(ep: &str, record: Option<T>) -> Response<Bytes> {
    match record {
        Some(record) => json_response(StatusCode::CREATED, &record),
        None => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Endpoint {} rejected the request", ep),
        ),
    }
}

fn deleted_or_rejected(ep: &str, done: bool) -> Response<Bytes> {
    if done {
        empty_response(StatusCode::NO_CONTENT)
    } else {
        error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Endpoint {} rejected the request", ep),
        )
    }
}
