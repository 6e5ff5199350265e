//! The agent facade: one mesh membership from join to leave.
//!
//! Joining parses the trust material, builds one hub relationship per
//! bootstrap address and wires the registry, port table and proxies between
//! them. Services and ports persisted by an earlier run are brought back
//! before the join is reported.

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use mesh_hub::{Hub, HubConfig, HubSet, HubState, ServiceRegistry, TunnelState};
use mesh_proxy::{ControlApi, HubRequestRouter, InboundProxy, OutboundProxy, PortTable, ProxyError};
use mesh_routing::{normalize_bootstraps, Directory, Router, RouterStats};
use mesh_session::{Diagnostics, HubSession, LogEntry, MeshErrorEntry, RpcChannel, TrustStore};
use mesh_storage::MeshStore;
use mesh_wire::{
    decode_json, get, json_request, paths, EndpointInfo, PortRecord, PortSpec, PortTarget,
    ServiceInfo, ServiceRecord, ServiceTarget, WireError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MeshConfig;

/// Failures of facade operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// None of this agent's hubs can reach the endpoint
    #[error("No hub for endpoint {0}")]
    NoHub(String),
    /// Local service or port operation failed
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    /// Request could not be built
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Builds the channel used to talk to one hub
pub trait ChannelFactory: Send + Sync {
    /// Channel to the hub at `address`
    fn channel(
        &self,
        address: &str,
        trust: &TrustStore,
        diagnostics: Arc<Diagnostics>,
    ) -> Arc<dyn RpcChannel>;
}

/// TLS HTTP/2 sessions, the channels used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsChannels;

impl ChannelFactory for TlsChannels {
    fn channel(
        &self,
        address: &str,
        trust: &TrustStore,
        diagnostics: Arc<Diagnostics>,
    ) -> Arc<dyn RpcChannel> {
        Arc::new(HubSession::new(address, trust.client_config(), diagnostics))
    }
}

/// Timing of the agent's periodic work
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Delay between status reports to every hub
    pub heartbeat_interval: Duration,
    /// Per-hub retry cadences
    pub hub: HubConfig,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            hub: HubConfig::default(),
        }
    }
}

/// Point-in-time view of an agent and its hubs
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// Mesh name
    pub mesh: String,
    /// Agent id
    pub id: String,
    /// Agent display name
    pub name: String,
    /// Whether any hub is connected
    pub connected: bool,
    /// Outbound routing counters
    pub routing: RouterStats,
    /// One entry per bootstrap hub, in configuration order
    pub hubs: Vec<HubStatus>,
}

/// Connectivity of one hub as seen by the agent
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    /// Normalized hub address
    pub address: String,
    /// Session state
    pub state: HubState,
    /// Reverse tunnel phase
    pub tunnel: TunnelState,
    /// Whether the hub acknowledged the latest service list
    pub synced: bool,
}

/// A joined mesh membership
pub struct Agent {
    mesh: String,
    id: String,
    name: String,
    diagnostics: Arc<Diagnostics>,
    hubs: Arc<HubSet>,
    router: Arc<Router>,
    control: Arc<ControlApi>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    left: AtomicBool,
}

impl Agent {
    /// Join the mesh over TLS sessions to every bootstrap hub
    pub async fn join(
        config: MeshConfig,
        store: Arc<dyn MeshStore>,
        options: AgentOptions,
    ) -> Arc<Self> {
        Self::join_with(config, store, options, &TlsChannels).await
    }

    /// Join the mesh using `channels` to reach the hubs
    pub async fn join_with(
        config: MeshConfig,
        store: Arc<dyn MeshStore>,
        options: AgentOptions,
        channels: &dyn ChannelFactory,
    ) -> Arc<Self> {
        let diagnostics = Arc::new(Diagnostics::new());
        let trust = TrustStore::load(
            config.ca.as_deref(),
            config.agent.certificate.as_deref(),
            config.agent.private_key.as_deref(),
            &diagnostics,
        );

        let hubs: Vec<Arc<Hub>> = normalize_bootstraps(&config.bootstraps)
            .iter()
            .map(|address| {
                Hub::new(
                    channels.channel(address, &trust, diagnostics.clone()),
                    config.agent.id.clone(),
                    config.agent.name.clone(),
                    options.hub.clone(),
                )
            })
            .collect();
        let hubs = Arc::new(HubSet::new(hubs));

        // The first bootstrap hub is the directory for every lookup
        let directory = hubs.first().map(|hub| hub.clone() as Arc<dyn Directory>);
        let router = Arc::new(Router::new(directory, hubs.addresses()));

        let registry = Arc::new(ServiceRegistry::new(hubs.clone()));
        let outbound = Arc::new(OutboundProxy::new(
            router.clone(),
            hubs.clone(),
            diagnostics.clone(),
        ));
        let control = Arc::new(ControlApi::new(
            config.name.clone(),
            store,
            registry.clone(),
            Arc::new(PortTable::new(outbound)),
        ));
        let dispatcher = HubRequestRouter::new(
            InboundProxy::new(registry, diagnostics.clone()),
            control.clone(),
        );
        hubs.start(Arc::new(dispatcher));

        let agent = Arc::new(Self {
            mesh: config.name,
            id: config.agent.id,
            name: config.agent.name,
            diagnostics,
            hubs,
            router,
            control,
            heartbeat: Mutex::new(None),
            left: AtomicBool::new(false),
        });

        agent.republish().await;
        agent.start_heartbeat(options.heartbeat_interval);

        agent.diagnostics.info(format!(
            "Joined {} as {} (uuid = {})",
            agent.mesh, agent.name, agent.id
        ));
        agent
    }

    /// Bring back services and ports persisted by an earlier run
    async fn republish(&self) {
        let store = self.control.store();

        match store.all_services(&self.mesh).await {
            Ok(services) => {
                for service in services {
                    self.control.registry().publish(
                        &service.protocol,
                        &service.name,
                        &service.host,
                        service.port,
                    );
                }
            }
            Err(e) => self
                .diagnostics
                .error(format!("Cannot load services of {}: {}", self.mesh, e)),
        }

        match store.all_ports(&self.mesh).await {
            Ok(ports) => {
                for port in ports {
                    let opened = self
                        .control
                        .ports()
                        .open(&port.listen.ip, &port.protocol, port.listen.port, port.target)
                        .await;
                    if let Err(e) = opened {
                        self.diagnostics.error(format!(
                            "Cannot reopen port {}/{}/{}: {}",
                            port.listen.ip, port.protocol, port.listen.port, e
                        ));
                    }
                }
            }
            Err(e) => self
                .diagnostics
                .error(format!("Cannot load ports of {}: {}", self.mesh, e)),
        }
    }

    fn start_heartbeat(&self, period: Duration) {
        let hubs = self.hubs.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                hubs.heartbeat_all();
            }
        });
        *self.lock_heartbeat() = Some(task);
    }

    fn lock_heartbeat(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mesh name
    pub fn mesh(&self) -> &str {
        &self.mesh
    }

    /// Agent id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Control API over this agent's services and ports
    pub fn control(&self) -> &Arc<ControlApi> {
        &self.control
    }

    /// Hubs this agent is registered with
    pub fn hubs(&self) -> &Arc<HubSet> {
        &self.hubs
    }

    /// Whether any hub is connected
    pub fn is_connected(&self) -> bool {
        self.hubs.is_connected()
    }

    /// Recent log entries, oldest first
    pub fn log(&self) -> Vec<LogEntry> {
        self.diagnostics.log()
    }

    /// Connectivity and certificate errors since the last reconnect
    pub fn errors(&self) -> Vec<MeshErrorEntry> {
        self.diagnostics.errors()
    }

    /// Connectivity, sync and routing summary
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            mesh: self.mesh.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
            connected: self.is_connected(),
            routing: self.router.stats(),
            hubs: self
                .hubs
                .iter()
                .map(|hub| HubStatus {
                    address: hub.address().to_string(),
                    state: hub.state(),
                    tunnel: hub.tunnel_state(),
                    synced: hub.is_synced(),
                })
                .collect(),
        }
    }

    /// Directory entry of a remote endpoint
    pub async fn find_endpoint(&self, ep: &str) -> Option<EndpointInfo> {
        self.hubs.first()?.find_endpoint(ep).await
    }

    /// Every endpoint known to the directory hub
    pub async fn discover_endpoints(&self) -> Vec<EndpointInfo> {
        match self.hubs.first() {
            Some(hub) => hub.discover_endpoints().await,
            None => Vec::new(),
        }
    }

    /// Every service known to the directory hub, or those of one endpoint
    pub async fn discover_services(&self, ep: Option<&str>) -> Vec<ServiceInfo> {
        match self.hubs.first() {
            Some(hub) => hub.discover_services(ep).await,
            None => Vec::new(),
        }
    }

    /// Publish and persist a local service
    pub async fn publish_service(
        &self,
        protocol: &str,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<ServiceRecord, AgentError> {
        let target = ServiceTarget {
            host: host.to_string(),
            port,
        };
        Ok(self.control.publish_service(protocol, name, target).await?)
    }

    /// Withdraw and forget a local service
    pub async fn delete_service(&self, protocol: &str, name: &str) -> Result<(), AgentError> {
        Ok(self.control.delete_service(protocol, name).await?)
    }

    /// Open and persist a local port
    pub async fn open_port(
        &self,
        ip: &str,
        protocol: &str,
        port: u16,
        target: PortTarget,
    ) -> Result<PortRecord, AgentError> {
        Ok(self
            .control
            .open_port(ip, protocol, port, PortSpec { target })
            .await?)
    }

    /// Close and forget a local port
    pub async fn close_port(&self, ip: &str, protocol: &str, port: u16) -> Result<(), AgentError> {
        Ok(self.control.close_port(ip, protocol, port).await?)
    }

    /// Services published by a remote endpoint
    pub async fn remote_query_services(&self, ep: &str) -> Result<Vec<ServiceRecord>, AgentError> {
        let hub = self.hub_for(ep).await?;
        let response = hub.call(get(&paths::forward_services(ep))?).await;
        Ok(decode_if(response, StatusCode::OK).unwrap_or_default())
    }

    /// Publish a service on a remote endpoint
    pub async fn remote_publish_service(
        &self,
        ep: &str,
        protocol: &str,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<Option<ServiceRecord>, AgentError> {
        let hub = self.hub_for(ep).await?;
        let body = ServiceTarget {
            host: host.to_string(),
            port,
        };
        let request = json_request(Method::POST, &paths::forward_service(ep, protocol, name), &body)?;
        Ok(decode_if(hub.call(request).await, StatusCode::CREATED))
    }

    /// Withdraw a service from a remote endpoint
    pub async fn remote_delete_service(
        &self,
        ep: &str,
        protocol: &str,
        name: &str,
    ) -> Result<bool, AgentError> {
        let hub = self.hub_for(ep).await?;
        let request = empty_request(Method::DELETE, &paths::forward_service(ep, protocol, name))?;
        Ok(is_success(hub.call(request).await))
    }

    /// Ports opened by a remote endpoint
    pub async fn remote_query_ports(&self, ep: &str) -> Result<Vec<PortRecord>, AgentError> {
        let hub = self.hub_for(ep).await?;
        let response = hub.call(get(&paths::forward_ports(ep))?).await;
        Ok(decode_if(response, StatusCode::OK).unwrap_or_default())
    }

    /// Open a port on a remote endpoint
    pub async fn remote_open_port(
        &self,
        ep: &str,
        ip: &str,
        protocol: &str,
        port: u16,
        target: PortTarget,
    ) -> Result<Option<PortRecord>, AgentError> {
        let hub = self.hub_for(ep).await?;
        let request = json_request(
            Method::POST,
            &paths::forward_port(ep, ip, protocol, port),
            &PortSpec { target },
        )?;
        Ok(decode_if(hub.call(request).await, StatusCode::CREATED))
    }

    /// Close a port on a remote endpoint
    pub async fn remote_close_port(
        &self,
        ep: &str,
        ip: &str,
        protocol: &str,
        port: u16,
    ) -> Result<bool, AgentError> {
        let hub = self.hub_for(ep).await?;
        let request = empty_request(Method::DELETE, &paths::forward_port(ep, ip, protocol, port))?;
        Ok(is_success(hub.call(request).await))
    }

    async fn hub_for(&self, ep: &str) -> Result<Arc<Hub>, AgentError> {
        self.router
            .select_hub(ep)
            .await
            .and_then(|address| self.hubs.by_address(&address).cloned())
            .ok_or_else(|| AgentError::NoHub(ep.to_string()))
    }

    /// Close every port and leave every hub
    pub fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            debug!("Agent {} already left {}", self.name, self.mesh);
            return;
        }

        if let Some(task) = self.lock_heartbeat().take() {
            task.abort();
        }
        self.control.ports().close_all();
        self.hubs.leave_all();

        self.diagnostics.info(format!(
            "Left {} as {} (uuid = {})",
            self.mesh, self.name, self.id
        ));
        info!("Agent {} is out of mesh {}", self.id, self.mesh);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("mesh", &self.mesh)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hubs", &self.hubs.addresses())
            .finish()
    }
}

fn empty_request(method: Method, path: &str) -> Result<http::Request<Bytes>, WireError> {
    Ok(http::Request::builder()
        .method(method)
        .uri(path)
        .body(Bytes::new())?)
}

fn decode_if<T: DeserializeOwned>(response: Option<Response<Bytes>>, expected: StatusCode) -> Option<T> {
    let response = response?;
    if response.status() != expected {
        debug!("Remote call answered {}", response.status());
        return None;
    }
    decode_json(&response).ok()
}

fn is_success(response: Option<Response<Bytes>>) -> bool {
    response.is_some_and(|r| r.status().is_success())
}
