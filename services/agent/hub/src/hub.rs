//! One hub relationship: RPC channel, reverse tunnel, heartbeat, service list sync.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use mesh_routing::Directory;
use mesh_session::{RpcChannel, SessionEvent, Tunnel};
use mesh_wire::{decode_json, get, paths, post_status, EndpointInfo, ServiceInfo, ServiceKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::sync::ServiceListSync;
use crate::tunnel::{InboundHandler, ReverseTunnel, TunnelState};

/// Timing of the per-hub loops
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delay between unacknowledged service list pushes
    pub retry_interval: Duration,
    /// Delay between reverse tunnel attempts
    pub tunnel_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            tunnel_interval: Duration::from_secs(5),
        }
    }
}

/// Connectivity of one hub relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    /// Never connected and not trying right now
    Disconnected,
    /// First connection attempt under way
    Connecting,
    /// At least one transport connection is up
    Connected,
    /// Was connected, connection lost
    Reconnecting,
    /// Left for good
    Left,
}

/// A hub this agent is registered with
pub struct Hub {
    address: String,
    agent_id: String,
    agent_name: String,
    config: HubConfig,
    channel: Arc<dyn RpcChannel>,
    sync: Arc<ServiceListSync>,
    closed: watch::Sender<bool>,
    tunnel_state: watch::Receiver<TunnelState>,
    tunnel_state_tx: Mutex<Option<watch::Sender<TunnelState>>>,
    ever_connected: AtomicBool,
}

impl Hub {
    /// Create a hub relationship; nothing runs until [`Hub::start`]
    pub fn new(
        channel: Arc<dyn RpcChannel>,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        config: HubConfig,
    ) -> Arc<Self> {
        let address = channel.address().to_string();
        let (closed, _) = watch::channel(false);
        let (tunnel_state_tx, tunnel_state) = watch::channel(TunnelState::Waiting);
        let sync = Arc::new(ServiceListSync::new(
            address.clone(),
            channel.clone(),
            config.retry_interval,
        ));

        Arc::new(Self {
            address,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            config,
            channel,
            sync,
            closed,
            tunnel_state,
            tunnel_state_tx: Mutex::new(Some(tunnel_state_tx)),
            ever_connected: AtomicBool::new(false),
        })
    }

    /// Address of the hub
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Start the reverse tunnel loop and the connection event pump
    pub fn start(self: &Arc<Self>, handler: Arc<dyn InboundHandler>) {
        let state = self
            .tunnel_state_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(state) = state else {
            warn!("Hub {} already started", self.address);
            return;
        };

        let tunnel = ReverseTunnel {
            address: self.address.clone(),
            path: paths::endpoint_tunnel(&self.agent_id),
            channel: self.channel.clone(),
            interval: self.config.tunnel_interval,
            handler,
            state,
        };
        tokio::spawn(tunnel.run(self.closed.subscribe()));

        let events = self.channel.subscribe();
        tokio::spawn(self.clone().pump(events, self.closed.subscribe()));

        debug!("Hub {} started", self.address);
    }

    async fn pump(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        mut closed: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = wait_closed(&mut closed) => return,
                event = events.recv() => match event {
                    Ok(SessionEvent::Connected { .. }) => {
                        self.ever_connected.store(true, Ordering::SeqCst);
                        info!("Hub {} connected", self.address);
                        self.sync.repush(self.closed.subscribe());
                    }
                    Ok(SessionEvent::Disconnected { error, .. }) => {
                        info!(
                            "Hub {} disconnected ({})",
                            self.address,
                            error.as_deref().unwrap_or("no error")
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Hub {} skipped {} connection events", self.address, skipped);
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
    }

    /// Fire-and-forget status report
    pub fn heartbeat(&self) {
        if self.is_closed() {
            return;
        }

        let request = match post_status(&self.agent_name) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot encode heartbeat for hub {}: {}", self.address, e);
                return;
            }
        };

        let channel = self.channel.clone();
        let address = self.address.clone();
        tokio::spawn(async move {
            if channel.call(request).await.is_none() {
                debug!("Heartbeat to hub {} got no answer", address);
            }
        });
    }

    /// Replace the service list to deliver to this hub
    pub fn update_service_list(&self, list: Vec<ServiceKey>) {
        if self.is_closed() {
            return;
        }
        self.sync.update(list, self.closed.subscribe());
    }

    /// Whether the last service list was acknowledged
    pub fn is_synced(&self) -> bool {
        self.sync.is_idle()
    }

    /// Every endpoint known to the hub
    pub async fn discover_endpoints(&self) -> Vec<EndpointInfo> {
        self.get_json(&paths::endpoints()).await.unwrap_or_default()
    }

    /// Every service known to the hub, or those of one endpoint
    pub async fn discover_services(&self, ep: Option<&str>) -> Vec<ServiceInfo> {
        self.get_json(&paths::services(ep)).await.unwrap_or_default()
    }

    /// One endpoint with the hubs it is reachable through
    pub async fn find_endpoint(&self, ep: &str) -> Option<EndpointInfo> {
        self.get_json(&paths::endpoint(ep)).await
    }

    /// One service with the endpoints hosting it
    pub async fn find_service(&self, protocol: &str, name: &str) -> Option<ServiceInfo> {
        self.get_json(&paths::service(protocol, name)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let request = get(path).ok()?;
        let response = self.call(request).await?;
        if response.status() != StatusCode::OK {
            debug!("GET {} on hub {} answered {}", path, self.address, response.status());
            return None;
        }

        match decode_json(&response) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("GET {} on hub {} returned unreadable body: {}", path, self.address, e);
                None
            }
        }
    }

    /// Send one request over the hub session
    pub async fn call(&self, request: Request<Bytes>) -> Option<Response<Bytes>> {
        if self.is_closed() {
            return None;
        }
        self.channel.call(request).await
    }

    /// Open a tunnel at `path` over the hub session
    pub async fn open_tunnel(&self, path: &str) -> Option<Tunnel> {
        if self.is_closed() {
            return None;
        }
        self.channel.open_tunnel(path).await
    }

    /// Stop every loop and close every connection to the hub
    pub fn leave(&self) {
        if self.closed.send_replace(true) {
            debug!("Hub {} already left", self.address);
            return;
        }
        self.channel.close_all();
        info!("Left hub {}", self.address);
    }

    /// Whether at least one transport connection to the hub is up
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.channel.is_connected()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Current connectivity
    pub fn state(&self) -> HubState {
        if self.is_closed() {
            HubState::Left
        } else if self.channel.is_connected() {
            HubState::Connected
        } else if self.ever_connected.load(Ordering::SeqCst) {
            HubState::Reconnecting
        } else if *self.tunnel_state.borrow() == TunnelState::Connecting {
            HubState::Connecting
        } else {
            HubState::Disconnected
        }
    }

    /// Current phase of the reverse tunnel loop
    pub fn tunnel_state(&self) -> TunnelState {
        *self.tunnel_state.borrow()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Directory for Hub {
    async fn find_service(&self, protocol: &str, name: &str) -> Option<ServiceInfo> {
        Hub::find_service(self, protocol, name).await
    }

    async fn find_endpoint(&self, ep: &str) -> Option<EndpointInfo> {
        Hub::find_endpoint(self, ep).await
    }
}

pub(crate) fn is_closed(closed: &watch::Receiver<bool>) -> bool {
    *closed.borrow()
}

/// Resolve once the closed flag is set or its sender is gone
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
