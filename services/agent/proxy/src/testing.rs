//! In-process hub channel and directory for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use mesh_routing::Directory;
use mesh_session::{RpcChannel, SessionEvent, Tunnel};
use mesh_wire::{EndpointInfo, ServiceInfo};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Channel that hands out queued tunnels and records requested paths
pub(crate) struct MockChannel {
    address: String,
    tunnels: Mutex<VecDeque<Tunnel>>,
    tunnel_paths: Mutex<Vec<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl MockChannel {
    pub(crate) fn new(address: &str) -> Self {
        let (events, _) = broadcast::channel(4);
        Self {
            address: address.to_string(),
            tunnels: Mutex::new(VecDeque::new()),
            tunnel_paths: Mutex::new(Vec::new()),
            events,
        }
    }

    pub(crate) fn push_tunnel(&self, tunnel: Tunnel) {
        self.tunnels.lock().unwrap().push_back(tunnel);
    }

    pub(crate) fn tunnel_paths(&self) -> Vec<String> {
        self.tunnel_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, _request: Request<Bytes>) -> Option<Response<Bytes>> {
        None
    }

    async fn open_tunnel(&self, path: &str) -> Option<Tunnel> {
        self.tunnel_paths.lock().unwrap().push(path.to_string());
        self.tunnels.lock().unwrap().pop_front()
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn close_all(&self) {}
}

/// Fixed directory answers
#[derive(Default)]
pub(crate) struct StaticDirectory {
    services: HashMap<String, Vec<String>>,
    endpoints: HashMap<String, Vec<String>>,
}

impl StaticDirectory {
    pub(crate) fn service(mut self, protocol: &str, name: &str, endpoints: &[&str]) -> Self {
        self.services.insert(
            format!("{}/{}", protocol, name),
            endpoints.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    pub(crate) fn endpoint(mut self, id: &str, hubs: &[&str]) -> Self {
        self.endpoints
            .insert(id.to_string(), hubs.iter().map(|h| h.to_string()).collect());
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn find_service(&self, protocol: &str, name: &str) -> Option<ServiceInfo> {
        let endpoints = self.services.get(&format!("{}/{}", protocol, name))?;
        Some(ServiceInfo {
            name: name.to_string(),
            protocol: protocol.to_string(),
            endpoints: endpoints
                .iter()
                .map(|id| EndpointInfo {
                    id: id.clone(),
                    hubs: Vec::new(),
                    extra: Default::default(),
                })
                .collect(),
            extra: Default::default(),
        })
    }

    async fn find_endpoint(&self, ep: &str) -> Option<EndpointInfo> {
        Some(EndpointInfo {
            id: ep.to_string(),
            hubs: self.endpoints.get(ep)?.clone(),
            extra: Default::default(),
        })
    }
}
