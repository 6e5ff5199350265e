//! Scripted hub channels for agent tests

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use mesh_session::{Diagnostics, RpcChannel, SessionEvent, TrustStore, Tunnel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::agent::ChannelFactory;
use crate::config::{AgentIdentity, MeshConfig};

/// One request seen by a [`MockChannel`]
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) body: String,
}

/// Channel answering from a table of canned responses
pub(crate) struct MockChannel {
    address: String,
    responses: Mutex<HashMap<(Method, String), (StatusCode, String)>>,
    calls: Mutex<Vec<Call>>,
    pub(crate) closes: AtomicUsize,
    events: broadcast::Sender<SessionEvent>,
}

impl MockChannel {
    pub(crate) fn new(address: &str) -> Self {
        let (events, _) = broadcast::channel(4);
        Self {
            address: address.to_string(),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            events,
        }
    }

    pub(crate) fn respond(&self, method: Method, path: &str, status: StatusCode, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((method, path.to_string()), (status, body.to_string()));
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, request: Request<Bytes>) -> Option<Response<Bytes>> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.clone(),
            body: String::from_utf8_lossy(request.body()).to_string(),
        });

        let scripted = self.responses.lock().unwrap().get(&(method.clone(), path.clone())).cloned();
        let (status, body) = scripted.unwrap_or_else(|| match (method, path.as_str()) {
            (Method::POST, "/api/services") => (StatusCode::CREATED, String::new()),
            (Method::GET, _) => (StatusCode::NOT_FOUND, String::new()),
            _ => (StatusCode::OK, String::new()),
        });

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() = status;
        Some(response)
    }

    async fn open_tunnel(&self, _path: &str) -> Option<Tunnel> {
        None
    }

    fn is_connected(&self) -> bool {
        self.closes.load(Ordering::SeqCst) == 0
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn close_all(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one [`MockChannel`] per address and keeps them for inspection
#[derive(Default)]
pub(crate) struct MockChannels {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
}

impl MockChannels {
    pub(crate) fn get(&self, address: &str) -> Arc<MockChannel> {
        self.channels
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockChannel::new(address)))
            .clone()
    }
}

impl ChannelFactory for MockChannels {
    fn channel(
        &self,
        address: &str,
        _trust: &TrustStore,
        _diagnostics: Arc<Diagnostics>,
    ) -> Arc<dyn RpcChannel> {
        self.get(address)
    }
}

/// Membership of agent `edge` (id `id-1`) in mesh `m` with two hubs
pub(crate) fn membership() -> MeshConfig {
    MeshConfig {
        name: "m".to_string(),
        ca: None,
        agent: AgentIdentity {
            id: "id-1".to_string(),
            name: "edge".to_string(),
            certificate: None,
            private_key: None,
        },
        bootstraps: vec!["localhost:7001".to_string(), "hub-b:7002".to_string()],
    }
}
