//! Scriptable in-process hub channel for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use mesh_session::{RpcChannel, SessionEvent, Tunnel};
use mesh_wire::ServiceKey;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};

pub(crate) struct MockChannel {
    address: String,
    calls: Mutex<Vec<(Method, String, Bytes)>>,
    service_statuses: Mutex<VecDeque<StatusCode>>,
    responses: Mutex<HashMap<String, (StatusCode, String)>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    tunnels: Mutex<VecDeque<Tunnel>>,
    pub(crate) tunnel_attempts: AtomicUsize,
    connected: AtomicBool,
    pub(crate) events: broadcast::Sender<SessionEvent>,
}

impl MockChannel {
    pub(crate) fn new(address: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: address.to_string(),
            calls: Mutex::new(Vec::new()),
            service_statuses: Mutex::new(VecDeque::new()),
            responses: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            tunnels: Mutex::new(VecDeque::new()),
            tunnel_attempts: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            events,
        }
    }

    /// Statuses answered to the next service list pushes, then 201
    pub(crate) fn script_service_statuses(&self, statuses: &[StatusCode]) {
        self.service_statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    /// Answer `GET path` with a JSON body
    pub(crate) fn respond(&self, path: &str, status: StatusCode, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Hold the next call until the returned sender fires
    pub(crate) fn hold_next_call(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub(crate) fn push_tunnel(&self, tunnel: Tunnel) {
        self.tunnels.lock().unwrap().push_back(tunnel);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<(Method, String, Bytes)> {
        self.calls.lock().unwrap().clone()
    }

    /// Bodies of every `POST /api/services` so far
    pub(crate) fn service_lists(&self) -> Vec<Vec<ServiceKey>> {
        self.calls()
            .into_iter()
            .filter(|(m, p, _)| *m == Method::POST && p == "/api/services")
            .map(|(_, _, body)| serde_json::from_slice(&body).unwrap())
            .collect()
    }

    pub(crate) async fn wait_for_calls(&self, n: usize) {
        while self.calls.lock().unwrap().len() < n {
            tokio::task::yield_now().await;
        }
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
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.clone(), request.body().clone()));

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let (status, body) = if method == Method::POST && path == "/api/services" {
            let status = self
                .service_statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(StatusCode::CREATED);
            (status, String::new())
        } else if method == Method::GET {
            self.responses
                .lock()
                .unwrap()
                .get(&path)
                .cloned()
                .unwrap_or((StatusCode::NOT_FOUND, String::new()))
        } else {
            (StatusCode::OK, String::new())
        };

        Response::builder()
            .status(status)
            .body(Bytes::from(body))
            .ok()
    }

    async fn open_tunnel(&self, _path: &str) -> Option<Tunnel> {
        self.tunnel_attempts.fetch_add(1, Ordering::SeqCst);
        self.tunnels.lock().unwrap().pop_front()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn close_all(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
