//! HTTP/2 session to a hub over mutually authenticated TLS.
//!
//! One TLS connection carries every call and tunnel as independent HTTP/2
//! streams. The connection is dialled lazily by the first call that needs it
//! and re-dialled by the first call after it drops; a drop fails only the
//! streams that were in flight.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::ClientConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, RpcChannel, SessionEvent, Tunnel};
use crate::diagnostics::Diagnostics;
use crate::transport::{connect_tcp, connect_tls, server_name};

type Sender = SendRequest<Full<Bytes>>;

/// Transport connections currently up, keyed by a local id
#[derive(Debug, Default)]
struct ConnectionSet {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, AbortHandle>>,
}

impl ConnectionSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Multiplexed TLS session to one hub address
pub struct HubSession {
    address: String,
    tls: Option<Arc<ClientConfig>>,
    diagnostics: Arc<Diagnostics>,
    sender: tokio::sync::Mutex<Option<Sender>>,
    connections: Arc<ConnectionSet>,
    events: broadcast::Sender<SessionEvent>,
}

impl HubSession {
    /// Create a session; nothing is dialled until the first call
    pub fn new(
        address: impl Into<String>,
        tls: Option<Arc<ClientConfig>>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: address.into(),
            tls,
            diagnostics,
            sender: tokio::sync::Mutex::new(None),
            connections: Arc::new(ConnectionSet::default()),
            events,
        }
    }

    /// Current sender, dialling a new connection if the last one is gone
    async fn sender(&self) -> Option<Sender> {
        let mut slot = self.sender.lock().await;
        if let Some(sender) = slot.as_ref() {
            if !sender.is_closed() {
                return Some(sender.clone());
            }
        }
        *slot = None;

        match self.connect().await {
            Ok(sender) => {
                *slot = Some(sender.clone());
                Some(sender)
            }
            Err(e) => {
                self.diagnostics
                    .mesh_error(format!("Cannot connect to hub {}: {}", self.address, e));
                None
            }
        }
    }

    async fn connect(&self) -> Result<Sender, ChannelError> {
        let tls = self.tls.clone().ok_or(ChannelError::NoTrust)?;

        debug!("Dialling hub {}", self.address);
        let tcp_stream = connect_tcp(&self.address).await?;
        let tls_stream = connect_tls(tls, tcp_stream, server_name(&self.address)).await?;

        let (sender, connection) = http2::Builder::new(TokioExecutor::new())
            .handshake(TokioIo::new(tls_stream))
            .await?;

        let id = self.connections.next_id.fetch_add(1, Ordering::Relaxed);
        let connections = self.connections.clone();
        let diagnostics = self.diagnostics.clone();
        let events = self.events.clone();
        let address = self.address.clone();

        // Held across the spawn so the driver cannot deregister before it is registered
        let mut active = self.connections.lock();
        let driver = tokio::spawn(async move {
            let error = connection.await.err().map(|e| e.to_string());
            if connections.remove(id) {
                diagnostics.mesh_error(format!(
                    "Connection to hub {} closed, error = {}",
                    address,
                    error.as_deref().unwrap_or("none")
                ));
                let _ = events.send(SessionEvent::Disconnected { address, error });
            }
        });
        active.insert(id, driver.abort_handle());
        drop(active);

        info!("Connected to hub {}", self.address);
        self.diagnostics.clear_errors();
        let _ = self.events.send(SessionEvent::Connected {
            address: self.address.clone(),
        });

        Ok(sender)
    }

    /// Give a path-only request the absolute form HTTP/2 needs
    fn prepare(&self, request: Request<Bytes>) -> Option<Request<Full<Bytes>>> {
        let (mut parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");

        parts.uri = match format!("https://{}{}", self.address, path).parse::<http::Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                warn!("Cannot address {} on hub {}: {}", path, self.address, e);
                return None;
            }
        };
        if parts.method == Method::CONNECT {
            parts
                .extensions
                .insert(hyper::ext::Protocol::from_static(mesh_wire::TUNNEL_PROTOCOL));
        }

        Some(Request::from_parts(parts, Full::new(body)))
    }
}

#[async_trait]
impl RpcChannel for HubSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, request: Request<Bytes>) -> Option<Response<Bytes>> {
        let request = self.prepare(request)?;
        let mut sender = self.sender().await?;

        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} {} on hub {} failed: {}", method, path, self.address, e);
                return None;
            }
        };

        let (parts, body) = response.into_parts();
        match body.collect().await {
            Ok(body) => Some(Response::from_parts(parts, body.to_bytes())),
            Err(e) => {
                debug!("{} {} on hub {} lost its body: {}", method, path, self.address, e);
                None
            }
        }
    }

    async fn open_tunnel(&self, path: &str) -> Option<Tunnel> {
        let request = self.prepare(mesh_wire::tunnel(path).ok()?)?;
        let mut sender = self.sender().await?;

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Tunnel {} on hub {} failed: {}", path, self.address, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                "Tunnel {} refused by hub {} with status {}",
                path,
                self.address,
                response.status()
            );
            return None;
        }

        match hyper::upgrade::on(response).await {
            Ok(upgraded) => Some(Box::new(TokioIo::new(upgraded))),
            Err(e) => {
                debug!("Tunnel {} on hub {} did not upgrade: {}", path, self.address, e);
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connections.len() > 0
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn close_all(&self) {
        let drained: Vec<AbortHandle> = self.connections.lock().drain().map(|(_, h)| h).collect();
        if !drained.is_empty() {
            info!("Closing {} connection(s) to hub {}", drained.len(), self.address);
        }
        for handle in drained {
            handle.abort();
        }
    }
}
