//! Local listening ports feeding the outbound proxy

use mesh_routing::RouteTarget;
use mesh_storage::port_key;
use mesh_wire::PortTarget;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::outbound::OutboundProxy;

/// Only protocol a port can carry
pub const SUPPORTED_PROTOCOL: &str = "tcp";

struct OpenPort {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

/// Listening ports keyed by `(ip, protocol, port)`
pub struct PortTable {
    outbound: Arc<OutboundProxy>,
    open: Mutex<HashMap<String, OpenPort>>,
}

impl PortTable {
    /// Create an empty table handing connections to `outbound`
    pub fn new(outbound: Arc<OutboundProxy>) -> Self {
        Self {
            outbound,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OpenPort>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Listen on `ip:port` and proxy every accepted connection to `target`
    ///
    /// A port already open under the same key is closed first.
    pub async fn open(
        &self,
        ip: &str,
        protocol: &str,
        port: u16,
        target: PortTarget,
    ) -> Result<SocketAddr, ProxyError> {
        if protocol != SUPPORTED_PROTOCOL {
            return Err(ProxyError::InvalidProtocol(protocol.to_string()));
        }

        self.close(ip, protocol, port);

        let listener = TcpListener::bind((ip, port))
            .await
            .map_err(|source| ProxyError::Bind {
                addr: format!("{}:{}", ip, port),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: format!("{}:{}", ip, port),
            source,
        })?;

        let route = RouteTarget::service(protocol, &target.service).with_endpoint(target.endpoint);
        info!("Listening on {} for {}", local_addr, route.service);

        let accept_loop = tokio::spawn(accept_loop(listener, self.outbound.clone(), route));
        self.lock().insert(
            port_key(ip, protocol, port),
            OpenPort {
                local_addr,
                accept_loop,
            },
        );

        Ok(local_addr)
    }

    /// Stop listening; returns whether the port was open
    pub fn close(&self, ip: &str, protocol: &str, port: u16) -> bool {
        match self.lock().remove(&port_key(ip, protocol, port)) {
            Some(open) => {
                open.accept_loop.abort();
                info!("Closed port {}", open.local_addr);
                true
            }
            None => false,
        }
    }

    /// Stop listening everywhere
    pub fn close_all(&self) {
        let drained: Vec<OpenPort> = self.lock().drain().map(|(_, open)| open).collect();
        for open in drained {
            open.accept_loop.abort();
            debug!("Closed port {}", open.local_addr);
        }
    }

    /// Bound address of an open port
    pub fn local_addr(&self, ip: &str, protocol: &str, port: u16) -> Option<SocketAddr> {
        self.lock()
            .get(&port_key(ip, protocol, port))
            .map(|open| open.local_addr)
    }

    /// Number of open ports
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no port is open
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Drop for PortTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn accept_loop(listener: TcpListener, outbound: Arc<OutboundProxy>, target: RouteTarget) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted {} for {}", peer, target.service);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot disable Nagle for {}: {}", peer, e);
                }

                let outbound = outbound.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    outbound.handle_connection(stream, &target).await;
                });
            }
            Err(e) => {
                warn!("Accept error for {}: {}", target.service, e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
