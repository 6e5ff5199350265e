//! Hub tunnels arriving for a local service (mesh -> local)

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use mesh_hub::ServiceRegistry;
use mesh_session::Diagnostics;
use mesh_wire::ServiceRecord;
use std::sync::Arc;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Splices accepted service tunnels to locally registered services
pub struct InboundProxy {
    registry: Arc<ServiceRegistry>,
    diagnostics: Arc<Diagnostics>,
}

impl InboundProxy {
    /// Create a proxy serving the services of `registry`
    pub fn new(registry: Arc<ServiceRegistry>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    /// Answer a tunnel request for `protocol/name`
    ///
    /// On 200 the upgraded stream is spliced to the service in the background.
    pub fn accept(
        &self,
        request: Request<Incoming>,
        protocol: &str,
        name: &str,
    ) -> Response<Full<Bytes>> {
        let Some(service) = self.registry.find(protocol, name) else {
            self.diagnostics
                .error(format!("Local service {} not found", name));
            return status(StatusCode::NOT_FOUND);
        };

        self.diagnostics
            .info(format!("Proxy to local service {}", name));

        let diagnostics = self.diagnostics.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(request).await {
                Ok(upgraded) => splice_local(TokioIo::new(upgraded), &service, &diagnostics).await,
                Err(e) => warn!("Tunnel for local service {} did not upgrade: {}", service.name, e),
            }
        });

        status(StatusCode::OK)
    }
}

/// Connect to `service` and copy bytes both ways until either side closes
pub async fn splice_local<S>(mut tunnel: S, service: &ServiceRecord, diagnostics: &Diagnostics)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut local = match TcpStream::connect((service.host.as_str(), service.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            diagnostics.error(format!(
                "Cannot reach local service {} at {}:{}: {}",
                service.name, service.host, service.port, e
            ));
            return;
        }
    };

    match copy_bidirectional(&mut tunnel, &mut local).await {
        Ok((received, sent)) => debug!(
            "Tunnel to local service {} done, {} bytes in, {} out",
            service.name, received, sent
        ),
        Err(e) => debug!("Tunnel to local service {} ended: {}", service.name, e),
    }
}

fn status(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
