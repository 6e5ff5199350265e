//! Dispatch of requests a hub pushes through the reverse tunnel

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use mesh_hub::InboundHandler;
use mesh_wire::{error_response, PathPattern};
use std::sync::Arc;
use tracing::debug;

use crate::control::ControlApi;
use crate::inbound::InboundProxy;

/// Sends service tunnels to the inbound proxy and everything else to the control API
pub struct HubRequestRouter {
    inbound: InboundProxy,
    control: Arc<ControlApi>,
    service_tunnel: PathPattern,
}

impl HubRequestRouter {
    /// Create a dispatcher
    pub fn new(inbound: InboundProxy, control: Arc<ControlApi>) -> Self {
        Self {
            inbound,
            control,
            service_tunnel: PathPattern::new("/api/services/{proto}/{svc}"),
        }
    }
}

#[async_trait]
impl InboundHandler for HubRequestRouter {
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        debug!("Hub request {} {}", request.method(), request.uri().path());

        if *request.method() == Method::CONNECT {
            let target = self
                .service_tunnel
                .matches(request.uri().path())
                .and_then(|p| Some((p.get("proto")?.to_string(), p.get("svc")?.to_string())));

            if let Some((protocol, name)) = target {
                return self.inbound.accept(request, &protocol, &name);
            }

            // The body of a CONNECT is the tunnel itself, never a payload
            let (parts, _) = request.into_parts();
            return self
                .control
                .handle(Request::from_parts(parts, Bytes::new()))
                .await
                .map(Full::new);
        }

        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, &e.to_string()).map(Full::new);
            }
        };

        self.control
            .handle(Request::from_parts(parts, body))
            .await
            .map(Full::new)
    }
}
