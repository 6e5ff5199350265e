//! Reverse tunnel from the agent to a hub.
//!
//! The hub cannot dial agents, so every agent keeps a tunnel open at
//! `/api/endpoints/{agentId}` and the hub pushes its requests down it as
//! HTTP/2 streams. The loop is an explicit state machine:
//!
//! ```text
//! Waiting --tick--> Connecting --open--> Serving --closed--> Waiting
//!    \                  \ refused -> Waiting   \
//!     `------ leave ------`---------------------`--> Left
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use mesh_session::{RpcChannel, Tunnel};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::hub::{is_closed, wait_closed};

/// Handler for requests a hub pushes through the reverse tunnel
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Answer one request; CONNECT requests may upgrade after a 2xx answer
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>>;
}

/// Observable phase of a reverse tunnel loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    /// Sleeping until the next attempt
    Waiting,
    /// Opening the tunnel
    Connecting,
    /// Tunnel open, serving hub requests
    Serving,
    /// Loop stopped for good
    Left,
}

enum Step {
    Waiting,
    Connecting,
    Serving(Tunnel),
    Left,
}

impl Step {
    fn state(&self) -> TunnelState {
        match self {
            Step::Waiting => TunnelState::Waiting,
            Step::Connecting => TunnelState::Connecting,
            Step::Serving(_) => TunnelState::Serving,
            Step::Left => TunnelState::Left,
        }
    }
}

pub(crate) struct ReverseTunnel {
    pub(crate) address: String,
    pub(crate) path: String,
    pub(crate) channel: Arc<dyn RpcChannel>,
    pub(crate) interval: Duration,
    pub(crate) handler: Arc<dyn InboundHandler>,
    pub(crate) state: watch::Sender<TunnelState>,
}

impl ReverseTunnel {
    pub(crate) async fn run(self, mut closed: watch::Receiver<bool>) {
        let mut step = Step::Waiting;

        loop {
            self.state.send_replace(step.state());

            step = match step {
                Step::Waiting => tokio::select! {
                    _ = tokio::time::sleep(self.interval) => Step::Connecting,
                    _ = wait_closed(&mut closed) => Step::Left,
                },
                Step::Connecting => {
                    let tunnel = self.channel.open_tunnel(&self.path).await;
                    match tunnel {
                        _ if is_closed(&closed) => Step::Left,
                        Some(tunnel) => Step::Serving(tunnel),
                        None => {
                            debug!("Reverse tunnel to hub {} not open, retrying", self.address);
                            Step::Waiting
                        }
                    }
                }
                Step::Serving(tunnel) => {
                    info!("Reverse tunnel to hub {} open", self.address);
                    tokio::select! {
                        result = serve_tunnel(tunnel, self.handler.clone()) => {
                            match result {
                                Ok(()) => info!("Reverse tunnel to hub {} closed", self.address),
                                Err(e) => warn!("Reverse tunnel to hub {} failed: {}", self.address, e),
                            }
                            Step::Waiting
                        }
                        _ = wait_closed(&mut closed) => Step::Left,
                    }
                }
                Step::Left => {
                    debug!("Reverse tunnel loop for hub {} stopped", self.address);
                    return;
                }
            };
        }
    }
}

/// Serve hub requests arriving on `tunnel` until it closes
pub async fn serve_tunnel(
    tunnel: Tunnel,
    handler: Arc<dyn InboundHandler>,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(request).await) }
    });

    let mut builder = http2::Builder::new(TokioExecutor::new());
    builder.enable_connect_protocol();
    builder
        .serve_connection(TokioIo::new(tunnel), service)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use http::StatusCode;
    use http_body_util::BodyExt;

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
            let body = format!("{} {}", request.method(), request.uri().path());
            Response::new(Full::new(Bytes::from(body)))
        }
    }

    #[tokio::test]
    async fn test_serve_tunnel_answers_hub_requests() {
        let (agent_side, hub_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_tunnel(Box::new(agent_side), Arc::new(Echo)));

        let (mut sender, connection) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(hub_side))
                .await
                .unwrap();
        tokio::spawn(connection);

        let request = Request::get("http://agent/api/services")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"GET /api/services");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_retries_until_closed() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let (state_tx, state_rx) = watch::channel(TunnelState::Waiting);
        let (closed_tx, closed) = watch::channel(false);

        let tunnel = ReverseTunnel {
            address: "hub:1".to_string(),
            path: "/api/endpoints/agent-1".to_string(),
            channel: channel.clone(),
            interval: Duration::from_secs(5),
            handler: Arc::new(Echo),
            state: state_tx,
        };
        let task = tokio::spawn(tunnel.run(closed));

        // First attempt only after one interval
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(channel.tunnel_attempts.load(std::sync::atomic::Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(channel.tunnel_attempts.load(std::sync::atomic::Ordering::SeqCst), 2);

        closed_tx.send_replace(true);
        task.await.unwrap();
        assert_eq!(*state_rx.borrow(), TunnelState::Left);
    }
}
