//! Local connections leaving for a remote service (local -> mesh)

use mesh_hub::HubSet;
use mesh_routing::{DropReason, RouteTarget, Router, RoutingDecision};
use mesh_session::Diagnostics;
use mesh_wire::paths;
use std::sync::Arc;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tracing::debug;

/// Resolves each local connection to a hub tunnel and splices it through
pub struct OutboundProxy {
    router: Arc<Router>,
    hubs: Arc<HubSet>,
    diagnostics: Arc<Diagnostics>,
}

impl OutboundProxy {
    /// Create a proxy selecting routes with `router` among `hubs`
    pub fn new(router: Arc<Router>, hubs: Arc<HubSet>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            router,
            hubs,
            diagnostics,
        }
    }

    /// Carry one accepted connection to `target`, closing it on any failure
    pub async fn handle_connection<S>(&self, mut local: S, target: &RouteTarget)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let route = match self.router.resolve(target).await {
            RoutingDecision::Forward(route) => route,
            RoutingDecision::Drop(reason) => {
                self.diagnostics.error(reason.to_string());
                return;
            }
        };

        let Some(hub) = self.hubs.by_address(&route.hub) else {
            self.diagnostics
                .error(DropReason::NoRoute(route.endpoint).to_string());
            return;
        };

        let path = paths::service_tunnel(&route.endpoint, &target.protocol, &target.service);
        let Some(mut tunnel) = hub.open_tunnel(&path).await else {
            self.diagnostics.error(format!(
                "Cannot open tunnel to {} at endpoint {} via {}",
                target.service, route.endpoint, route.hub
            ));
            return;
        };

        self.diagnostics.info(format!(
            "Proxy to {} at endpoint {} via {}",
            target.service, route.endpoint, route.hub
        ));

        match copy_bidirectional(&mut local, &mut tunnel).await {
            Ok((sent, received)) => debug!(
                "Connection to {} done, {} bytes sent, {} received",
                target.service, sent, received
            ),
            Err(e) => debug!("Connection to {} ended: {}", target.service, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChannel, StaticDirectory};
    use mesh_hub::{Hub, HubConfig};
    use mesh_session::LogLevel;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn proxy_with(
        directory: StaticDirectory,
        channel: Arc<MockChannel>,
    ) -> (OutboundProxy, Arc<Diagnostics>) {
        let hub = Hub::new(channel.clone(), "agent-1", "edge", HubConfig::default());
        let hubs = Arc::new(HubSet::new(vec![hub]));
        let router = Arc::new(Router::new(
            Some(Arc::new(directory) as Arc<dyn mesh_routing::Directory>),
            ["hub:1"],
        ));
        let diagnostics = Arc::new(Diagnostics::new());
        (
            OutboundProxy::new(router, hubs, diagnostics.clone()),
            diagnostics,
        )
    }

    #[tokio::test]
    async fn test_unresolvable_target_logs_once_and_closes() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let (proxy, diagnostics) = proxy_with(StaticDirectory::default(), channel.clone());

        let (local, mut client) = duplex(1024);
        proxy
            .handle_connection(local, &RouteTarget::service("tcp", "ghost"))
            .await;

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);

        let log = diagnostics.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].level, LogLevel::Error);
        assert_eq!(log[0].message, "No endpoint found for ghost");
        assert!(channel.tunnel_paths().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_without_shared_hub_is_denied() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let directory = StaticDirectory::default()
            .service("tcp", "web", &["ep-2"])
            .endpoint("ep-2", &["hub:9"]);
        let (proxy, diagnostics) = proxy_with(directory, channel);

        let (local, _client) = duplex(1024);
        proxy
            .handle_connection(local, &RouteTarget::service("tcp", "web"))
            .await;

        let log = diagnostics.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "No route to endpoint ep-2");
    }

    #[tokio::test]
    async fn test_refused_tunnel_is_logged() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let directory = StaticDirectory::default().endpoint("ep-2", &["hub:1"]);
        let (proxy, diagnostics) = proxy_with(directory, channel.clone());

        let (local, _client) = duplex(1024);
        let target = RouteTarget::service("tcp", "web").with_endpoint(Some("ep-2".into()));
        proxy.handle_connection(local, &target).await;

        assert_eq!(channel.tunnel_paths(), vec!["/api/endpoints/ep-2/services/tcp/web"]);
        let log = diagnostics.log();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].message,
            "Cannot open tunnel to web at endpoint ep-2 via hub:1"
        );
    }

    #[tokio::test]
    async fn test_bytes_flow_through_tunnel() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let (tunnel, mut remote) = duplex(1024);
        channel.push_tunnel(Box::new(tunnel));
        let directory = StaticDirectory::default()
            .service("tcp", "web", &["ep-2", "ep-3"])
            .endpoint("ep-2", &["hub:0", "hub:1"]);
        let (proxy, diagnostics) = proxy_with(directory, channel.clone());

        let (local, mut client) = duplex(1024);
        let task = tokio::spawn(async move {
            proxy
                .handle_connection(local, &RouteTarget::service("tcp", "web"))
                .await;
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);
        drop(remote);
        task.await.unwrap();

        let log = diagnostics.log();
        assert_eq!(log[0].message, "Proxy to web at endpoint ep-2 via hub:1");
    }
}
