//! Router and routing decision logic

use crate::address::normalize_bootstraps;
use crate::directory::Directory;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What a local connection wants to reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Transport protocol
    pub protocol: String,
    /// Service name
    pub service: String,
    /// Pinned endpoint id, skipping service resolution
    pub endpoint: Option<String>,
}

impl RouteTarget {
    /// Create a target resolved through the directory
    pub fn service(protocol: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            service: service.into(),
            endpoint: None,
        }
    }

    /// Pin the target to one endpoint
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// Selected endpoint and the hub to reach it through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Endpoint id hosting the service
    pub endpoint: String,
    /// Hub address shared by this agent and the endpoint
    pub hub: String,
}

/// Routing decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Open a tunnel along this route
    Forward(Route),
    /// Refuse the connection
    Drop(DropReason),
}

/// Reason for refusing a connection
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// No endpoint advertises the service
    #[error("No endpoint found for {0}")]
    NoEndpoint(String),
    /// The endpoint shares no hub with this agent
    #[error("No route to endpoint {0}")]
    NoRoute(String),
}

/// Router statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Number of routing decisions made
    pub decisions_made: u64,
    /// Number of connections forwarded
    pub forwarded: u64,
    /// Number of connections refused
    pub dropped: u64,
}

/// Endpoint and hub selection against one directory
///
/// The first endpoint advertising the service wins, then the first of its
/// hubs that is also one of ours.
pub struct Router {
    directory: Option<Arc<dyn Directory>>,
    local_hubs: Vec<String>,
    decisions: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl Router {
    /// Create a router; `local_hubs` are normalized on the way in
    pub fn new<I, S>(directory: Option<Arc<dyn Directory>>, local_hubs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            directory,
            local_hubs: normalize_bootstraps(local_hubs),
            decisions: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// First endpoint the directory lists for `protocol/service`
    pub async fn select_endpoint(&self, protocol: &str, service: &str) -> Option<String> {
        let info = self.directory.as_ref()?.find_service(protocol, service).await?;
        info.endpoints.into_iter().next().map(|e| e.id)
    }

    /// First hub of `endpoint` that this agent also uses
    pub async fn select_hub(&self, endpoint: &str) -> Option<String> {
        let info = self.directory.as_ref()?.find_endpoint(endpoint).await?;
        debug!("Endpoint {} is reachable via {:?}", endpoint, info.hubs);
        info.hubs
            .into_iter()
            .find(|hub| self.local_hubs.iter().any(|local| local == hub))
    }

    /// Make a routing decision for a connection towards `target`
    pub async fn resolve(&self, target: &RouteTarget) -> RoutingDecision {
        self.decisions.fetch_add(1, Ordering::Relaxed);

        let decision = self.decide(target).await;
        match &decision {
            RoutingDecision::Forward(_) => self.forwarded.fetch_add(1, Ordering::Relaxed),
            RoutingDecision::Drop(_) => self.dropped.fetch_add(1, Ordering::Relaxed),
        };
        decision
    }

    async fn decide(&self, target: &RouteTarget) -> RoutingDecision {
        let endpoint = match &target.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => match self.select_endpoint(&target.protocol, &target.service).await {
                Some(endpoint) => endpoint,
                None => return RoutingDecision::Drop(DropReason::NoEndpoint(target.service.clone())),
            },
        };

        match self.select_hub(&endpoint).await {
            Some(hub) => RoutingDecision::Forward(Route { endpoint, hub }),
            None => RoutingDecision::Drop(DropReason::NoRoute(endpoint)),
        }
    }

    /// Get routing statistics
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            decisions_made: self.decisions.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("has_directory", &self.directory.is_some())
            .field("local_hubs", &self.local_hubs)
            .finish()
    }
}
