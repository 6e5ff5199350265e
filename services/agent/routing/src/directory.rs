//! Source of remote service and endpoint facts

use async_trait::async_trait;
use mesh_wire::{EndpointInfo, ServiceInfo};

/// Read-only view of a hub's mesh directory
///
/// Lookups never fail: anything the directory cannot answer is `None`.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Service `protocol/name` together with the endpoints hosting it
    async fn find_service(&self, protocol: &str, name: &str) -> Option<ServiceInfo>;

    /// Endpoint `ep` together with the hubs it is reachable through
    async fn find_endpoint(&self, ep: &str) -> Option<EndpointInfo>;
}
