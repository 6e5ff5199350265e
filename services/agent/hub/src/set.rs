//! The hubs of one mesh membership

use mesh_wire::ServiceKey;
use std::sync::Arc;

use crate::hub::Hub;
use crate::tunnel::InboundHandler;

/// Every hub of a mesh membership, in bootstrap order
///
/// The first hub is the authoritative directory for service and endpoint
/// lookups.
#[derive(Debug, Default, Clone)]
pub struct HubSet {
    hubs: Vec<Arc<Hub>>,
}

impl HubSet {
    /// Create a set from hubs in bootstrap order
    pub fn new(hubs: Vec<Arc<Hub>>) -> Self {
        Self { hubs }
    }

    /// Directory hub
    pub fn first(&self) -> Option<&Arc<Hub>> {
        self.hubs.first()
    }

    /// Hub with the given address
    pub fn by_address(&self, address: &str) -> Option<&Arc<Hub>> {
        self.hubs.iter().find(|h| h.address() == address)
    }

    /// All hubs
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Hub>> {
        self.hubs.iter()
    }

    /// Addresses of all hubs
    pub fn addresses(&self) -> Vec<String> {
        self.hubs.iter().map(|h| h.address().to_string()).collect()
    }

    /// Number of hubs
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Whether there are no hubs
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }

    /// Start every hub with the same inbound handler
    pub fn start(&self, handler: Arc<dyn InboundHandler>) {
        for hub in &self.hubs {
            hub.start(handler.clone());
        }
    }

    /// Deliver `list` to every hub
    pub fn update_service_list(&self, list: &[ServiceKey]) {
        for hub in &self.hubs {
            hub.update_service_list(list.to_vec());
        }
    }

    /// Heartbeat every hub
    pub fn heartbeat_all(&self) {
        for hub in &self.hubs {
            hub.heartbeat();
        }
    }

    /// Leave every hub
    pub fn leave_all(&self) {
        for hub in &self.hubs {
            hub.leave();
        }
    }

    /// Whether any hub is connected
    pub fn is_connected(&self) -> bool {
        self.hubs.iter().any(|h| h.is_connected())
    }
}
