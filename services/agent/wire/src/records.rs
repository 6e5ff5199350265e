//! JSON records exchanged with hubs and stored by the agent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Routing key of a published service, the only part hubs ever see
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Service name
    pub name: String,
    /// Transport protocol, e.g. `tcp`
    pub protocol: String,
}

impl ServiceKey {
    /// Create a new service key
    pub fn new(protocol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
        }
    }
}

/// Locally hosted service as persisted by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service name
    pub name: String,
    /// Transport protocol
    pub protocol: String,
    /// Host the service listens on
    pub host: String,
    /// Port the service listens on
    pub port: u16,
}

impl ServiceRecord {
    /// The routing key of this record
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.protocol, &self.name)
    }
}

/// Body of `POST /api/services/{proto}/{svc}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Host the service listens on
    pub host: String,
    /// Port the service listens on
    pub port: u16,
}

/// Where connections accepted on a local port are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTarget {
    /// Name of the service to reach
    pub service: String,
    /// Pinned endpoint id; resolved through the hub directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Body of `POST /api/ports/{ip}/{proto}/{port}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Target of the port
    pub target: PortTarget,
}

/// Listen address of a local port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenAddr {
    /// IP address to bind
    pub ip: String,
    /// Port number to bind
    pub port: u16,
}

/// Locally opened port as persisted by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    /// Transport protocol
    pub protocol: String,
    /// Bound address
    pub listen: ListenAddr,
    /// Forwarding target
    pub target: PortTarget,
}

/// Remote agent as described by a hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint id
    pub id: String,
    /// Hub addresses through which the endpoint is reachable
    #[serde(default)]
    pub hubs: Vec<String>,
    /// Any further attributes the hub reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote service as described by a hub directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Transport protocol
    pub protocol: String,
    /// Endpoints hosting the service, in hub order
    #[serde(default)]
    pub endpoints: Vec<EndpointInfo>,
    /// Any further attributes the hub reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of the heartbeat `POST /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Agent name
    pub name: String,
}
