//! Hub protocol records, request builders and path matching for the mesh agent.
//!
//! Everything an agent exchanges with a hub is a JSON-bodied HTTP message
//! carried over a multiplexed TLS session. This crate holds the shapes of
//! those bodies, the helpers that build requests and responses around them,
//! and the path patterns used to route the requests a hub pushes back down a
//! reverse tunnel.
//!
//! ## Wire Paths
//!
//! ```text
//! CONNECT /api/endpoints/{agent}                        reverse tunnel
//! POST    /api/status                                   heartbeat {name}
//! POST    /api/services                                 [{name, protocol}]
//! GET     /api/services/{proto}/{svc}                   service + endpoints
//! GET     /api/endpoints/{ep}                           {id, hubs}
//! CONNECT /api/endpoints/{ep}/services/{proto}/{svc}    tunnel to a remote service
//! *       /api/forward/{ep}/...                         relayed control API
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod path;
pub mod records;

// Re-export main types
pub use error::WireError;
pub use message::{
    decode_json, empty_response, error_response, get, json_request, json_response, post_services,
    post_status, tunnel, TUNNEL_PROTOCOL,
};
pub use path::{paths, PathParams, PathPattern};
pub use records::{
    EndpointInfo, ListenAddr, PortRecord, PortSpec, PortTarget, ServiceInfo, ServiceKey,
    ServiceRecord, ServiceTarget, StatusReport,
};
