//! Trust store, multiplexed TLS hub sessions and agent diagnostics.
//!
//! This crate provides everything the agent needs to talk to a hub at the
//! transport level: parsing of the mesh CA and agent credentials, a
//! lazily-dialled HTTP/2 session per hub address exposing single
//! request/response calls and CONNECT-style tunnels, and the bounded log and
//! mesh-error sinks that connection problems are reported to.
//!
//! ## Features
//!
//! - **Trust Store**: CA, certificate and key parsing that never fails startup
//! - **Hub Session**: one TLS connection, many independent HTTP/2 streams
//! - **Tunnels**: extended CONNECT upgraded into raw byte streams
//! - **Diagnostics**: bounded agent log and mesh error list
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::{Diagnostics, HubSession, RpcChannel, TrustStore};
//! use std::sync::Arc;
//!
//! # async fn example(ca: &str, cert: &str, key: &str) {
//! let diagnostics = Arc::new(Diagnostics::new());
//! let trust = TrustStore::load(Some(ca), Some(cert), Some(key), &diagnostics);
//! let session = HubSession::new("hub.example.com:8888", trust.client_config(), diagnostics);
//!
//! let request = mesh_wire::get("/api/endpoints").unwrap();
//! if let Some(response) = session.call(request).await {
//!     println!("hub answered {}", response.status());
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod diagnostics;
pub mod identity;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use channel::{ChannelError, RpcChannel, SessionEvent, Tunnel, TunnelStream};
pub use diagnostics::{Diagnostics, LogEntry, LogLevel, MeshErrorEntry, LOG_CAPACITY};
pub use identity::{parse_certificates, parse_private_key, IdentityError, TrustStore};
pub use session::HubSession;
pub use transport::{connect_tcp, connect_tls, server_name};
