//! Traffic proxying and the control API of the mesh agent.
//!
//! Two data paths cross the agent. Inbound, a hub opens a tunnel for one of
//! the services this agent publishes and the tunnel is spliced to the local
//! service. Outbound, a local client connects to a port this agent opened and
//! the connection is spliced through a tunnel to the endpoint hosting the
//! target service. Requests a hub pushes that are not service tunnels go to
//! the control API, which manages published services and open ports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod dispatch;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod ports;

#[cfg(test)]
mod testing;

// Re-export main types
pub use control::ControlApi;
pub use dispatch::HubRequestRouter;
pub use error::ProxyError;
pub use inbound::{splice_local, InboundProxy};
pub use outbound::OutboundProxy;
pub use ports::{PortTable, SUPPORTED_PROTOCOL};
