//! Hub connectivity for the mesh agent.
//!
//! An agent registers with every bootstrap hub of its mesh. For each of them
//! this crate keeps a reverse tunnel open so the hub can reach the agent,
//! reports liveness, and keeps the hub's copy of the agent's service list
//! eventually consistent with the local [`ServiceRegistry`].
//!
//! ## Features
//!
//! - **Reverse Tunnel**: explicit retry state machine, serves hub requests over HTTP/2
//! - **Service List Sync**: one push in flight, newest list wins, retried until 201
//! - **Discovery**: endpoint and service lookups that never fail
//! - **Hub Set**: fan-out to every hub, first hub as directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hub;
pub mod registry;
pub mod set;
mod sync;
pub mod tunnel;

#[cfg(test)]
mod testing;

// Re-export main types
pub use hub::{Hub, HubConfig, HubState};
pub use registry::ServiceRegistry;
pub use set::HubSet;
pub use tunnel::{serve_tunnel, InboundHandler, TunnelState};
