//! Endpoint and hub selection for traffic leaving the agent.
//!
//! A local connection names a service; the mesh needs to know which remote
//! endpoint hosts it and which hub both sides share. This crate asks a hub
//! directory for those facts and turns the answers into a routing decision.
//! Directory answers are never cached beyond a single decision.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod directory;
pub mod router;

pub use address::*;
pub use directory::*;
pub use router::*;
