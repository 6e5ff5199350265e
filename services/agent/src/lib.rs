//! Mesh agent: membership of one service mesh.
//!
//! An agent registers with the bootstrap hubs of its mesh, publishes the
//! services it hosts, opens local ports that lead to services hosted by other
//! agents, and proxies traffic both ways through TLS tunnels.
//!
//! ## Example
//!
//! ```no_run
//! use mesh_agent::{Agent, AgentOptions, MeshConfig};
//! use mesh_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MeshConfig::load_from_file("mesh.yaml")?;
//! let agent = Agent::join(config, Arc::new(MemoryStore::new()), AgentOptions::default()).await;
//!
//! agent.publish_service("tcp", "db", "127.0.0.1", 5432).await?;
//! agent.leave();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod api;
pub mod config;

#[cfg(test)]
mod testing;

// Re-export main types
pub use agent::{
    Agent, AgentError, AgentOptions, AgentStatus, ChannelFactory, HubStatus, TlsChannels,
};
pub use api::ApiServer;
pub use config::{AgentIdentity, ConfigError, MeshConfig};
