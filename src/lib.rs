//! Coordination core for a mesh of cooperating autonomous agents
//!
//! The pieces, leaves first: [`scheinfer`] routes work by size and layer,
//! [`search`] deduplicates queries ahead of a remote/local fallback chain,
//! [`mesh`] holds the agent directory, strategic lock and role rules, and
//! [`node::MeshNode`] ties them together at the request boundary.

pub mod config;
pub mod config_loader;
pub mod delta;
pub mod error;
pub mod inference;
pub mod logger;
pub mod mesh;
pub mod node;
pub mod scheinfer;
pub mod search;
pub mod swarm;
pub mod synthesis;
pub mod utils;

pub use config::NodeConfig;
pub use error::{MeshError, Result};
pub use node::{ActionResponse, MeshNode};
