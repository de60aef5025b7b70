//! Petition Node - host for the single-page petition site
//!
//! Serves the page's state over HTTP and a WebSocket feed, and plugs concrete
//! collaborators into the core gate and store.
//!
//! # Architecture
//!
//! - **Config**: environment-driven; remote mode needs both store values
//! - **Storage**: RocksDB-backed local cache
//! - **Remote**: HTTP client for the shared signature table
//! - **Session**: identity provider fed by the page's login handoff
//! - **Client**: per-visitor sessions keyed by a header token
//! - **Shell**: notification slot and intro overlay timers
//! - **API / WS**: HTTP endpoints and live feed
//!
//! # Example
//!
//! ```no_run
//! use petition_node::{PetitionConfig, PetitionNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PetitionConfig::from_env()?;
//!     let node = PetitionNode::new(config).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod remote;
pub mod session;
pub mod shell;
pub mod storage;
pub mod ws;

pub use client::{ClientRegistry, ClientSession, SESSION_HEADER};
pub use config::{PetitionConfig, RemoteConfig};
pub use error::{Error, Result};
pub use node::{PetitionNode, PetitionState};
pub use remote::RestRowStore;
pub use session::SessionProvider;
pub use storage::Storage;
