//! # minidfs
//!
//! Controller for a small replicated file store:
//! - Storage peers join over TCP and hold whole-file replicas
//! - Clients store, load, remove and list files through the controller
//! - Each file is placed on R distinct peers
//! - Dead peers are detected by inactivity and periodically repaired around
//!
//! ## Architecture
//!
//! ```text
//!              ┌───────────────────────────────┐
//!   clients ──▶│          Controller           │
//!   (line     │  - membership + failure det.  │
//!   protocol) │  - file index + lifecycle     │
//!              │  - periodic rebalancer        │
//!              └───────────┬───────────────────┘
//!                          │ JOIN / ACKs / LIST
//!        ┌─────────────────┼──────────────────┐
//!        │                 │                  │
//!   ┌────▼─────┐     ┌─────▼────┐       ┌─────▼────┐
//!   │ Peer 1   │     │ Peer 2   │       │ Peer 3   │
//!   │ (files)  │     │ (files)  │       │ (files)  │
//!   └──────────┘     └──────────┘       └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # port, replication factor, peer timeout (ms), rebalance period (s)
//! minidfs-controller 4322 2 10000 7
//!
//! # Same thing from the environment
//! DFS_PORT=4322 DFS_REPLICATION_FACTOR=2 minidfs-controller
//! ```

pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{ControllerConfig as Config, Error, Result};
pub use coordinator::Controller;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
