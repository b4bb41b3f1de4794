//! Controller implementation
//!
//! The controller is responsible for:
//! - Membership of storage peers (join, timeout, disconnect)
//! - Placement decisions (R distinct live peers per file)
//! - File index and per-file lifecycle (store, load, remove)
//! - Periodic rebalancing of replicas across peers

pub mod cluster;
pub mod dispatcher;
pub mod failure;
pub mod index;
pub mod membership;
pub mod outbox;
pub mod placement;
pub mod rebalance;
pub mod server;
pub mod session;

pub use server::Controller;
