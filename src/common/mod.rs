//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use protocol::{Command, FetchInstruction, PeerId, PeerRequest, RebalanceInstruction, Reply};
pub use utils::{next_connection_id, prepare_storage_dir, ConnectionId};
