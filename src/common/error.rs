//! Error types for minidfs

use crate::common::protocol::{PeerId, Reply};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("Malformed message: {0}")]
    Protocol(String),

    // === Admission Errors ===
    #[error("Not enough storage peers: need {needed}, have {available}")]
    NotEnoughPeers { needed: usize, available: usize },

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File does not exist: {0}")]
    FileDoesNotExist(String),

    #[error("No replica left to load {0} from")]
    LoadExhausted(String),

    // === Network Errors ===
    #[error("Peer {0} timed out")]
    PeerTimeout(PeerId),

    #[error("Peer {0} disconnected")]
    PeerDisconnected(PeerId),

    #[error("Peer {0} is already registered")]
    PeerAlreadyJoined(PeerId),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Does this error mean the remote end is gone?
    ///
    /// Undecodable input is not: the connection is still usable.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput
            ),
            Error::PeerTimeout(_) | Error::PeerDisconnected(_) => true,
            _ => false,
        }
    }

    /// Reply line surfaced to a client for admission errors.
    ///
    /// Everything else is connection-local and only logged.
    pub fn to_reply(&self) -> Option<Reply> {
        match self {
            Error::NotEnoughPeers { .. } => Some(Reply::ErrorNotEnoughDstores),
            Error::FileAlreadyExists(_) => Some(Reply::ErrorFileAlreadyExists),
            Error::FileDoesNotExist(_) => Some(Reply::ErrorFileDoesNotExist),
            Error::LoadExhausted(_) => Some(Reply::ErrorLoad),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
