//! Line protocol spoken with storage peers and clients
//!
//! One command per line, tokens separated by spaces. Inbound lines parse into
//! [`Command`]; the controller writes [`Reply`] lines to clients and
//! [`PeerRequest`] lines to storage peers.

use crate::common::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Logical identifier a storage peer announces in `JOIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u32>()
            .map(PeerId)
            .map_err(|_| Error::Protocol(format!("invalid peer id: {}", s)))
    }
}

/// Inbound message from either side of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(PeerId),
    Store { filename: String, size: u64 },
    StoreAck(String),
    Load(String),
    Reload(String),
    Remove(String),
    RemoveAck(String),
    /// Bare `LIST` from a client, or a peer's probe reply with its files.
    List(Vec<String>),
    RebalanceComplete,
}

impl Command {
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Join(_) => "JOIN",
            Command::Store { .. } => "STORE",
            Command::StoreAck(_) => "STORE_ACK",
            Command::Load(_) => "LOAD",
            Command::Reload(_) => "RELOAD",
            Command::Remove(_) => "REMOVE",
            Command::RemoveAck(_) => "REMOVE_ACK",
            Command::List(_) => "LIST",
            Command::RebalanceComplete => "REBALANCE_COMPLETE",
        }
    }
}

fn expect_args<'a, const N: usize>(keyword: &str, args: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(args).map_err(|_| {
        Error::Protocol(format!(
            "{} expects {} argument(s), got {}",
            keyword,
            N,
            args.len()
        ))
    })
}

fn parse_count(token: Option<&str>, what: &str) -> Result<usize> {
    token
        .ok_or_else(|| Error::Protocol(format!("missing {}", what)))?
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid {}", what)))
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens
            .next()
            .ok_or_else(|| Error::Protocol("empty line".into()))?;
        let args: Vec<&str> = tokens.collect();

        let command = match keyword {
            "JOIN" => {
                let [id] = expect_args(keyword, &args)?;
                Command::Join(id.parse()?)
            }
            "STORE" => {
                let [filename, size] = expect_args(keyword, &args)?;
                let size = size
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid file size: {}", size)))?;
                Command::Store {
                    filename: filename.to_string(),
                    size,
                }
            }
            "STORE_ACK" => {
                let [filename] = expect_args(keyword, &args)?;
                Command::StoreAck(filename.to_string())
            }
            "LOAD" => {
                let [filename] = expect_args(keyword, &args)?;
                Command::Load(filename.to_string())
            }
            "RELOAD" => {
                let [filename] = expect_args(keyword, &args)?;
                Command::Reload(filename.to_string())
            }
            "REMOVE" => {
                let [filename] = expect_args(keyword, &args)?;
                Command::Remove(filename.to_string())
            }
            "REMOVE_ACK" => {
                let [filename] = expect_args(keyword, &args)?;
                Command::RemoveAck(filename.to_string())
            }
            "LIST" => Command::List(args.iter().map(|s| s.to_string()).collect()),
            "REBALANCE_COMPLETE" => {
                let [] = expect_args(keyword, &args)?;
                Command::RebalanceComplete
            }
            other => return Err(Error::Protocol(format!("unknown command: {}", other))),
        };

        Ok(command)
    }
}

/// Controller → client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    StoreTo(Vec<PeerId>),
    StoreComplete,
    LoadFrom { peer: PeerId, size: u64 },
    RemoveComplete,
    List(Vec<String>),
    ErrorNotEnoughDstores,
    ErrorFileAlreadyExists,
    ErrorFileDoesNotExist,
    ErrorLoad,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::StoreTo(peers) => {
                write!(f, "STORE_TO")?;
                for peer in peers {
                    write!(f, " {}", peer)?;
                }
                Ok(())
            }
            Reply::StoreComplete => write!(f, "STORE_COMPLETE"),
            Reply::LoadFrom { peer, size } => write!(f, "LOAD_FROM {} {}", peer, size),
            Reply::RemoveComplete => write!(f, "REMOVE_COMPLETE"),
            Reply::List(files) => {
                write!(f, "LIST")?;
                for file in files {
                    write!(f, " {}", file)?;
                }
                Ok(())
            }
            Reply::ErrorNotEnoughDstores => write!(f, "ERROR_NOT_ENOUGH_DSTORES"),
            Reply::ErrorFileAlreadyExists => write!(f, "ERROR_FILE_ALREADY_EXISTS"),
            Reply::ErrorFileDoesNotExist => write!(f, "ERROR_FILE_DOES_NOT_EXIST"),
            Reply::ErrorLoad => write!(f, "ERROR_LOAD"),
        }
    }
}

/// One file a peer must copy in from peers that already hold it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchInstruction {
    pub filename: String,
    pub sources: Vec<PeerId>,
}

/// Combined per-peer rebalance work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceInstruction {
    pub fetch: Vec<FetchInstruction>,
    pub drop: Vec<String>,
}

impl RebalanceInstruction {
    pub fn is_empty(&self) -> bool {
        self.fetch.is_empty() && self.drop.is_empty()
    }
}

/// Controller → storage peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    Remove(String),
    List,
    Rebalance(RebalanceInstruction),
}

impl fmt::Display for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRequest::Remove(filename) => write!(f, "REMOVE {}", filename),
            PeerRequest::List => write!(f, "LIST"),
            PeerRequest::Rebalance(instruction) => {
                write!(f, "REBALANCE {}", instruction.fetch.len())?;
                for fetch in &instruction.fetch {
                    write!(f, " {} {}", fetch.filename, fetch.sources.len())?;
                    for source in &fetch.sources {
                        write!(f, " {}", source)?;
                    }
                }
                write!(f, " {}", instruction.drop.len())?;
                for filename in &instruction.drop {
                    write!(f, " {}", filename)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for PeerRequest {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("LIST") => Ok(PeerRequest::List),
            Some("REMOVE") => {
                let args: Vec<&str> = tokens.collect();
                let [filename] = expect_args("REMOVE", &args)?;
                Ok(PeerRequest::Remove(filename.to_string()))
            }
            Some("REBALANCE") => {
                let mut instruction = RebalanceInstruction::default();
                let fetch_count = parse_count(tokens.next(), "fetch count")?;
                for _ in 0..fetch_count {
                    let filename = tokens
                        .next()
                        .ok_or_else(|| Error::Protocol("missing fetch filename".into()))?;
                    let source_count = parse_count(tokens.next(), "source count")?;
                    let sources = (0..source_count)
                        .map(|_| -> Result<PeerId> {
                            tokens
                                .next()
                                .ok_or_else(|| Error::Protocol("missing source id".into()))?
                                .parse()
                        })
                        .collect::<Result<Vec<PeerId>>>()?;
                    instruction.fetch.push(FetchInstruction {
                        filename: filename.to_string(),
                        sources,
                    });
                }
                let drop_count = parse_count(tokens.next(), "drop count")?;
                for _ in 0..drop_count {
                    let filename = tokens
                        .next()
                        .ok_or_else(|| Error::Protocol("missing drop filename".into()))?;
                    instruction.drop.push(filename.to_string());
                }
                if tokens.next().is_some() {
                    return Err(Error::Protocol("trailing tokens after REBALANCE".into()));
                }
                Ok(PeerRequest::Rebalance(instruction))
            }
            Some(other) => Err(Error::Protocol(format!("unknown peer request: {}", other))),
            None => Err(Error::Protocol("empty line".into())),
        }
    }
}
