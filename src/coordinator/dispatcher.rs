//! Request dispatch: protocol commands → index transitions and replies
//!
//! Every function here runs with the cluster lock held and never awaits.
//! Client handlers check, in order, the live peer count and then the file
//! state; admission failures become a typed reply to the client. Errors
//! returned to the caller are protocol errors, which are only logged.

use crate::common::{Command, Error, PeerId, PeerRequest, Reply, Result};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::index::AckOutcome;
use crate::coordinator::membership::PeerLink;
use crate::coordinator::outbox::Outbox;
use std::sync::Arc;

/// Register a storage peer that sent `JOIN`.
pub fn join(state: &mut ClusterState, link: Arc<PeerLink>) -> Result<()> {
    let id = link.id();
    state.registry.join(link)?;
    tracing::info!(
        "Storage peer {} joined ({} live)",
        id,
        state.registry.live_count()
    );
    Ok(())
}

/// Handle one command from a client connection.
pub fn dispatch_client(state: &mut ClusterState, command: Command, client: &Outbox) -> Result<()> {
    let outcome = match command {
        Command::Store { filename, size } => store(state, &filename, size, client),
        Command::Load(filename) => load(state, &filename, client),
        Command::Reload(filename) => reload(state, &filename, client),
        Command::Remove(filename) => remove(state, &filename, client),
        Command::List(args) if args.is_empty() => list(state, client),
        other => {
            return Err(Error::Protocol(format!(
                "unexpected {} from client",
                other.keyword()
            )))
        }
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => match e.to_reply() {
            Some(reply) => {
                tracing::debug!(conn = client.conn_id(), "Request refused: {}", e);
                client.send(reply);
                Ok(())
            }
            None => Err(e),
        },
    }
}

/// Handle ordinary (non-probe) traffic from a storage peer.
pub fn dispatch_peer(state: &mut ClusterState, peer: PeerId, command: Command) -> Result<()> {
    match command {
        Command::StoreAck(filename) => {
            match state.index.store_ack(&filename) {
                Ok(AckOutcome::Completed) => {
                    tracing::info!("Store complete for {}", filename);
                }
                Ok(AckOutcome::Pending { remaining }) => {
                    tracing::debug!(
                        "STORE_ACK from {} for {}, {} remaining",
                        peer,
                        filename,
                        remaining
                    );
                }
                Ok(AckOutcome::Ignored) => {
                    tracing::debug!("Surplus STORE_ACK from {} for {}", peer, filename);
                }
                Err(_) => {
                    tracing::warn!("STORE_ACK from {} for unknown file {}", peer, filename);
                }
            }
            Ok(())
        }
        Command::RemoveAck(filename) => {
            match state.index.remove_ack(&filename) {
                Ok(AckOutcome::Completed) => {
                    tracing::info!("Remove complete for {}", filename);
                }
                Ok(AckOutcome::Pending { remaining }) => {
                    tracing::debug!(
                        "REMOVE_ACK from {} for {}, {} remaining",
                        peer,
                        filename,
                        remaining
                    );
                }
                Ok(AckOutcome::Ignored) => {
                    tracing::debug!("Surplus REMOVE_ACK from {} for {}", peer, filename);
                }
                Err(_) => {
                    tracing::warn!("REMOVE_ACK from {} for unknown file {}", peer, filename);
                }
            }
            Ok(())
        }
        Command::Join(_) => Err(Error::Protocol(format!("peer {} joined twice", peer))),
        other => Err(Error::Protocol(format!(
            "unexpected {} from peer {}",
            other.keyword(),
            peer
        ))),
    }
}

fn store(state: &mut ClusterState, filename: &str, size: u64, client: &Outbox) -> Result<()> {
    state.ensure_enough_peers()?;
    if state.index.contains(filename) {
        return Err(Error::FileAlreadyExists(filename.to_string()));
    }

    let replicas = state.selector.select(&state.registry.ids())?;
    state
        .index
        .admit_store(filename, size, replicas.clone(), client.clone())?;

    tracing::info!("Storing {} ({} bytes) to peers {:?}", filename, size, replicas);
    client.send(Reply::StoreTo(replicas));
    Ok(())
}

fn load(state: &mut ClusterState, filename: &str, client: &Outbox) -> Result<()> {
    state.ensure_enough_peers()?;
    let reply = state.index.load(filename)?;
    tracing::info!("Loading {}: {}", filename, reply);
    client.send(reply);
    Ok(())
}

fn reload(state: &mut ClusterState, filename: &str, client: &Outbox) -> Result<()> {
    match state.index.reload(filename) {
        Ok(reply) => {
            tracing::info!("Reloading {}: {}", filename, reply);
            client.send(reply);
            Ok(())
        }
        Err(e) => {
            tracing::info!("Could not load {}: every replica tried", filename);
            Err(e)
        }
    }
}

fn remove(state: &mut ClusterState, filename: &str, client: &Outbox) -> Result<()> {
    state.ensure_enough_peers()?;
    let replicas = state.index.admit_remove(filename, client.clone())?;

    tracing::info!("Removing {} from peers {:?}", filename, replicas);
    let request = PeerRequest::Remove(filename.to_string());
    for peer in replicas {
        match state.registry.get(peer) {
            Some(link) => {
                link.send(&request);
            }
            None => tracing::warn!("Replica {} of {} is not live; REMOVE not sent", peer, filename),
        }
    }
    Ok(())
}

fn list(state: &mut ClusterState, client: &Outbox) -> Result<()> {
    state.ensure_enough_peers()?;
    client.send(Reply::List(state.index.list()));
    Ok(())
}
