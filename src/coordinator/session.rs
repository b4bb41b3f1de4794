//! Per-connection protocol loop
//!
//! A connection is unidentified until its first command: `JOIN` makes it a
//! storage peer, anything else makes it a client. Client commands are
//! dispatched inline, one at a time. Peer connections split their traffic:
//! probe replies (`LIST ...`, `REBALANCE_COMPLETE`) go straight to the
//! waiting probe without touching the cluster lock, everything else is queued
//! to a per-peer worker that applies it in arrival order. That way a
//! rebalance pass holding the lock can still receive its replies.

use crate::common::{next_connection_id, Command, ConnectionId, Error, PeerId};
use crate::coordinator::cluster::Cluster;
use crate::coordinator::dispatcher;
use crate::coordinator::failure::{self, InactivityDeadline, ReadOutcome};
use crate::coordinator::membership::{PeerLink, ProbeReply};
use crate::coordinator::outbox::{write_loop, Outbox};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum Role {
    Unidentified,
    Client,
    Peer(PeerSession),
}

/// Why a connection's read loop stopped
enum Hangup {
    Closed,
    Expired,
    Failed(Error),
}

impl Hangup {
    fn into_reason(self, peer: PeerId) -> Error {
        match self {
            Hangup::Closed => Error::PeerDisconnected(peer),
            Hangup::Expired => Error::PeerTimeout(peer),
            Hangup::Failed(e) => e,
        }
    }
}

struct PeerSession {
    link: Arc<PeerLink>,
    queue: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl PeerSession {
    fn start(cluster: Arc<Cluster>, link: Arc<PeerLink>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Command>();
        let peer = link.id();
        let worker = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let mut state = cluster.lock().await;
                if let Err(e) = dispatcher::dispatch_peer(&mut state, peer, command) {
                    tracing::warn!("Peer {}: {}", peer, e);
                }
            }
        });
        Self {
            link,
            queue,
            worker,
        }
    }

    /// Route one command; false once the worker is gone.
    fn route(&self, command: Command) -> bool {
        let peer = self.link.id();
        let reply = match command {
            Command::List(files) => ProbeReply::Files(files),
            Command::RebalanceComplete => ProbeReply::RebalanceComplete,
            other => return self.queue.send(other).is_ok(),
        };
        if let Err(reply) = self.link.resolve(reply) {
            tracing::warn!("Peer {} sent unsolicited {:?}", peer, reply);
        }
        true
    }
}

/// Serve one accepted socket until it closes or, for peers, times out.
pub async fn run_session(cluster: Arc<Cluster>, stream: TcpStream) {
    let conn_id = next_connection_id();
    let remote = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    tracing::debug!(conn = conn_id, "Connection from {}", remote);

    let (read_half, write_half) = stream.into_split();
    let (outbox, rx) = Outbox::channel(conn_id);
    let mut writer = tokio::spawn(write_loop(write_half, rx, conn_id));

    let mut lines = BufReader::new(read_half).lines();
    let mut deadline = InactivityDeadline::unarmed();
    let mut role = Role::Unidentified;

    let hangup = loop {
        let line = match deadline.read_line(&mut lines).await {
            Ok(ReadOutcome::Line(line)) => line,
            Ok(ReadOutcome::Closed) => break Hangup::Closed,
            Ok(ReadOutcome::Expired) => break Hangup::Expired,
            Err(e) => {
                let e = Error::from(e);
                if e.is_connectivity() {
                    break Hangup::Failed(e);
                }
                tracing::warn!(conn = conn_id, "Ignoring unreadable line from {}: {}", remote, e);
                continue;
            }
        };
        tracing::debug!(conn = conn_id, "<- {}", line);

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(conn = conn_id, "Ignoring line from {}: {}", remote, e);
                continue;
            }
        };

        if let Role::Peer(peer) = &role {
            if !peer.route(command) {
                break Hangup::Failed(Error::Internal("peer worker stopped".into()));
            }
            continue;
        }

        if let Command::Join(id) = command {
            if matches!(role, Role::Client) {
                tracing::warn!(conn = conn_id, "Client {} sent JOIN; ignored", remote);
                continue;
            }
            match join(&cluster, id, &outbox).await {
                Some(peer) => {
                    deadline.arm(cluster.peer_timeout());
                    role = Role::Peer(peer);
                    continue;
                }
                None => break Hangup::Closed,
            }
        }

        role = Role::Client;
        let mut state = cluster.lock().await;
        if let Err(e) = dispatcher::dispatch_client(&mut state, command, &outbox) {
            tracing::warn!(conn = conn_id, "Client {}: {}", remote, e);
        }
    };
    drop(outbox);

    match role {
        Role::Peer(peer) => {
            let reason = hangup.into_reason(peer.link.id());
            close_peer(&cluster, peer, conn_id, reason).await;
            writer.abort();
        }
        Role::Client | Role::Unidentified => {
            match hangup {
                Hangup::Failed(e) => {
                    tracing::debug!(conn = conn_id, "Client {} dropped: {}", remote, e)
                }
                _ => tracing::debug!(conn = conn_id, "Client {} disconnected", remote),
            }
            // replies owed to in-flight requests get one timeout window to flush
            if tokio::time::timeout(cluster.peer_timeout(), &mut writer)
                .await
                .is_err()
            {
                writer.abort();
            }
        }
    }
}

async fn join(cluster: &Arc<Cluster>, id: PeerId, outbox: &Outbox) -> Option<PeerSession> {
    let link = Arc::new(PeerLink::new(id, outbox.clone()));
    let joined = {
        let mut state = cluster.lock().await;
        dispatcher::join(&mut state, link.clone())
    };
    match joined {
        Ok(()) => Some(PeerSession::start(cluster.clone(), link)),
        Err(e) => {
            tracing::warn!(conn = outbox.conn_id(), "Refusing JOIN: {}", e);
            None
        }
    }
}

/// Let queued traffic land, then evict.
async fn close_peer(cluster: &Cluster, peer: PeerSession, conn_id: ConnectionId, reason: Error) {
    let PeerSession {
        link,
        queue,
        worker,
    } = peer;
    drop(queue);
    if let Err(e) = worker.await {
        tracing::warn!("Worker of peer {} failed: {}", link.id(), e);
    }

    let mut state = cluster.lock().await;
    failure::evict_peer(&mut state, link.id(), conn_id, &reason);
}
