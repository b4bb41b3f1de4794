//! Membership registry of live storage peers
//!
//! A peer is live from its `JOIN` until its connection closes or its
//! inactivity deadline expires. Each live peer is reachable through a
//! [`PeerLink`], which also correlates controller-issued probes (`LIST`,
//! `REBALANCE`) with the single reply line each one expects.

use crate::common::{ConnectionId, Error, PeerId, PeerRequest, Result};
use crate::coordinator::outbox::Outbox;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Which reply an outstanding probe waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    List,
    Rebalance,
}

/// Reply line that resolves a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Files(Vec<String>),
    RebalanceComplete,
}

impl ProbeReply {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeReply::Files(_) => ProbeKind::List,
            ProbeReply::RebalanceComplete => ProbeKind::Rebalance,
        }
    }
}

struct PendingProbe {
    kind: ProbeKind,
    tx: oneshot::Sender<ProbeReply>,
}

/// Connection handle of one live storage peer
pub struct PeerLink {
    id: PeerId,
    outbox: Outbox,
    pending: Mutex<Option<PendingProbe>>,
}

impl PeerLink {
    pub fn new(id: PeerId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            pending: Mutex::new(None),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.outbox.conn_id()
    }

    pub fn send(&self, request: &PeerRequest) -> bool {
        self.outbox.send(request)
    }

    /// Send a probe and wait, bounded by `timeout`, for its reply.
    ///
    /// At most one probe is outstanding per peer. A probe that times out
    /// releases its slot so a late reply is discarded instead of answering
    /// the next probe.
    pub async fn probe(&self, request: PeerRequest, timeout: Duration) -> Result<ProbeReply> {
        let kind = match request {
            PeerRequest::List => ProbeKind::List,
            PeerRequest::Rebalance(_) => ProbeKind::Rebalance,
            PeerRequest::Remove(_) => {
                return Err(Error::Internal("REMOVE expects no probe reply".into()))
            }
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_some() {
                return Err(Error::Internal(format!(
                    "peer {} already has a probe outstanding",
                    self.id
                )));
            }
            *pending = Some(PendingProbe { kind, tx });
        }

        if !self.send(&request) {
            self.cancel_probe();
            return Err(Error::PeerDisconnected(self.id));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::PeerDisconnected(self.id)),
            Err(_) => {
                self.cancel_probe();
                Err(Error::PeerTimeout(self.id))
            }
        }
    }

    /// Hand a reply line to the outstanding probe of the same kind.
    ///
    /// Returns the reply back when nothing is waiting for it.
    pub fn resolve(&self, reply: ProbeReply) -> std::result::Result<(), ProbeReply> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.take() {
            Some(probe) if probe.kind == reply.kind() => {
                // receiver gone means the prober already gave up
                let _ = probe.tx.send(reply);
                Ok(())
            }
            other => {
                *pending = other;
                Err(reply)
            }
        }
    }

    #[cfg(test)]
    fn has_pending_probe(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn cancel_probe(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Fail any outstanding probe; called on eviction.
    pub fn close(&self) {
        self.cancel_probe();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("conn_id", &self.conn_id())
            .finish()
    }
}

/// Live storage peers, iterated in ascending id order.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    peers: BTreeMap<PeerId, Arc<PeerLink>>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. An id that is already live is refused.
    pub fn join(&mut self, link: Arc<PeerLink>) -> Result<()> {
        if self.peers.contains_key(&link.id()) {
            return Err(Error::PeerAlreadyJoined(link.id()));
        }
        self.peers.insert(link.id(), link);
        Ok(())
    }

    /// Drop a peer, but only if `conn_id` is still the connection it joined on.
    pub fn leave(&mut self, id: PeerId, conn_id: ConnectionId) -> Option<Arc<PeerLink>> {
        match self.peers.get(&id) {
            Some(link) if link.conn_id() == conn_id => self.peers.remove(&id),
            _ => None,
        }
    }

    pub fn get(&self, id: PeerId) -> Option<&Arc<PeerLink>> {
        self.peers.get(&id)
    }

    pub fn is_live(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.peers.len()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn links(&self) -> impl Iterator<Item = &Arc<PeerLink>> {
        self.peers.values()
    }

    /// Gate for client-facing requests
    pub fn ensure_at_least(&self, needed: usize) -> Result<()> {
        if self.peers.len() < needed {
            return Err(Error::NotEnoughPeers {
                needed,
                available: self.peers.len(),
            });
        }
        Ok(())
    }
}
