//! Shared controller state behind one exclusive lock
//!
//! Membership, the file index and the replica selector are only ever touched
//! through [`Cluster::lock`], so a precondition check, the mutation it guards
//! and the replies it triggers commit as one step.

use crate::common::Result;
use crate::coordinator::index::FileIndex;
use crate::coordinator::membership::MembershipRegistry;
use crate::coordinator::placement::ReplicaSelector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct ClusterState {
    pub registry: MembershipRegistry,
    pub index: FileIndex,
    pub selector: ReplicaSelector,
}

impl ClusterState {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            registry: MembershipRegistry::new(),
            index: FileIndex::new(replication_factor),
            selector: ReplicaSelector::new(replication_factor),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.index.replication_factor()
    }

    /// Client requests need at least R live peers.
    pub fn ensure_enough_peers(&self) -> Result<()> {
        self.registry.ensure_at_least(self.replication_factor())
    }
}

/// Handle shared by every connection task and background activity
#[derive(Debug)]
pub struct Cluster {
    state: Mutex<ClusterState>,
    replication_factor: usize,
    peer_timeout: Duration,
}

impl Cluster {
    pub fn new(replication_factor: usize, peer_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClusterState::new(replication_factor)),
            replication_factor,
            peer_timeout,
        })
    }

    /// Enter the critical section
    pub async fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().await
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Inactivity deadline of a peer connection; also bounds probe round trips
    pub fn peer_timeout(&self) -> Duration {
        self.peer_timeout
    }

    pub async fn live_peers(&self) -> usize {
        self.lock().await.registry.live_count()
    }
}
