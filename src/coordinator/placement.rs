//! Replica selection for newly admitted files
//!
//! Picks R distinct live peers uniformly at random. The caller has already
//! checked that enough peers are live; selection still refuses a short pool
//! rather than handing out an undersized replica set.

use crate::common::{Error, PeerId, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Chooses replica sets of a fixed size.
#[derive(Debug, Clone)]
pub struct ReplicaSelector {
    /// Number of replicas per file
    replicas: usize,
}

impl ReplicaSelector {
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }

    /// Select replicas from `live` using the thread-local RNG.
    pub fn select(&self, live: &[PeerId]) -> Result<Vec<PeerId>> {
        self.select_with(live, &mut rand::thread_rng())
    }

    /// Select replicas from `live` with an explicit RNG.
    pub fn select_with<R: Rng + ?Sized>(&self, live: &[PeerId], rng: &mut R) -> Result<Vec<PeerId>> {
        let mut candidates = live.to_vec();
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.len() < self.replicas {
            return Err(Error::NotEnoughPeers {
                needed: self.replicas,
                available: candidates.len(),
            });
        }

        Ok(candidates
            .choose_multiple(rng, self.replicas)
            .copied()
            .collect())
    }
}
