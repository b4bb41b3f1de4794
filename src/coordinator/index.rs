//! File index: filename → [`DistributedFile`]
//!
//! Lifecycle of an entry:
//!
//! ```text
//! admit STORE ─▶ StoreInProgress ──R acks──▶ StoreComplete
//!                                                 │ admit REMOVE
//!                                                 ▼
//!                     (deleted) ◀──R acks── RemoveInProgress
//! ```
//!
//! In-progress entries are hidden from LIST/LOAD/REMOVE and are deleted when
//! one of their replicas is evicted. The index is not thread-safe on its own;
//! it lives inside the cluster's single critical section.

use crate::common::{Error, PeerId, Reply, Result};
use crate::coordinator::outbox::Outbox;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    StoreInProgress,
    StoreComplete,
    RemoveInProgress,
    RemoveComplete,
}

impl FileState {
    /// Visible to LIST and LOAD, removable
    pub fn is_stable(&self) -> bool {
        matches!(self, FileState::StoreComplete)
    }

    /// Waiting for a quorum of acknowledgements
    pub fn is_in_progress(&self) -> bool {
        matches!(self, FileState::StoreInProgress | FileState::RemoveInProgress)
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileState::StoreInProgress => write!(f, "store in progress"),
            FileState::StoreComplete => write!(f, "store complete"),
            FileState::RemoveInProgress => write!(f, "remove in progress"),
            FileState::RemoveComplete => write!(f, "remove complete"),
        }
    }
}

/// What an acknowledgement did to its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Counted; `remaining` more needed
    Pending { remaining: usize },
    /// Reached quorum and notified the client
    Completed,
    /// File is not waiting for this kind of acknowledgement
    Ignored,
}

#[derive(Debug)]
pub struct DistributedFile {
    filename: String,
    size: u64,
    replicas: Vec<PeerId>,
    state: FileState,
    acks: usize,
    reload_cursor: usize,
    requester: Option<Outbox>,
    remover: Option<Outbox>,
}

impl DistributedFile {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn replicas(&self) -> &[PeerId] {
        &self.replicas
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn acks(&self) -> usize {
        self.acks
    }

    pub fn reload_cursor(&self) -> usize {
        self.reload_cursor
    }

    fn load_reply(&self) -> Option<Reply> {
        self.replicas
            .get(self.reload_cursor)
            .map(|peer| Reply::LoadFrom {
                peer: *peer,
                size: self.size,
            })
    }
}

#[derive(Debug)]
pub struct FileIndex {
    files: BTreeMap<String, DistributedFile>,
    replication_factor: usize,
}

impl FileIndex {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            replication_factor,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn get(&self, filename: &str) -> Option<&DistributedFile> {
        self.files.get(filename)
    }

    /// Present in any state, including in-progress ones
    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Create a `StoreInProgress` entry for a new file.
    pub fn admit_store(
        &mut self,
        filename: &str,
        size: u64,
        replicas: Vec<PeerId>,
        requester: Outbox,
    ) -> Result<&DistributedFile> {
        if self.files.contains_key(filename) {
            return Err(Error::FileAlreadyExists(filename.to_string()));
        }
        if replicas.len() != self.replication_factor {
            return Err(Error::Internal(format!(
                "replica set for {} has {} members, expected {}",
                filename,
                replicas.len(),
                self.replication_factor
            )));
        }

        let file = DistributedFile {
            filename: filename.to_string(),
            size,
            replicas,
            state: FileState::StoreInProgress,
            acks: 0,
            reload_cursor: 0,
            requester: Some(requester),
            remover: None,
        };
        Ok(self.files.entry(filename.to_string()).or_insert(file))
    }

    /// Count a `STORE_ACK`; at quorum the file becomes stable and its
    /// requester gets `STORE_COMPLETE`, exactly once.
    pub fn store_ack(&mut self, filename: &str) -> Result<AckOutcome> {
        let quorum = self.replication_factor;
        let file = self
            .files
            .get_mut(filename)
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))?;

        if file.state != FileState::StoreInProgress {
            return Ok(AckOutcome::Ignored);
        }

        file.acks += 1;
        if file.acks < quorum {
            return Ok(AckOutcome::Pending {
                remaining: quorum - file.acks,
            });
        }

        file.state = FileState::StoreComplete;
        if let Some(requester) = file.requester.take() {
            requester.send(Reply::StoreComplete);
        }
        Ok(AckOutcome::Completed)
    }

    /// Start removing a stable file. Returns the replicas to send `REMOVE` to.
    pub fn admit_remove(&mut self, filename: &str, remover: Outbox) -> Result<Vec<PeerId>> {
        let file = self
            .files
            .get_mut(filename)
            .filter(|f| f.state.is_stable())
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))?;

        file.state = FileState::RemoveInProgress;
        file.acks = 0;
        file.remover = Some(remover);
        Ok(file.replicas.clone())
    }

    /// Count a `REMOVE_ACK`; at quorum the remover gets `REMOVE_COMPLETE`
    /// and the entry is deleted.
    pub fn remove_ack(&mut self, filename: &str) -> Result<AckOutcome> {
        let quorum = self.replication_factor;
        let file = self
            .files
            .get_mut(filename)
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))?;

        if file.state != FileState::RemoveInProgress {
            return Ok(AckOutcome::Ignored);
        }

        file.acks += 1;
        if file.acks < quorum {
            return Ok(AckOutcome::Pending {
                remaining: quorum - file.acks,
            });
        }

        file.state = FileState::RemoveComplete;
        if let Some(remover) = file.remover.take() {
            remover.send(Reply::RemoveComplete);
        }
        self.files.remove(filename);
        Ok(AckOutcome::Completed)
    }

    /// Reset the reload cursor and answer with the first replica.
    pub fn load(&mut self, filename: &str) -> Result<Reply> {
        let file = self
            .files
            .get_mut(filename)
            .filter(|f| f.state.is_stable())
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))?;

        file.reload_cursor = 0;
        file.load_reply()
            .ok_or_else(|| Error::LoadExhausted(filename.to_string()))
    }

    /// Advance to the next replica; once every replica was offered the
    /// cursor stays exhausted until the next LOAD.
    pub fn reload(&mut self, filename: &str) -> Result<Reply> {
        let file = self
            .files
            .get_mut(filename)
            .ok_or_else(|| Error::LoadExhausted(filename.to_string()))?;

        file.reload_cursor = (file.reload_cursor + 1).min(file.replicas.len());
        file.load_reply()
            .ok_or_else(|| Error::LoadExhausted(filename.to_string()))
    }

    /// Stable filenames, in name order
    pub fn list(&self) -> Vec<String> {
        self.files
            .values()
            .filter(|f| f.state.is_stable())
            .map(|f| f.filename.clone())
            .collect()
    }

    pub fn stable_files(&self) -> BTreeSet<String> {
        self.list().into_iter().collect()
    }

    pub fn in_progress_files(&self) -> BTreeSet<String> {
        self.files
            .values()
            .filter(|f| f.state.is_in_progress())
            .map(|f| f.filename.clone())
            .collect()
    }

    /// Delete in-progress entries replicated on `peer`; their quorum can no
    /// longer complete. Stable entries are left for the rebalancer.
    pub fn purge_in_progress(&mut self, peer: PeerId) -> Vec<String> {
        self.purge_where(|f| f.state.is_in_progress() && f.replicas.contains(&peer))
    }

    /// Delete in-progress entries whose replica set names any non-live peer.
    pub fn purge_unreachable(&mut self, is_live: impl Fn(PeerId) -> bool) -> Vec<String> {
        self.purge_where(|f| f.state.is_in_progress() && !f.replicas.iter().all(|p| is_live(*p)))
    }

    fn purge_where(&mut self, doomed: impl Fn(&DistributedFile) -> bool) -> Vec<String> {
        let purged: Vec<String> = self
            .files
            .values()
            .filter(|f| doomed(f))
            .map(|f| f.filename.clone())
            .collect();
        for filename in &purged {
            self.files.remove(filename);
        }
        purged
    }

    /// Point a stable file at a new full replica set.
    pub fn reassign(&mut self, filename: &str, replicas: Vec<PeerId>) -> bool {
        let quorum = self.replication_factor;
        match self.files.get_mut(filename) {
            Some(file) if file.state.is_stable() && replicas.len() == quorum => {
                if file.replicas != replicas {
                    file.replicas = replicas;
                    file.reload_cursor = 0;
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Drop a stable entry no peer holds any more.
    pub fn forget(&mut self, filename: &str) -> Option<DistributedFile> {
        if self.files.get(filename)?.state.is_stable() {
            return self.files.remove(filename);
        }
        None
    }
}
