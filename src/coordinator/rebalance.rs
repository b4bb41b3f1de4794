//! Periodic rebalancing of file copies across storage peers
//!
//! A pass runs with the cluster lock held from start to finish:
//!
//! 1. Probe every live peer with `LIST` for the files it holds.
//! 2. Normalize replication: give under-replicated files copies on peers that
//!    lack them (peers in id order) and trim over-replicated ones from their
//!    most loaded holders.
//! 3. Balance load: move one file at a time from the most to the least loaded
//!    peer until their counts differ by at most one.
//! 4. Diff each peer's holdings against its target into fetch/drop work.
//! 5. Send each peer one `REBALANCE` line and wait for `REBALANCE_COMPLETE`.
//!
//! Copies are only redistributed. A file nobody holds any more cannot be
//! brought back; its index entry is dropped.

use crate::common::{FetchInstruction, PeerId, PeerRequest, RebalanceInstruction};
use crate::coordinator::cluster::Cluster;
use crate::coordinator::membership::{PeerLink, ProbeReply};
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Target layout computed from observed holdings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalancePlan {
    /// Work per peer; peers with nothing to do are absent
    pub instructions: BTreeMap<PeerId, RebalanceInstruction>,
    /// Final holders of every observed file, in peer order
    pub assignment: BTreeMap<String, Vec<PeerId>>,
}

impl RebalancePlan {
    pub fn is_noop(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    pub peers_probed: usize,
    pub probe_failures: usize,
    pub stale_purged: usize,
    pub orphans_dropped: usize,
    pub instructions_sent: usize,
    pub missed_acks: usize,
    pub files_reassigned: usize,
    pub files_lost: usize,
}

/// Compute the target layout for `holdings` (peer → files it reports).
pub fn plan(holdings: &BTreeMap<PeerId, Vec<String>>, replication_factor: usize) -> RebalancePlan {
    let original: Vec<(PeerId, Vec<String>)> = holdings
        .iter()
        .map(|(peer, files)| (*peer, dedup(files)))
        .collect();
    let files: BTreeSet<String> = original
        .iter()
        .flat_map(|(_, held)| held.iter().cloned())
        .collect();

    let mut desired = original.clone();
    normalize_replication(&mut desired, &files, replication_factor);
    balance_load(&mut desired);

    let mut plan = RebalancePlan::default();
    for (peer, target) in &desired {
        for file in target {
            plan.assignment.entry(file.clone()).or_default().push(*peer);
        }
    }

    for ((peer, held), (_, target)) in original.iter().zip(&desired) {
        let mut instruction = RebalanceInstruction::default();
        for file in target.iter().filter(|f| !held.contains(f)) {
            let sources = original
                .iter()
                .filter(|(_, other)| other.contains(file))
                .map(|(source, _)| *source)
                .collect();
            instruction.fetch.push(FetchInstruction {
                filename: file.clone(),
                sources,
            });
        }
        instruction.drop = held
            .iter()
            .filter(|f| !target.contains(f))
            .cloned()
            .collect();

        if !instruction.is_empty() {
            plan.instructions.insert(*peer, instruction);
        }
    }

    plan
}

fn dedup(files: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    files
        .iter()
        .filter(|f| seen.insert(f.as_str()))
        .cloned()
        .collect()
}

fn normalize_replication(
    desired: &mut [(PeerId, Vec<String>)],
    files: &BTreeSet<String>,
    replication_factor: usize,
) {
    for file in files {
        let mut count = desired.iter().filter(|(_, l)| l.contains(file)).count();

        for (_, list) in desired.iter_mut() {
            if count >= replication_factor {
                break;
            }
            if !list.contains(file) {
                list.push(file.clone());
                count += 1;
            }
        }

        while count > replication_factor {
            let Some(holder) = most_loaded(desired, |list| list.contains(file)) else {
                break;
            };
            desired[holder].1.retain(|f| f != file);
            count -= 1;
        }
    }
}

fn balance_load(desired: &mut [(PeerId, Vec<String>)]) {
    loop {
        let (Some(most), Some(least)) = (
            most_loaded(desired, |_| true),
            least_loaded(desired),
        ) else {
            return;
        };
        if desired[most].1.len() <= desired[least].1.len() + 1 {
            return;
        }

        let Some(pos) = desired[most]
            .1
            .iter()
            .position(|f| !desired[least].1.contains(f))
        else {
            return;
        };
        let file = desired[most].1.remove(pos);
        desired[least].1.push(file);
    }
}

/// First peer (in order) with the largest list among those matching `filter`
fn most_loaded(
    desired: &[(PeerId, Vec<String>)],
    filter: impl Fn(&[String]) -> bool,
) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, (_, list)) in desired.iter().enumerate() {
        if !filter(list) {
            continue;
        }
        if best.map_or(true, |b| list.len() > desired[b].1.len()) {
            best = Some(i);
        }
    }
    best
}

/// First peer (in order) with the smallest list
fn least_loaded(desired: &[(PeerId, Vec<String>)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, (_, list)) in desired.iter().enumerate() {
        if best.map_or(true, |b| list.len() < desired[b].1.len()) {
            best = Some(i);
        }
    }
    best
}

/// Run one stop-the-world pass.
pub async fn run_pass(cluster: &Cluster) -> RebalanceReport {
    let mut guard = cluster.lock().await;
    let state = &mut *guard;
    let timeout = cluster.peer_timeout();
    let mut report = RebalanceReport::default();

    let registry = &state.registry;
    let stale = state.index.purge_unreachable(|peer| registry.is_live(peer));
    if !stale.is_empty() {
        tracing::warn!("Purged in-progress files with dead replicas: {:?}", stale);
    }
    report.stale_purged = stale.len();

    let links: Vec<Arc<PeerLink>> = state.registry.links().cloned().collect();
    if links.is_empty() {
        return report;
    }
    report.peers_probed = links.len();

    // 1. probe
    let probes = join_all(links.iter().map(|link| async move {
        (link.id(), link.probe(PeerRequest::List, timeout).await)
    }))
    .await;

    let mut holdings: BTreeMap<PeerId, Vec<String>> = BTreeMap::new();
    for (peer, outcome) in probes {
        match outcome {
            Ok(ProbeReply::Files(files)) => {
                holdings.insert(peer, files);
            }
            Ok(other) => {
                tracing::warn!("Peer {} answered LIST with {:?}", peer, other);
                report.probe_failures += 1;
            }
            Err(e) => {
                tracing::warn!("Skipping peer {} for this rebalance: {}", peer, e);
                report.probe_failures += 1;
            }
        }
    }

    // in-progress files are left alone; unindexed ones are orphans
    let managed = state.index.stable_files();
    let in_progress = state.index.in_progress_files();
    let mut orphans: BTreeMap<PeerId, Vec<String>> = BTreeMap::new();
    for (peer, files) in holdings.iter_mut() {
        files.retain(|f| {
            if managed.contains(f) {
                return true;
            }
            if !in_progress.contains(f) {
                orphans.entry(*peer).or_default().push(f.clone());
            }
            false
        });
    }

    // 2-4. plan
    let mut plan = plan(&holdings, cluster.replication_factor());
    for (peer, files) in orphans {
        report.orphans_dropped += files.len();
        plan.instructions.entry(peer).or_default().drop.extend(files);
    }

    // 5. dispatch
    let targets: Vec<(Arc<PeerLink>, RebalanceInstruction)> = plan
        .instructions
        .iter()
        .filter_map(|(peer, instruction)| {
            let link = links.iter().find(|l| l.id() == *peer)?;
            Some((link.clone(), instruction.clone()))
        })
        .collect();
    report.instructions_sent = targets.len();

    let acks = join_all(targets.into_iter().map(|(link, instruction)| async move {
        let outcome = link
            .probe(PeerRequest::Rebalance(instruction), timeout)
            .await;
        (link.id(), outcome)
    }))
    .await;

    for (peer, outcome) in acks {
        match outcome {
            Ok(ProbeReply::RebalanceComplete) => {
                tracing::debug!("Peer {} completed its rebalance work", peer);
            }
            Ok(other) => {
                tracing::warn!("Peer {} answered REBALANCE with {:?}", peer, other);
                report.missed_acks += 1;
            }
            Err(e) => {
                tracing::warn!("Peer {} did not confirm rebalance: {}", peer, e);
                report.missed_acks += 1;
            }
        }
    }

    // reconcile the index only when the whole cluster answered
    if report.probe_failures == 0 {
        for file in &managed {
            if !plan.assignment.contains_key(file) && state.index.forget(file).is_some() {
                tracing::warn!("File {} has no remaining copies; dropped from index", file);
                report.files_lost += 1;
            }
        }
        if report.missed_acks == 0 {
            for (file, holders) in &plan.assignment {
                if state.index.reassign(file, holders.clone()) {
                    report.files_reassigned += 1;
                }
            }
        }
    }

    report
}

/// Background task running a pass every `period`
pub struct Rebalancer {
    cluster: Arc<Cluster>,
    period: Duration,
}

impl Rebalancer {
    pub fn new(cluster: Arc<Cluster>, period: Duration) -> Self {
        Self { cluster, period }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = run_pass(&self.cluster).await;
                tracing::info!(
                    "Rebalance pass: {} peers probed ({} failed), {} instructed ({} unconfirmed), \
                     {} reassigned, {} orphans dropped, {} lost",
                    report.peers_probed,
                    report.probe_failures,
                    report.instructions_sent,
                    report.missed_acks,
                    report.files_reassigned,
                    report.orphans_dropped,
                    report.files_lost
                );
            }
        })
    }
}
