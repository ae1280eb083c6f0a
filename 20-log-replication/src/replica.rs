//! Replicas apply the master's entries strictly in id order and serve reads.
//!
//! When an entry arrives early, or when the replica comes back up after being
//! down, it recovers: it asks the master for every entry past its own frontier
//! and replays them one at a time through the normal apply gate.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::master::Master;
use crate::node::sealed::HasCore;
use crate::node::{Node, NodeCore};

/// A read-serving copy of the master's store.
///
/// # Why a weak master handle
///
/// The master keeps strong references to its replicas for fan-out. A strong
/// reference back would form a cycle, so the replica upgrades its handle only
/// for the length of a recovery pass.
pub struct Replica {
    core: Arc<NodeCore>,
    master: Weak<Master>,
}

impl Replica {
    /// Creates a replica that recovers from `master`.
    ///
    /// The handle is weak: the cluster owns the master, the replica only looks it
    /// up while recovering.
    pub fn new(id: impl Into<String>, master: Weak<Master>, worker_threads: usize) -> Result<Self> {
        Ok(Self {
            core: Arc::new(NodeCore::new(id, worker_threads)?),
            master,
        })
    }

    #[cfg(test)]
    pub(crate) fn detached(id: &str, worker_threads: usize) -> Result<Self> {
        Self::new(id, Weak::new(), worker_threads)
    }

    /// Schedules a recovery pass on the replica's pool.
    ///
    /// Returns `Ok(false)` without doing anything when this replica is down or
    /// the master is down or gone. Returns `Ok(true)` once the pass is queued;
    /// the pass itself runs in the background.
    pub fn recover(&self) -> Result<bool> {
        if !self.core.is_up() {
            debug!(replica = %self.id(), "replica down, recovery skipped");
            return Ok(false);
        }
        let Some(master) = self.master.upgrade().filter(|master| master.is_up()) else {
            debug!(replica = %self.id(), "master unavailable, recovery skipped");
            return Ok(false);
        };
        drop(master);

        let core = Arc::clone(&self.core);
        let master = self.master.clone();
        self.core.pool().submit(move || {
            if let Err(err) = run_recovery(&core, &master) {
                warn!(replica = %core.id(), error = %err, "recovery pass aborted");
            }
        })?;
        info!(replica = %self.id(), "recovery scheduled");
        Ok(true)
    }

    /// Drains the replica's pool, waiting for any queued recovery pass.
    pub fn shutdown(&self) {
        self.core.shutdown();
    }
}

/// Pulls the entries past this replica's frontier and applies them in order.
///
/// Returns how many entries this pass applied.
fn run_recovery(core: &NodeCore, master: &Weak<Master>) -> Result<usize> {
    let frontier = core
        .last_log_index()
        .ok_or_else(|| Error::unavailable(core.id()))?;
    let master = master
        .upgrade()
        .ok_or_else(|| Error::unavailable("master"))?;
    let missing = master.log_entries_after(frontier)?;

    let mut applied = 0;
    for entry in &missing {
        match core.apply_entry(entry) {
            Ok(()) => applied += 1,
            // A replication task got there first.
            Err(Error::OutOfOrder { expected, .. }) if entry.id() < expected => continue,
            Err(err) => return Err(err),
        }
    }

    info!(
        replica = %core.id(),
        from = frontier,
        applied,
        last_applied = core.last_log_index().unwrap_or(frontier),
        "recovery pass finished"
    );
    Ok(applied)
}

impl HasCore for Replica {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl Node for Replica {
    fn go_up(&self) {
        self.core.go_up();
        if let Err(err) = self.recover() {
            warn!(replica = %self.id(), error = %err, "could not schedule recovery");
        }
    }
}
