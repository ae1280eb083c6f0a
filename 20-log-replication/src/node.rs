//! The capability every node exposes, and the state behind it.
//!
//! Both roles embed a [`NodeCore`]: a key-value store, an append-only log and the
//! id of the last applied entry, all behind one reader/writer lock, plus an up/down
//! flag and a worker pool. The [`Node`] trait gives every operation a default
//! that delegates to the core; [`crate::Master`] and [`crate::Replica`] only
//! override the operations whose behavior differs for their role.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::entry::{LogEntry, Operation};
use crate::error::{Error, ReadOutcome, Result};
use crate::pool::WorkerPool;

pub(crate) mod sealed {
    use super::NodeCore;

    /// Access to the embedded state. Unnameable outside the crate, so callers
    /// cannot flip a replica's flag behind [`super::Node::go_up`]'s recovery.
    pub trait HasCore {
        fn core(&self) -> &NodeCore;
    }
}

/// Operations shared by the master and the replicas.
///
/// Implemented only inside this crate. Every default delegates to the node's
/// [`NodeCore`]; roles override what they do differently.
///
/// The core itself stays out of reach, so a replica cannot be brought up
/// without its recovery pass:
///
/// ```compile_fail
/// use log_replication::{Cluster, ClusterConfig};
///
/// let cluster = Cluster::new(&ClusterConfig::default()).unwrap();
/// cluster.replicas()[0].core().go_up();
/// ```
pub trait Node: sealed::HasCore + Send + Sync {
    fn id(&self) -> &str {
        self.core().id()
    }

    fn is_up(&self) -> bool {
        self.core().is_up()
    }

    fn go_down(&self) {
        self.core().go_down();
    }

    fn go_up(&self) {
        self.core().go_up();
    }

    fn read(&self, key: &str) -> ReadOutcome {
        self.core().read(key)
    }

    fn delete_key(&self, key: &str) -> Result<()> {
        self.core().delete_key(key)
    }

    /// Copy of the whole store.
    fn data_store(&self) -> Result<BTreeMap<String, String>> {
        self.core().data_store()
    }

    /// Id of the last applied entry, or `None` while the node is down.
    fn last_log_index(&self) -> Option<u64> {
        self.core().last_log_index()
    }

    fn apply_entry(&self, entry: &LogEntry) -> Result<()> {
        self.core().apply_entry(entry)
    }

    /// Entries with an id greater than `index`, in ascending id order.
    fn log_entries_after(&self, index: u64) -> Result<Vec<LogEntry>> {
        self.core().log_entries_after(index)
    }
}

/// Everything the lock protects. Kept together so a reader never sees a store
/// that disagrees with the log or the frontier.
#[derive(Debug, Default)]
pub struct NodeState {
    pub(crate) store: BTreeMap<String, String>,
    pub(crate) log: Vec<LogEntry>,
    pub(crate) last_applied: u64,
}

impl NodeState {
    /// Mutates the store according to `entry`, appends it and advances the frontier.
    ///
    /// Callers are responsible for the sequence check.
    pub(crate) fn commit(&mut self, entry: LogEntry) {
        match entry.operation() {
            Operation::Write => {
                self.store
                    .insert(entry.key().to_string(), entry.value().to_string());
            }
            Operation::Delete => {
                self.store.remove(entry.key());
            }
        }
        self.last_applied = entry.id();
        self.log.push(entry);
    }
}

/// State and lifecycle shared by both roles: the id, the up/down flag, the
/// locked [`NodeState`] and the worker pool.
///
/// # Why one lock
///
/// The store, the log and `last_applied` change together on every apply. A
/// single `RwLock` keeps a reader from seeing a store ahead of the frontier and
/// lets the master assign an id and commit in one exclusive section.
pub struct NodeCore {
    id: String,
    up: AtomicBool,
    state: RwLock<NodeState>,
    pool: WorkerPool,
}

impl NodeCore {
    /// Creates an up node with an empty store and a pool of `worker_threads` workers.
    pub fn new(id: impl Into<String>, worker_threads: usize) -> Result<Self> {
        let id = id.into();
        let pool = WorkerPool::new(format!("{id}-worker"), worker_threads)?;
        Ok(Self {
            id,
            up: AtomicBool::new(true),
            state: RwLock::new(NodeState::default()),
            pool,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn go_down(&self) {
        if self.up.swap(false, Ordering::SeqCst) {
            info!(node = %self.id, "node going DOWN");
        }
    }

    pub fn go_up(&self) {
        if !self.up.swap(true, Ordering::SeqCst) {
            info!(node = %self.id, "node coming UP");
        }
    }

    pub fn read(&self, key: &str) -> ReadOutcome {
        if !self.is_up() {
            debug!(node = %self.id, key, "read on a down node");
            return ReadOutcome::Unavailable;
        }
        match self.state.read().store.get(key) {
            Some(value) => ReadOutcome::Found(value.clone()),
            None => ReadOutcome::NotFound,
        }
    }

    /// Removes a key from the local store only. No log entry is produced.
    pub fn delete_key(&self, key: &str) -> Result<()> {
        self.ensure_up()?;
        let mut state = self.state.write();
        if state.store.remove(key).is_none() {
            return Err(Error::KeyNotFound {
                key: key.to_string(),
            });
        }
        debug!(node = %self.id, key, "deleted key");
        Ok(())
    }

    pub fn data_store(&self) -> Result<BTreeMap<String, String>> {
        self.ensure_up()?;
        Ok(self.state.read().store.clone())
    }

    pub fn last_log_index(&self) -> Option<u64> {
        if !self.is_up() {
            return None;
        }
        Some(self.state.read().last_applied)
    }

    /// Applies `entry` if and only if it is the next one in sequence.
    ///
    /// An entry whose id is not `last_applied + 1` is rejected with
    /// [`Error::OutOfOrder`] and leaves the node untouched.
    pub fn apply_entry(&self, entry: &LogEntry) -> Result<()> {
        self.ensure_up()?;
        let mut state = self.state.write();
        let expected = state.last_applied + 1;
        if entry.id() != expected {
            warn!(
                node = %self.id,
                received = entry.id(),
                expected,
                "out-of-order log entry rejected"
            );
            return Err(Error::OutOfOrder {
                node: self.id.clone(),
                expected,
                actual: entry.id(),
            });
        }
        state.commit(entry.clone());
        debug!(node = %self.id, entry = %entry, "applied log entry");
        Ok(())
    }

    pub fn log_entries_after(&self, index: u64) -> Result<Vec<LogEntry>> {
        self.ensure_up()?;
        let state = self.state.read();
        let start = state.log.partition_point(|entry| entry.id() <= index);
        Ok(state.log[start..].to_vec())
    }

    /// The pool that runs this node's background work: replication tasks on the
    /// master, recovery passes on a replica.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Takes the exclusive lock for a multi-step mutation, such as the master's
    /// id assignment plus apply.
    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write()
    }

    pub(crate) fn ensure_up(&self) -> Result<()> {
        if self.is_up() {
            Ok(())
        } else {
            Err(Error::unavailable(&self.id))
        }
    }

    /// Drains the node's worker pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
