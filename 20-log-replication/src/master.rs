//! The single node that accepts writes and deletes.
//!
//! Every accepted mutation is stamped with the next log id, applied locally and
//! appended to the log inside one exclusive section of the master's lock. Only
//! after the lock is released does the master queue one replication task per
//! replica on its worker pool. Callers never wait for replicas.
//!
//! Replication tasks are independent, so a replica can see entry 7 before entry 6.
//! The replica's sequential-id gate rejects the early entry and the task asks the
//! replica to recover, which replays the missing range in order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::node::sealed::HasCore;
use crate::node::{Node, NodeCore};
use crate::replica::Replica;

/// Replica ids that acknowledged each log entry.
///
/// Observability only. Nothing in the replication path waits on it.
type Acknowledgements = Arc<Mutex<BTreeMap<u64, BTreeSet<String>>>>;

/// The node that orders every mutation.
///
/// Holds the replicas it fans out to and the acknowledgement table. Ids come
/// from `next_log_id`, which is only advanced while the core's write lock is
/// held.
pub struct Master {
    core: NodeCore,
    next_log_id: AtomicU64,
    replicas: RwLock<Vec<Arc<Replica>>>,
    pending: Acknowledgements,
}

impl Master {
    pub fn new(id: impl Into<String>, worker_threads: usize) -> Result<Self> {
        Ok(Self {
            core: NodeCore::new(id, worker_threads)?,
            next_log_id: AtomicU64::new(1),
            replicas: RwLock::new(Vec::new()),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Adds a replica to the fan-out set. Expected once per replica, before any write.
    pub fn register_replica(&self, replica: Arc<Replica>) {
        let mut replicas = self.replicas.write();
        if replicas.iter().any(|known| known.id() == replica.id()) {
            return;
        }
        info!(master = %self.id(), replica = %replica.id(), "registered replica");
        replicas.push(replica);
    }

    pub fn replica_ids(&self) -> Vec<String> {
        self.replicas
            .read()
            .iter()
            .map(|replica| replica.id().to_string())
            .collect()
    }

    /// Writes `key = value` locally and queues replication.
    ///
    /// Returns the committed entry once the local apply is done. Replication
    /// outcome does not affect the result; a closed pool does, as
    /// [`Error::PoolClosed`], although the local commit stands. That holds with
    /// or without registered replicas.
    pub fn write(&self, key: &str, value: &str) -> Result<LogEntry> {
        self.core.ensure_up()?;

        let entry = {
            let mut state = self.core.state_mut();
            let entry = LogEntry::write(self.allocate_id(), key, value);
            state.commit(entry.clone());
            entry
        };
        info!(master = %self.id(), key, value, id = entry.id(), "write committed");

        self.replicate(&entry)?;
        Ok(entry)
    }

    /// Deletes `key` locally and queues replication of the delete.
    ///
    /// A missing key is reported before an id is consumed, so it produces no
    /// log entry.
    pub fn delete(&self, key: &str) -> Result<LogEntry> {
        self.core.ensure_up()?;

        let entry = {
            let mut state = self.core.state_mut();
            if !state.store.contains_key(key) {
                debug!(master = %self.id(), key, "delete of missing key");
                return Err(Error::KeyNotFound {
                    key: key.to_string(),
                });
            }
            let entry = LogEntry::delete(self.allocate_id(), key);
            state.commit(entry.clone());
            entry
        };
        info!(master = %self.id(), key, id = entry.id(), "delete committed");

        self.replicate(&entry)?;
        Ok(entry)
    }

    /// The id the next accepted mutation will receive.
    pub fn next_log_id(&self) -> u64 {
        self.next_log_id.load(Ordering::SeqCst)
    }

    /// Replica ids that have applied entry `id` through the replication path.
    ///
    /// Entries a replica picked up through recovery are not counted.
    pub fn acknowledgements(&self, id: u64) -> Option<BTreeSet<String>> {
        self.pending.lock().get(&id).cloned()
    }

    /// Drains the replication pool. Writes still commit locally afterwards but
    /// report [`Error::PoolClosed`].
    pub fn shutdown(&self) {
        self.core.shutdown();
    }

    // Only called with the exclusive lock held, which is what keeps ids gap-free
    // and in commit order.
    fn allocate_id(&self) -> u64 {
        self.next_log_id.fetch_add(1, Ordering::SeqCst)
    }

    fn replicate(&self, entry: &LogEntry) -> Result<()> {
        let pool = self.core.pool();
        if pool.is_closed() {
            warn!(master = %self.id(), id = entry.id(), "pool closed, replication not queued");
            return Err(Error::PoolClosed {
                pool: pool.name().to_string(),
            });
        }
        self.pending.lock().insert(entry.id(), BTreeSet::new());

        let replicas: Vec<Arc<Replica>> = self.replicas.read().clone();
        for replica in replicas {
            let task_entry = entry.clone();
            let pending = Arc::clone(&self.pending);
            let master_id = self.id().to_string();
            let queued = pool.submit(move || replicate_to(&master_id, &replica, &task_entry, &pending));
            if let Err(err) = queued {
                warn!(master = %self.id(), id = entry.id(), error = %err, "replication not queued");
                return Err(err);
            }
        }
        Ok(())
    }
}

fn replicate_to(master_id: &str, replica: &Replica, entry: &LogEntry, pending: &Acknowledgements) {
    if !replica.is_up() {
        debug!(master = %master_id, replica = %replica.id(), id = entry.id(), "replica down, skipping");
        return;
    }

    match replica.apply_entry(entry) {
        Ok(()) => {
            if let Some(acks) = pending.lock().get_mut(&entry.id()) {
                acks.insert(replica.id().to_string());
            }
            debug!(master = %master_id, replica = %replica.id(), id = entry.id(), "replicated");
        }
        Err(Error::OutOfOrder { .. }) => {
            if let Err(err) = replica.recover() {
                warn!(replica = %replica.id(), error = %err, "could not schedule recovery");
            }
        }
        Err(err) => {
            debug!(master = %master_id, replica = %replica.id(), error = %err, "replication skipped");
        }
    }
}

impl HasCore for Master {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl Node for Master {
    fn delete_key(&self, key: &str) -> Result<()> {
        self.delete(key).map(|_| ())
    }
}
