//! Coordinator that owns the master and every replica.
//!
//! The cluster holds the only strong references to the nodes: the master keeps
//! its replicas for fan-out, while replicas reach back to the master through a
//! `Weak` handle. Writes go to the master; reads go to a uniformly random up
//! replica, so they may lag behind the master.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::{ClusterConfig, SimulatorConfig};
use crate::entry::LogEntry;
use crate::error::{Error, ReadOutcome, Result};
use crate::master::Master;
use crate::node::Node;
use crate::replica::Replica;
use crate::simulator::FailureSimulator;

pub const MASTER_ID: &str = "master";

/// One master, its replicas, the shared RNG and an optional failure simulator.
///
/// Dropping the cluster shuts it down.
pub struct Cluster {
    master: Arc<Master>,
    replicas: Vec<Arc<Replica>>,
    rng: Arc<Mutex<StdRng>>,
    simulator: Mutex<Option<FailureSimulator>>,
}

impl Cluster {
    /// Builds one master and `config.replicas` replicas named `replica-{n}`,
    /// and registers every replica with the master.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let master = Arc::new(Master::new(MASTER_ID, config.worker_threads)?);
        let mut replicas = Vec::with_capacity(config.replicas);
        for index in 0..config.replicas {
            let replica = Arc::new(Replica::new(
                format!("replica-{index}"),
                Arc::downgrade(&master),
                config.worker_threads,
            )?);
            master.register_replica(Arc::clone(&replica));
            replicas.push(replica);
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(replicas = config.replicas, "replication cluster initialized");
        Ok(Self {
            master,
            replicas,
            rng: Arc::new(Mutex::new(rng)),
            simulator: Mutex::new(None),
        })
    }

    pub fn write(&self, key: &str, value: &str) -> Result<LogEntry> {
        self.master.write(key, value)
    }

    pub fn delete_key(&self, key: &str) -> Result<LogEntry> {
        self.master.delete(key)
    }

    /// Reads `key` from a random up replica.
    pub fn read(&self, key: &str) -> ReadOutcome {
        let Some(replica) = self.random_up_replica() else {
            debug!(key, "all replicas are down, cannot read");
            return ReadOutcome::Unavailable;
        };
        let outcome = replica.read(key);
        debug!(key, replica = %replica.id(), ?outcome, "read");
        outcome
    }

    /// Store snapshot from a random up replica.
    pub fn data_store(&self) -> Result<BTreeMap<String, String>> {
        self.random_up_replica()
            .ok_or(Error::AllReplicasDown)?
            .data_store()
    }

    /// The master's full log.
    pub fn logs(&self) -> Result<Vec<LogEntry>> {
        self.master.log_entries_after(0)
    }

    /// Up/down state of the master and every replica, keyed by node id.
    pub fn nodes_status(&self) -> BTreeMap<String, bool> {
        let mut status = BTreeMap::new();
        status.insert(self.master.id().to_string(), self.master.is_up());
        for replica in &self.replicas {
            status.insert(replica.id().to_string(), replica.is_up());
        }
        status
    }

    /// Starts the failure simulator, stopping any simulator already running.
    pub fn start_failure_simulator(&self, config: SimulatorConfig) -> Result<()> {
        config.validate()?;
        let mut slot = self.simulator.lock();
        if let Some(mut previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(FailureSimulator::spawn(
            config,
            self.replicas.clone(),
            Arc::clone(&self.rng),
        )?);
        Ok(())
    }

    pub fn stop_failure_simulator(&self) {
        if let Some(mut simulator) = self.simulator.lock().take() {
            simulator.stop();
        }
    }

    pub fn simulator_config(&self) -> Option<SimulatorConfig> {
        self.simulator
            .lock()
            .as_ref()
            .filter(|simulator| simulator.is_running())
            .map(FailureSimulator::config)
    }

    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    pub fn replicas(&self) -> &[Arc<Replica>] {
        &self.replicas
    }

    pub fn replica(&self, id: &str) -> Option<&Arc<Replica>> {
        self.replicas.iter().find(|replica| replica.id() == id)
    }

    /// Stops the simulator, then drains the master's pool, then the replicas'.
    ///
    /// The master goes first because its replication tasks can still schedule
    /// recovery on replica pools.
    pub fn shutdown(&self) {
        self.stop_failure_simulator();
        self.master.shutdown();
        for replica in &self.replicas {
            replica.shutdown();
        }
        info!("replication cluster shut down");
    }

    fn random_up_replica(&self) -> Option<Arc<Replica>> {
        let up: Vec<&Arc<Replica>> = self
            .replicas
            .iter()
            .filter(|replica| replica.is_up())
            .collect();
        if up.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..up.len());
        Some(Arc::clone(up[index]))
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
