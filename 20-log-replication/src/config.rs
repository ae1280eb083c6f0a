//! Settings for building a cluster and running the failure simulator.

use std::time::Duration;

use crate::error::{Error, Result};

/// Shape of the cluster built by [`crate::Cluster::new`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of replicas registered with the master.
    pub replicas: usize,
    /// Worker threads per node pool.
    pub worker_threads: usize,
    /// Seed for replica selection and simulator coin flips. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            worker_threads: 5,
            seed: None,
        }
    }
}

impl ClusterConfig {
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the failure/recovery loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    /// Chance that an up replica goes down on a given check.
    pub failure_probability: f64,
    /// Chance that a down replica comes back up on a given check.
    pub recovery_probability: f64,
    pub check_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.1,
            recovery_probability: 0.3,
            check_interval: Duration::from_secs(5),
        }
    }
}

impl SimulatorConfig {
    pub fn new(failure_probability: f64, recovery_probability: f64, check_interval: Duration) -> Self {
        Self {
            failure_probability,
            recovery_probability,
            check_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_probability("failure_probability", self.failure_probability)?;
        check_probability("recovery_probability", self.recovery_probability)?;
        if self.check_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_probability(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}
