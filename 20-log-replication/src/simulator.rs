//! Background loop that randomly fails and revives replicas.
//!
//! The loop waits on a `crossbeam_channel::tick` ticker and a stop channel at the
//! same time, so [`FailureSimulator::stop`] returns as soon as the thread notices
//! the signal instead of after a full interval. The master is never touched.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::replica::Replica;

/// A state change made by one simulator round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Down(String),
    Up(String),
}

pub struct FailureSimulator {
    config: SimulatorConfig,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FailureSimulator {
    /// Validates `config` and starts the simulator thread.
    pub fn spawn(
        config: SimulatorConfig,
        replicas: Vec<Arc<Replica>>,
        rng: Arc<Mutex<StdRng>>,
    ) -> Result<Self> {
        config.validate()?;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let name = "failure-simulator".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let ticker = tick(config.check_interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let transitions = simulate_round(&replicas, &rng, &config);
                            if !transitions.is_empty() {
                                debug!(?transitions, "simulator round");
                            }
                        }
                    }
                }
            })
            .map_err(|source| Error::Spawn { name, source })?;

        info!(
            failure_probability = config.failure_probability,
            recovery_probability = config.recovery_probability,
            interval_ms = config.check_interval.as_millis() as u64,
            "failure simulator started"
        );

        Ok(Self {
            config,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn config(&self) -> SimulatorConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the loop and waits for the thread to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("failure simulator thread panicked");
            }
            info!("failure simulator stopped");
        }
    }
}

impl Drop for FailureSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs one check over every replica.
///
/// An up replica goes down with `failure_probability`; a down replica comes up
/// with `recovery_probability`. Coin flips happen under the RNG lock, state
/// changes after it is released so recovery scheduling never holds the RNG.
pub fn simulate_round(
    replicas: &[Arc<Replica>],
    rng: &Mutex<StdRng>,
    config: &SimulatorConfig,
) -> Vec<Transition> {
    let flips: Vec<(&Arc<Replica>, bool)> = {
        let mut rng = rng.lock();
        replicas
            .iter()
            .filter_map(|replica| {
                let up = replica.is_up();
                let probability = if up {
                    config.failure_probability
                } else {
                    config.recovery_probability
                };
                rng.gen_bool(probability).then_some((replica, up))
            })
            .collect()
    };

    flips
        .into_iter()
        .map(|(replica, was_up)| {
            if was_up {
                replica.go_down();
                Transition::Down(replica.id().to_string())
            } else {
                replica.go_up();
                Transition::Up(replica.id().to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::Master;
    use rand::SeedableRng;
    use std::time::{Duration, Instant};

    fn replicas(n: usize) -> (Arc<Master>, Vec<Arc<Replica>>) {
        let master = Arc::new(Master::new("master", 1).unwrap());
        let replicas = (0..n)
            .map(|i| {
                Arc::new(Replica::new(format!("replica-{i}"), Arc::downgrade(&master), 1).unwrap())
            })
            .collect();
        (master, replicas)
    }

    fn rng(seed: u64) -> Arc<Mutex<StdRng>> {
        Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn test_certain_failure_takes_every_replica_down() {
        let (_master, replicas) = replicas(3);
        let config = SimulatorConfig::new(1.0, 0.0, Duration::from_millis(10));

        let transitions = simulate_round(&replicas, &rng(1), &config);
        assert_eq!(transitions.len(), 3);
        assert!(transitions.iter().all(|t| matches!(t, Transition::Down(_))));
        assert!(replicas.iter().all(|replica| !replica.is_up()));

        // Nothing recovers with a zero recovery probability.
        assert!(simulate_round(&replicas, &rng(2), &config).is_empty());
    }

    #[test]
    fn test_certain_recovery_brings_every_replica_up() {
        let (_master, replicas) = replicas(3);
        for replica in &replicas {
            replica.go_down();
        }
        let config = SimulatorConfig::new(0.0, 1.0, Duration::from_millis(10));

        let transitions = simulate_round(&replicas, &rng(3), &config);
        assert!(transitions.iter().all(|t| matches!(t, Transition::Up(_))));
        assert!(replicas.iter().all(|replica| replica.is_up()));
    }

    #[test]
    fn test_same_seed_same_rounds() {
        let config = SimulatorConfig::new(0.5, 0.5, Duration::from_millis(10));
        let (_m1, first) = replicas(5);
        let (_m2, second) = replicas(5);
        let (rng_a, rng_b) = (rng(42), rng(42));

        for _ in 0..10 {
            assert_eq!(
                simulate_round(&first, &rng_a, &config),
                simulate_round(&second, &rng_b, &config)
            );
        }
    }

    #[test]
    fn test_background_loop_ticks_and_stops_promptly() {
        let (_master, replicas) = replicas(2);
        let config = SimulatorConfig::new(1.0, 0.0, Duration::from_millis(20));
        let mut simulator = FailureSimulator::spawn(config, replicas.clone(), rng(7)).unwrap();
        assert!(simulator.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while replicas.iter().any(|replica| replica.is_up()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(replicas.iter().all(|replica| !replica.is_up()));

        let started = Instant::now();
        simulator.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!simulator.is_running());
    }

    #[test]
    fn test_long_interval_does_not_delay_stop() {
        let (_master, replicas) = replicas(1);
        let config = SimulatorConfig::new(0.1, 0.1, Duration::from_secs(60));
        let mut simulator = FailureSimulator::spawn(config, replicas, rng(9)).unwrap();

        let started = Instant::now();
        simulator.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (_master, replicas) = replicas(1);
        let config = SimulatorConfig::new(2.0, 0.0, Duration::from_millis(10));
        assert!(matches!(
            FailureSimulator::spawn(config, replicas, rng(0)),
            Err(Error::InvalidConfig(_))
        ));
    }
}
