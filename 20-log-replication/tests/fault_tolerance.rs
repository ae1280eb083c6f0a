//! Fault-injection tests: the failure simulator takes replicas down and brings
//! them back while the master keeps accepting writes.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use log_replication::{Cluster, ClusterConfig, Node, ReadOutcome, SimulatorConfig};

const TICK: Duration = Duration::from_millis(25);

fn cluster(replicas: usize, seed: u64) -> Result<Cluster> {
    Ok(Cluster::new(
        &ClusterConfig::default().with_replicas(replicas).with_seed(seed),
    )?)
}

fn wait_until(timeout: Duration, what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timeout waiting for {what}");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn all_down(cluster: &Cluster) -> bool {
    cluster.replicas().iter().all(|replica| !replica.is_up())
}

/// Every replica up and at the master's frontier.
fn all_caught_up(cluster: &Cluster) -> bool {
    let target = cluster.master().last_log_index();
    cluster
        .replicas()
        .iter()
        .all(|replica| replica.last_log_index() == target)
}

#[test]
fn test_replicas_recover_after_total_outage() -> Result<()> {
    let cluster = cluster(5, 3)?;
    for i in 0..5 {
        cluster.write(&format!("recovery-key-{i}"), &format!("recovery-value-{i}"))?;
    }

    cluster.start_failure_simulator(SimulatorConfig::new(1.0, 0.0, TICK))?;
    wait_until(Duration::from_secs(5), "every replica to fail", || all_down(&cluster))?;
    assert_eq!(cluster.read("recovery-key-0"), ReadOutcome::Unavailable);

    // Writes keep landing on the master during the outage.
    cluster.write("during-outage", "yes")?;

    cluster.start_failure_simulator(SimulatorConfig::new(0.0, 1.0, TICK))?;
    wait_until(Duration::from_secs(5), "every replica to recover", || {
        all_caught_up(&cluster)
    })?;

    for i in 0..5 {
        assert_eq!(
            cluster.read(&format!("recovery-key-{i}")),
            ReadOutcome::Found(format!("recovery-value-{i}"))
        );
    }
    assert_eq!(cluster.read("during-outage"), ReadOutcome::Found("yes".into()));
    Ok(())
}

#[test]
fn test_master_never_fails_under_simulation() -> Result<()> {
    let cluster = cluster(3, 5)?;
    cluster.start_failure_simulator(SimulatorConfig::new(0.5, 0.5, TICK))?;

    for i in 0..30 {
        cluster.write(&format!("continuous-key-{i}"), &format!("continuous-value-{i}"))?;
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(cluster.nodes_status().get("master"), Some(&true));
    assert_eq!(cluster.logs()?.len(), 30);

    cluster.start_failure_simulator(SimulatorConfig::new(0.0, 1.0, TICK))?;
    wait_until(Duration::from_secs(5), "replicas to converge", || {
        all_caught_up(&cluster)
    })?;
    cluster.stop_failure_simulator();

    let expected = cluster.master().data_store()?;
    assert_eq!(expected.len(), 30);
    for replica in cluster.replicas() {
        assert_eq!(replica.data_store()?, expected, "{} diverged", replica.id());
    }
    Ok(())
}

#[test]
fn test_reads_mostly_succeed_during_churn() -> Result<()> {
    let cluster = cluster(5, 8)?;
    for i in 0..5 {
        cluster.write(&format!("read-key-{i}"), &format!("read-value-{i}"))?;
    }
    wait_until(Duration::from_secs(5), "initial replication", || all_caught_up(&cluster))?;

    cluster.start_failure_simulator(SimulatorConfig::new(0.4, 0.4, TICK))?;
    let mut successful = 0;
    for i in 0..40 {
        let key = format!("read-key-{}", i % 5);
        match cluster.read(&key) {
            ReadOutcome::Found(value) => {
                assert_eq!(value, format!("read-value-{}", i % 5));
                successful += 1;
            }
            // Only a total outage may fail a read; a replica never loses data.
            ReadOutcome::NotFound => bail!("replica lost {key}"),
            ReadOutcome::Unavailable => {}
        }
        thread::sleep(Duration::from_millis(10));
    }
    cluster.shutdown();

    assert!(successful > 5, "only {successful} reads succeeded");
    Ok(())
}

#[test]
fn test_shutdown_stops_simulation() -> Result<()> {
    let cluster = cluster(3, 13)?;
    cluster.start_failure_simulator(SimulatorConfig::new(0.5, 0.5, TICK))?;
    cluster.shutdown();
    assert!(cluster.simulator_config().is_none());

    let before = cluster.nodes_status();
    thread::sleep(TICK * 6);
    assert_eq!(cluster.nodes_status(), before);
    Ok(())
}
