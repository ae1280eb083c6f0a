//! Integration tests for the write, delete and read paths of the cluster.
//!
//! These drive a real cluster (master, replicas, worker pools) and poll until
//! asynchronous replication settles, the same way the election tests wait for a
//! leader.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use log_replication::{Cluster, ClusterConfig, Error, LogEntry, Node, Operation, ReadOutcome};

fn cluster(replicas: usize) -> Result<Cluster> {
    Ok(Cluster::new(
        &ClusterConfig::default().with_replicas(replicas).with_seed(1),
    )?)
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
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

/// Waits until every up replica has applied everything the master has.
fn wait_for_convergence(cluster: &Cluster) -> Result<()> {
    let target = cluster.master().last_log_index();
    wait_until(Duration::from_secs(5), "replicas to converge", || {
        cluster
            .replicas()
            .iter()
            .filter(|replica| replica.is_up())
            .all(|replica| replica.last_log_index() == target)
    })
}

fn read_everywhere(cluster: &Cluster, key: &str) -> Vec<ReadOutcome> {
    cluster
        .replicas()
        .iter()
        .map(|replica| replica.read(key))
        .collect()
}

#[test]
fn test_write_update_delete_lifecycle() -> Result<()> {
    let cluster = cluster(3)?;

    cluster.write("k1", "v1")?;
    wait_for_convergence(&cluster)?;
    assert_eq!(cluster.read("k1"), ReadOutcome::Found("v1".into()));
    assert!(read_everywhere(&cluster, "k1")
        .iter()
        .all(|outcome| outcome.value() == Some("v1")));

    cluster.write("k1", "v2")?;
    wait_for_convergence(&cluster)?;
    assert_eq!(cluster.read("k1"), ReadOutcome::Found("v2".into()));

    let delete = cluster.delete_key("k1")?;
    assert_eq!(delete.operation(), Operation::Delete);
    wait_for_convergence(&cluster)?;
    assert_eq!(cluster.read("k1"), ReadOutcome::NotFound);
    assert!(read_everywhere(&cluster, "k1")
        .iter()
        .all(|outcome| *outcome == ReadOutcome::NotFound));

    assert!(matches!(cluster.delete_key("k1"), Err(Error::KeyNotFound { .. })));
    assert_eq!(cluster.logs()?.len(), 3);
    Ok(())
}

#[test]
fn test_log_ids_are_gap_free_under_concurrent_writers() -> Result<()> {
    let cluster = cluster(3)?;

    thread::scope(|scope| {
        for writer in 0..4 {
            let cluster = &cluster;
            scope.spawn(move || {
                for i in 0..25 {
                    cluster
                        .write(&format!("w{writer}-{i}"), &i.to_string())
                        .expect("master is up");
                }
            });
        }
    });

    let ids: Vec<u64> = cluster.logs()?.iter().map(LogEntry::id).collect();
    assert_eq!(ids, (1..=100).collect::<Vec<_>>());
    assert_eq!(cluster.master().next_log_id(), 101);

    wait_for_convergence(&cluster)?;
    let expected = cluster.master().data_store()?;
    for replica in cluster.replicas() {
        assert_eq!(replica.data_store()?, expected, "{} diverged", replica.id());
        assert_eq!(replica.log_entries_after(0)?.len(), 100);
    }
    Ok(())
}

#[test]
fn test_replica_catches_up_after_downtime() -> Result<()> {
    let cluster = cluster(3)?;
    cluster.write("before", "1")?;
    wait_for_convergence(&cluster)?;

    let lagging = cluster.replica("replica-1").expect("replica exists");
    lagging.go_down();

    cluster.write("new-a", "a")?;
    cluster.write("new-b", "b")?;
    wait_for_convergence(&cluster)?;
    assert_eq!(lagging.last_log_index(), None);

    lagging.go_up();
    let master_index = cluster.master().last_log_index();
    wait_until(Duration::from_secs(5), "replica-1 to recover", || {
        lagging.last_log_index() == master_index
    })?;

    assert_eq!(lagging.read("new-a"), ReadOutcome::Found("a".into()));
    assert_eq!(lagging.read("new-b"), ReadOutcome::Found("b".into()));
    assert_eq!(lagging.data_store()?, cluster.master().data_store()?);
    Ok(())
}

#[test]
fn test_recovery_includes_deletes() -> Result<()> {
    let cluster = cluster(2)?;
    cluster.write("doomed", "x")?;
    cluster.write("kept", "y")?;
    wait_for_convergence(&cluster)?;

    let replica = cluster.replica("replica-0").expect("replica exists");
    replica.go_down();
    cluster.delete_key("doomed")?;
    replica.go_up();

    wait_until(Duration::from_secs(5), "delete to reach replica-0", || {
        replica.last_log_index() == Some(3)
    })?;
    assert_eq!(replica.read("doomed"), ReadOutcome::NotFound);
    assert_eq!(replica.read("kept"), ReadOutcome::Found("y".into()));
    Ok(())
}

#[test]
fn test_acknowledgements_track_replication() -> Result<()> {
    let cluster = cluster(3)?;
    let entry = cluster.write("k", "v")?;

    wait_until(Duration::from_secs(5), "all replicas to acknowledge", || {
        cluster
            .master()
            .acknowledgements(entry.id())
            .is_some_and(|acks| acks.len() == 3)
    })?;
    assert_eq!(cluster.master().acknowledgements(999), None);
    Ok(())
}

#[test]
fn test_writes_fail_only_while_master_down() -> Result<()> {
    let cluster = cluster(2)?;
    cluster.write("a", "1")?;
    wait_for_convergence(&cluster)?;

    cluster.master().go_down();
    assert!(matches!(cluster.write("b", "2"), Err(Error::NodeUnavailable { .. })));
    assert!(cluster.logs().is_err());
    // Replicas keep serving what they already have.
    assert_eq!(cluster.read("a"), ReadOutcome::Found("1".into()));

    cluster.master().go_up();
    assert_eq!(cluster.write("b", "2")?.id(), 2);
    Ok(())
}

#[test]
fn test_replica_down_while_master_down_recovers_later() -> Result<()> {
    let cluster = cluster(1)?;
    let replica = cluster.replica("replica-0").expect("replica exists");

    replica.go_down();
    cluster.write("a", "1")?;
    cluster.master().go_down();

    // Master unavailable: coming up cannot recover yet.
    replica.go_up();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(replica.last_log_index(), Some(0));

    cluster.master().go_up();
    assert!(replica.recover()?);
    wait_until(Duration::from_secs(5), "replica-0 to recover", || {
        replica.last_log_index() == Some(1)
    })?;
    Ok(())
}
