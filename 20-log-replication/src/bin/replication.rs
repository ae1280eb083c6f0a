//! Interactive shell and scripted demo for the replication cluster.
//!
//! # Example usage
//!
//! ```bash
//! # Shell with 3 replicas and the default failure simulator
//! cargo run --bin replication
//!
//! # Scripted walkthrough, quieter logs, deterministic replica choice
//! RUST_LOG=warn cargo run --bin replication -- --demo --seed 7
//!
//! # No simulated failures
//! cargo run --bin replication -- --no-simulator --replicas 5
//! ```

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use log_replication::protocol::{ShellCommand, USAGE};
use log_replication::{Cluster, ClusterConfig, ReadOutcome, SimulatorConfig};

/// Command-line arguments for the replication cluster.
#[derive(Parser, Debug)]
#[command(author, version, about = "In-memory master/replica store with failure injection")]
struct Args {
    /// Number of replicas registered with the master
    #[arg(long, default_value_t = 3)]
    replicas: usize,

    /// Worker threads per node
    #[arg(long, default_value_t = 5)]
    workers: usize,

    /// Chance that an up replica fails on each check
    #[arg(long, default_value_t = 0.1)]
    failure_probability: f64,

    /// Chance that a down replica recovers on each check
    #[arg(long, default_value_t = 0.3)]
    recovery_probability: f64,

    /// Seconds between simulator checks
    #[arg(long, default_value_t = 5)]
    check_interval_secs: u64,

    /// Do not start the failure simulator
    #[arg(long)]
    no_simulator: bool,

    /// Seed for replica selection and failure coin flips
    #[arg(long)]
    seed: Option<u64>,

    /// Run the scripted demo instead of the shell
    #[arg(long)]
    demo: bool,
}

impl Args {
    fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            replicas: self.replicas,
            worker_threads: self.workers,
            seed: self.seed,
        }
    }

    fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig::new(
            self.failure_probability,
            self.recovery_probability,
            Duration::from_secs(self.check_interval_secs),
        )
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let cluster = Cluster::new(&args.cluster_config()).context("failed to build cluster")?;
    if !args.no_simulator {
        cluster
            .start_failure_simulator(args.simulator_config())
            .context("failed to start failure simulator")?;
    }

    let result = if args.demo {
        run_demo(&cluster)
    } else {
        run_shell(&cluster)
    };

    cluster.shutdown();
    result
}

fn run_shell(cluster: &Cluster) -> Result<()> {
    println!("{USAGE}");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush().context("failed to flush prompt")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("failed to read input")? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match ShellCommand::parse(&line) {
            Ok(ShellCommand::Exit) => break,
            Ok(command) => execute(cluster, command)?,
            Err(err) => println!("{err}"),
        }
    }
    Ok(())
}

fn execute(cluster: &Cluster, command: ShellCommand) -> Result<()> {
    match command {
        ShellCommand::Write { key, value } => match cluster.write(&key, &value) {
            Ok(entry) => println!("write successful (log #{})", entry.id()),
            Err(err) => println!("write failed: {err}"),
        },
        ShellCommand::Read { key } => match cluster.read(&key) {
            ReadOutcome::Found(value) => println!("{key} = {value}"),
            ReadOutcome::NotFound => println!("key '{key}' not found"),
            ReadOutcome::Unavailable => println!("all replicas are down"),
        },
        ShellCommand::Delete { key } => match cluster.delete_key(&key) {
            Ok(entry) => println!("delete successful (log #{})", entry.id()),
            Err(err) => println!("delete failed: {err}"),
        },
        ShellCommand::Show => print_store(cluster),
        ShellCommand::Logs { json } => match cluster.logs() {
            Ok(entries) if json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entries).context("failed to encode log")?
                );
            }
            Ok(entries) if entries.is_empty() => println!("(no log entries)"),
            Ok(entries) => {
                for entry in entries {
                    println!("{entry}");
                }
            }
            Err(err) => println!("cannot read log: {err}"),
        },
        ShellCommand::Status => {
            for (node, up) in cluster.nodes_status() {
                println!("{node}: {}", if up { "UP" } else { "DOWN" });
            }
        }
        ShellCommand::Help => println!("{USAGE}"),
        ShellCommand::Exit => {}
    }
    Ok(())
}

fn print_store(cluster: &Cluster) {
    match cluster.data_store() {
        Ok(store) if store.is_empty() => println!("(empty)"),
        Ok(store) => {
            for (key, value) in store {
                println!("{key} = {value}");
            }
        }
        Err(err) => println!("cannot show store: {err}"),
    }
}

fn run_demo(cluster: &Cluster) -> Result<()> {
    let settle = Duration::from_secs(2);

    info!("--- initializing data ---");
    for i in 1..=3 {
        cluster.write(&format!("key{i}"), &format!("value{i}"))?;
    }
    thread::sleep(settle);
    read_keys(cluster, 5);
    print_store(cluster);

    info!("--- adding more data ---");
    cluster.write("key4", "value4")?;
    cluster.write("key5", "value5")?;
    thread::sleep(settle);
    read_keys(cluster, 5);

    info!("--- updating existing data ---");
    cluster.write("key1", "updated-value1")?;
    cluster.write("key3", "updated-value3")?;
    thread::sleep(settle);
    read_keys(cluster, 5);

    info!("--- deleting keys ---");
    cluster.delete_key("key2")?;
    cluster.delete_key("key4")?;
    thread::sleep(settle);
    read_keys(cluster, 5);

    if cluster.simulator_config().is_some() {
        info!("--- watching failures and recovery for 30 seconds ---");
        thread::sleep(Duration::from_secs(30));
    } else {
        warn!("failure simulator disabled, skipping the failure window");
    }

    info!("--- final state ---");
    print_store(cluster);
    for (node, up) in cluster.nodes_status() {
        println!("{node}: {}", if up { "UP" } else { "DOWN" });
    }
    Ok(())
}

fn read_keys(cluster: &Cluster, count: usize) {
    for i in 1..=count {
        let key = format!("key{i}");
        match cluster.read(&key) {
            ReadOutcome::Found(value) => println!("{key} = {value}"),
            ReadOutcome::NotFound => println!("{key} = <deleted>"),
            ReadOutcome::Unavailable => println!("{key}: all replicas are down"),
        }
        thread::sleep(Duration::from_millis(300));
    }
}
