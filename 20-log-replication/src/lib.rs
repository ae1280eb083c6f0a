//! Master/replica key-value store with asynchronous log replication.
//!
//! One master accepts every write and delete, stamps it with the next log id,
//! applies it locally and fans the entry out to each replica on a worker pool.
//! Replicas only accept the entry whose id is exactly one past their frontier.
//! Anything else is rejected and the replica pulls the missing suffix of the
//! master's log instead. A failure simulator flips replicas down and up on a
//! timer so the recovery path gets exercised.
//!
//! # Architecture
//!
//! - **Client threads**: call into [`cluster::Cluster`], which forwards writes to
//!   the master and sends reads to a random up replica
//! - **Node worker pools**: every node owns a small [`pool::WorkerPool`]; the
//!   master runs replication tasks on its pool, replicas run recovery on theirs
//! - **Simulator thread**: ticks on a fixed interval and flips replica state
//!
//! There is no network. Nodes talk through shared `Arc`s and each node guards its
//! store, log and frontier with a single reader/writer lock.
//!
//! # Modules
//!
//! - [`entry`]: Immutable log records
//! - [`node`]: The capability trait shared by both roles and the state behind it
//! - [`master`]: Id assignment and replication fan-out
//! - [`replica`]: Sequential apply and recovery
//! - [`cluster`]: Coordinator owning all nodes
//! - [`simulator`]: Periodic failure injection
//! - [`pool`]: Fixed-size worker pool
//! - [`config`]: Cluster and simulator settings
//! - [`protocol`]: Shell command parsing
//! - [`error`]: Error taxonomy and read outcomes

pub mod cluster;
pub mod config;
pub mod entry;
pub mod error;
pub mod master;
pub mod node;
pub mod pool;
pub mod protocol;
pub mod replica;
pub mod simulator;

pub use cluster::Cluster;
pub use config::{ClusterConfig, SimulatorConfig};
pub use entry::{LogEntry, Operation};
pub use error::{Error, ReadOutcome, Result};
pub use master::Master;
pub use node::{Node, NodeCore};
pub use replica::Replica;
