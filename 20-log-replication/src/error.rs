//! Errors and read outcomes returned by nodes and the cluster.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node {node} is down")]
    NodeUnavailable { node: String },

    #[error("key '{key}' not found")]
    KeyNotFound { key: String },

    /// The entry was not the next one in sequence. The node's state is unchanged.
    #[error("node {node} rejected log entry {actual}, expected {expected}")]
    OutOfOrder {
        node: String,
        expected: u64,
        actual: u64,
    },

    #[error("all replicas are down")]
    AllReplicasDown,

    #[error("worker pool {pool} is closed")]
    PoolClosed { pool: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn thread {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn unavailable(node: &str) -> Self {
        Error::NodeUnavailable {
            node: node.to_string(),
        }
    }
}

/// Result of a key lookup.
///
/// Keeps "the key is absent" apart from "nobody could answer", which a bare
/// empty string cannot do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(String),
    NotFound,
    /// The node was down, or no replica was up to serve the read.
    Unavailable,
}

impl ReadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Found(_))
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ReadOutcome::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            ReadOutcome::Found(value) => Some(value),
            _ => None,
        }
    }
}
