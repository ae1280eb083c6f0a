//! Fixed-size worker pool used for replication and recovery tasks.
//!
//! Jobs go through an unbounded crossbeam channel to a fixed set of named worker
//! threads. Shutdown drops the sending side, so workers drain whatever is already
//! queued, see the channel disconnect and exit; then the pool joins them.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named pool of worker threads.
///
/// Work is executed in no particular order across workers: two jobs submitted
/// back to back may run concurrently or in reverse order.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads named `{name}-{n}`. A size of zero is bumped to one.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let thread_name = format!("{name}-{index}");
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || run_worker(receiver))
                .map_err(|source| Error::Spawn {
                    name: thread_name,
                    source,
                })?;
            workers.push(handle);
        }

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Prefix of the worker thread names, also reported in [`Error::PoolClosed`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a job. Fails fast once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(self.closed());
        };
        sender.send(Box::new(job)).map_err(|_| self.closed())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting work, lets queued jobs finish and joins every worker.
    ///
    /// Safe to call more than once. When called from one of the pool's own
    /// workers that worker is left to exit on its own.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(pool = %self.name, "worker thread panicked");
            }
        }
        debug!(pool = %self.name, "worker pool drained");
    }

    fn closed(&self) -> Error {
        Error::PoolClosed {
            pool: self.name.clone(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("task panicked; worker keeps running");
        }
    }
}
