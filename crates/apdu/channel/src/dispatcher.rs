//! Dispatcher thread
//!
//! Pipeline runs and result callbacks execute on a dedicated worker thread.
//! Code can ask whether it is already running on a dispatcher thread, which
//! is how a nested send knows to fail fast instead of blocking a thread that
//! may be the one to release the gate it is waiting for.

use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{SendError, Sender};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_DISPATCHER: Cell<u64> = const { Cell::new(0) };
}

/// Single worker thread executing posted jobs in order
#[derive(Debug)]
pub struct Dispatcher {
    id: u64,
    name: String,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start a dispatcher thread with the given name
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            CURRENT_DISPATCHER.with(|current| current.set(id));
            for job in receiver {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Dispatcher job panicked");
                }
            }
            debug!("Dispatcher stopped");
        })?;

        debug!(%name, "Dispatcher started");
        Ok(Self {
            id,
            name,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is this dispatcher's thread
    pub fn is_current(&self) -> bool {
        CURRENT_DISPATCHER.with(|current| current.get() == self.id)
    }

    /// Whether the calling thread is the thread of any dispatcher
    ///
    /// Senders of one applet can run on different dispatchers while sharing
    /// its gate, so blocking on any of them may stall the release.
    pub fn in_any() -> bool {
        CURRENT_DISPATCHER.with(|current| current.get() != 0)
    }

    /// Queue a job
    ///
    /// Jobs run in posting order. If the worker is gone the job runs on the
    /// calling thread so it is never lost.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let rejected = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => None,
                Err(SendError(job)) => Some(job),
            },
            None => Some(job),
        };
        if let Some(job) = rejected {
            warn!(name = %self.name, "Dispatcher is not running, running job inline");
            job();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // closing the queue lets the worker drain and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if self.is_current() {
                return;
            }
            if worker.join().is_err() {
                error!(name = %self.name, "Dispatcher thread panicked");
            }
        }
    }
}
