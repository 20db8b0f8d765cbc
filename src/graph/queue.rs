//! Serial save queue
//!
//! Every save, remote merge and reload of a graph runs on one worker
//! thread, one task at a time, in submission order. The worker drains a
//! tokio unbounded channel with `blocking_recv`, so it needs no runtime and
//! can be fed from sync and async callers alike.

use super::context::GraphInner;
use super::store::GraphResult;
use super::transaction::CommitReport;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Weak};
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Completion callback of a fire-and-forget save
pub type Completion<T> = Box<dyn FnOnce(GraphResult<T>) + Send>;

/// How a task reports its result
pub enum Reply<T> {
    /// Run a callback on the worker, before observers are notified
    Callback(Completion<T>),
    /// Wake a thread blocked in a sync call, after observers are notified
    Blocking(std_mpsc::Sender<GraphResult<T>>),
    /// Resolve a future, after observers are notified
    Async(oneshot::Sender<GraphResult<T>>),
}

impl<T> Reply<T> {
    /// Deliver `result`, running `notify` at the point this reply kind
    /// promises relative to the result
    pub(crate) fn complete(self, result: GraphResult<T>, notify: impl FnOnce()) {
        match self {
            Reply::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    warn!("Save completion callback panicked");
                }
                notify();
            }
            Reply::Blocking(tx) => {
                notify();
                // The caller may have gone away; nothing to do then
                let _ = tx.send(result);
            }
            Reply::Async(tx) => {
                notify();
                let _ = tx.send(result);
            }
        }
    }
}

/// Work for the save worker
pub enum Task {
    /// Commit everything staged
    Save(Reply<CommitReport>),
    /// Fold in changes another writer committed to the record store
    MergeRemote(Reply<CommitReport>),
    /// Drop staged changes and rebuild from the record store
    Reload(Reply<()>),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Save(_) => "save",
            Task::MergeRemote(_) => "merge",
            Task::Reload(_) => "reload",
        }
    }
}

/// Sending side of a graph's save worker
///
/// Dropping the queue closes the channel, and the worker exits once it has
/// finished the tasks already queued.
#[derive(Debug)]
pub struct SaveQueue {
    sender: UnboundedSender<Task>,
}

/// Receiving side, until it is handed to a worker thread
pub(crate) struct Worker {
    receiver: UnboundedReceiver<Task>,
}

impl SaveQueue {
    pub(crate) fn new() -> (Self, Worker) {
        let (sender, receiver) = unbounded_channel();
        (SaveQueue { sender }, Worker { receiver })
    }

    /// Queue a task; hands it back when the worker is gone
    pub fn submit(&self, task: Task) -> Result<(), Task> {
        self.sender.send(task).map_err(|e| e.0)
    }
}

impl Worker {
    /// Start draining the queue on a dedicated thread
    ///
    /// The thread is never joined; it ends when the queue is dropped.
    pub(crate) fn start(self, name: &str, inner: Weak<GraphInner>) -> GraphResult<()> {
        let receiver = self.receiver;
        thread::Builder::new()
            .name(format!("{}-save", name))
            .spawn(move || run_worker(receiver, inner))?;
        Ok(())
    }
}

fn run_worker(mut receiver: UnboundedReceiver<Task>, inner: Weak<GraphInner>) {
    debug!("Save worker started");
    while let Some(task) = receiver.blocking_recv() {
        match inner.upgrade() {
            Some(graph) => graph.run_task(task),
            None => reject(task),
        }
    }
    debug!("Save worker stopped");
}

/// Fail a task whose graph no longer exists
pub(crate) fn reject(task: Task) {
    use super::store::GraphError::ContextUnavailable;
    match task {
        Task::Save(reply) | Task::MergeRemote(reply) => reply.complete(Err(ContextUnavailable), || {}),
        Task::Reload(reply) => reply.complete(Err(ContextUnavailable), || {}),
    }
}
