//! The graph context
//!
//! A [`Graph`] owns the working state, the record store, the watch registry
//! and the save worker. Clones share all of it. Node handles only hold a
//! weak reference, so they never keep a graph alive.

use super::handle::{Action, Entity, NodeHandle, Relationship};
use super::node::NodeRecord;
use super::queue::{reject, Reply, SaveQueue, Task};
use super::store::{relationship_links, GraphError, GraphResult, GraphStore};
use super::transaction::{lower, CommitReport};
use super::types::{NodeClass, NodeId};
use super::watch::{GraphObserver, ObserverId, Watch, WatchRegistry};
use super::event::ChangeEvent;
use crate::config::GraphConfig;
use crate::persistence::{assemble, MemoryStore, RecordStore, RocksStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Shared state behind a [`Graph`]
pub struct GraphInner {
    config: GraphConfig,
    store: Arc<dyn RecordStore>,
    state: Mutex<GraphStore>,
    registry: Mutex<WatchRegistry>,
    queue: SaveQueue,
    closed: AtomicBool,
}

impl GraphInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, GraphStore> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registry(&self) -> MutexGuard<'_, WatchRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn submit(&self, task: Task) {
        if self.is_closed() {
            reject(task);
            return;
        }
        if let Err(task) = self.queue.submit(task) {
            reject(task);
        }
    }

    /// Run one queued task; called on the save worker only
    pub(crate) fn run_task(&self, task: Task) {
        debug!("Running {} task", task.name());
        if self.is_closed() {
            reject(task);
            return;
        }
        match task {
            Task::Save(reply) => match self.commit_staged() {
                Ok((report, events)) => reply.complete(Ok(report), || self.notify(&events)),
                Err(e) => reply.complete(Err(e), || {}),
            },
            Task::MergeRemote(reply) => match self.merge_remote() {
                Ok((report, events)) => reply.complete(Ok(report), || self.notify(&events)),
                Err(e) => reply.complete(Err(e), || {}),
            },
            Task::Reload(reply) => reply.complete(self.reload_state(), || {}),
        }
    }

    /// Commit every staged change as one batch
    ///
    /// The state lock is held across the store commit so no mutation can
    /// slip in between the diff and advancing the committed image. On
    /// failure nothing is advanced and the changes stay staged.
    fn commit_staged(&self) -> GraphResult<(CommitReport, Vec<ChangeEvent>)> {
        let mut state = self.lock_state();
        if !state.has_changes() {
            return Ok((CommitReport::default(), Vec::new()));
        }

        let changes = state.pending_changes();
        if changes.is_empty() {
            // Only nodes created and deleted since the last commit
            state.mark_committed();
            return Ok((CommitReport::default(), Vec::new()));
        }

        let lowered = lower(&changes, false);
        self.store.commit(lowered.batch).map_err(GraphError::CommitFailed)?;
        state.mark_committed();
        drop(state);

        if self.config.log_commits {
            info!(
                "{}: committed {} inserted, {} updated, {} deleted ({} records)",
                self.config.name,
                lowered.report.inserted.len(),
                lowered.report.updated.len(),
                lowered.report.deleted.len(),
                lowered.report.records
            );
        }
        Ok((lowered.report, lowered.events))
    }

    fn merge_remote(&self) -> GraphResult<(CommitReport, Vec<ChangeEvent>)> {
        let remote = assemble(self.store.load()?);
        let changes = self.lock_state().merge_remote(remote);
        let mut lowered = lower(&changes, true);
        lowered.report.records = 0;

        if !changes.is_empty() {
            info!(
                "{}: merged {} remote change(s) from the record store",
                self.config.name,
                changes.len()
            );
        }
        Ok((lowered.report, lowered.events))
    }

    fn reload_state(&self) -> GraphResult<()> {
        let nodes = assemble(self.store.load()?);
        let count = nodes.len();
        *self.lock_state() = GraphStore::from_committed(nodes);
        info!("{}: reloaded {} node(s) from the record store", self.config.name, count);
        Ok(())
    }

    /// Deliver events to observers; no locks are held while they run
    fn notify(&self, events: &[ChangeEvent]) {
        if !self.config.dispatch_events || events.is_empty() {
            return;
        }
        let dispatcher = self.lock_registry().snapshot();
        let calls = dispatcher.dispatch(events);
        debug!("Dispatched {} event(s) with {} observer call(s)", events.len(), calls);
    }
}

/// An object graph bound to one record store
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Open a graph over `store`, loading everything it holds
    pub fn open(store: Arc<dyn RecordStore>, config: GraphConfig) -> GraphResult<Self> {
        let nodes = assemble(store.load()?);
        info!("{}: opened graph with {} node(s)", config.name, nodes.len());

        let (queue, worker) = SaveQueue::new();
        let name = config.name.clone();
        let inner = Arc::new(GraphInner {
            config,
            store,
            state: Mutex::new(GraphStore::from_committed(nodes)),
            registry: Mutex::new(WatchRegistry::new()),
            queue,
            closed: AtomicBool::new(false),
        });
        worker.start(&name, Arc::downgrade(&inner))?;

        Ok(Graph { inner })
    }

    /// Open the store `config` describes: RocksDB when a data path is set,
    /// memory otherwise
    pub fn from_config(config: GraphConfig) -> GraphResult<Self> {
        let store: Arc<dyn RecordStore> = match &config.data_path {
            Some(path) => Arc::new(RocksStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::open(store, config)
    }

    /// An empty graph over a fresh [`MemoryStore`]
    pub fn in_memory() -> GraphResult<Self> {
        Self::open(Arc::new(MemoryStore::new()), GraphConfig::default())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub fn record_store(&self) -> Arc<dyn RecordStore> {
        self.inner.store.clone()
    }

    /// Close the graph: later mutations are ignored and saves fail with
    /// [`GraphError::ContextUnavailable`]
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("{}: graph closed", self.inner.config.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn ensure_open(&self) -> GraphResult<()> {
        if self.is_closed() {
            return Err(GraphError::ContextUnavailable);
        }
        Ok(())
    }

    fn handle(&self, node: &NodeRecord) -> NodeHandle {
        NodeHandle::new(Arc::downgrade(&self.inner), node)
    }

    fn create(&self, node: NodeRecord) -> GraphResult<NodeHandle> {
        self.ensure_open()?;
        let handle = self.handle(&node);
        self.inner.lock_state().insert_node(node);
        Ok(handle)
    }

    /// Stage a new entity
    pub fn create_entity(&self, node_type: impl Into<String>) -> GraphResult<Entity> {
        self.create(NodeRecord::entity(node_type)).map(Entity::from_handle)
    }

    /// Stage a new action with no subjects or objects
    pub fn create_action(&self, node_type: impl Into<String>) -> GraphResult<Action> {
        self.create(NodeRecord::action(node_type)).map(Action::from_handle)
    }

    /// Stage a new relationship between two live entities of this graph
    pub fn create_relationship(
        &self,
        node_type: impl Into<String>,
        subject: &Entity,
        object: &Entity,
    ) -> GraphResult<Relationship> {
        self.ensure_open()?;
        for endpoint in [subject, object] {
            if !endpoint.belongs_to(&self.inner) {
                return Err(GraphError::InvalidRelationshipEndpoint(format!(
                    "entity {} belongs to another graph",
                    endpoint.id()
                )));
            }
        }

        let mut state = self.inner.lock_state();
        let links = relationship_links(&state, subject.id(), object.id())?;
        let node = NodeRecord::with_links(node_type, links);
        let handle = self.handle(&node);
        state.insert_node(node);
        Ok(Relationship::from_handle(handle))
    }

    /// Handle for a live node
    pub fn node(&self, id: NodeId) -> GraphResult<NodeHandle> {
        self.ensure_open()?;
        let state = self.inner.lock_state();
        let node = state.node(id).ok_or(GraphError::NodeNotFound(id))?;
        Ok(self.handle(node))
    }

    fn typed(&self, id: NodeId, class: NodeClass) -> GraphResult<NodeHandle> {
        self.ensure_open()?;
        let state = self.inner.lock_state();
        let node = state.expect_class(id, class)?;
        Ok(self.handle(node))
    }

    pub fn entity(&self, id: NodeId) -> GraphResult<Entity> {
        self.typed(id, NodeClass::Entity).map(Entity::from_handle)
    }

    pub fn action(&self, id: NodeId) -> GraphResult<Action> {
        self.typed(id, NodeClass::Action).map(Action::from_handle)
    }

    pub fn relationship(&self, id: NodeId) -> GraphResult<Relationship> {
        self.typed(id, NodeClass::Relationship).map(Relationship::from_handle)
    }

    /// Live nodes of one class and type, oldest first
    pub fn search(&self, class: NodeClass, node_type: &str) -> GraphResult<Vec<NodeHandle>> {
        self.ensure_open()?;
        let state = self.inner.lock_state();
        Ok(state
            .search(class, node_type)
            .into_iter()
            .filter_map(|id| state.node(id))
            .map(|node| self.handle(node))
            .collect())
    }

    pub fn entities(&self, node_type: &str) -> GraphResult<Vec<Entity>> {
        Ok(self
            .search(NodeClass::Entity, node_type)?
            .into_iter()
            .map(Entity::from_handle)
            .collect())
    }

    pub fn actions(&self, node_type: &str) -> GraphResult<Vec<Action>> {
        Ok(self
            .search(NodeClass::Action, node_type)?
            .into_iter()
            .map(Action::from_handle)
            .collect())
    }

    pub fn relationships(&self, node_type: &str) -> GraphResult<Vec<Relationship>> {
        Ok(self
            .search(NodeClass::Relationship, node_type)?
            .into_iter()
            .map(Relationship::from_handle)
            .collect())
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock_state().node_count()
    }

    /// True when something is staged for the next save
    pub fn has_changes(&self) -> bool {
        self.inner.lock_state().has_changes()
    }

    /// Commit everything staged and wait for it
    ///
    /// Returns after observers have been notified. Must not be called from
    /// an observer or completion callback, which run on the save worker.
    pub fn save(&self) -> GraphResult<CommitReport> {
        self.call(Task::Save)
    }

    /// Commit everything staged; resolves after observers have been notified
    pub async fn commit(&self) -> GraphResult<CommitReport> {
        self.call_async(Task::Save).await
    }

    /// Commit everything staged without waiting
    ///
    /// `completion` runs on the save worker, before observers are notified.
    pub fn save_with<F>(&self, completion: F)
    where
        F: FnOnce(GraphResult<CommitReport>) + Send + 'static,
    {
        self.inner.submit(Task::Save(Reply::Callback(Box::new(completion))));
    }

    /// Fold in changes other writers committed to the shared record store
    ///
    /// Observers see the resulting events with `from_cloud` set.
    pub fn merge_remote_changes(&self) -> GraphResult<CommitReport> {
        self.call(Task::MergeRemote)
    }

    pub async fn merge_remote_changes_async(&self) -> GraphResult<CommitReport> {
        self.call_async(Task::MergeRemote).await
    }

    /// Drop everything staged and rebuild from the record store
    pub fn reload(&self) -> GraphResult<()> {
        self.call(Task::Reload)
    }

    fn call<T>(&self, task: impl FnOnce(Reply<T>) -> Task) -> GraphResult<T> {
        self.ensure_open()?;
        let (tx, rx) = std_mpsc::channel();
        self.inner.submit(task(Reply::Blocking(tx)));
        rx.recv().map_err(|_| GraphError::ContextUnavailable)?
    }

    async fn call_async<T>(&self, task: impl FnOnce(Reply<T>) -> Task) -> GraphResult<T> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        self.inner.submit(task(Reply::Async(tx)));
        rx.await.map_err(|_| GraphError::ContextUnavailable)?
    }

    /// Register an observer; it receives nothing until it has a watch
    pub fn subscribe<O>(&self, observer: O) -> ObserverId
    where
        O: GraphObserver + 'static,
    {
        self.inner.lock_registry().subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.lock_registry().unsubscribe(id)
    }

    /// Add a predicate to an observer; predicates accumulate
    pub fn watch(&self, id: ObserverId, watch: Watch) -> GraphResult<()> {
        if self.inner.lock_registry().watch(id, watch) {
            Ok(())
        } else {
            Err(GraphError::UnknownObserver(id))
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.inner.config.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
