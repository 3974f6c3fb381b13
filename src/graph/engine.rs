use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use super::index::VertexIndex;
use super::message::MessageFabric;
use super::partition::Partitioner;
use super::program::{ProgramFactory, VertexFilter, VertexInitiator, VertexProgram, VertexScheduler};
use super::query::{QueryContext, VertexQuery};
use super::state::VertexStore;
use super::vertex::VertexId;
use super::worker;
use crate::config::GraphConfig;
use crate::error::{EmberError, Result};
use crate::io::{CacheStats, FileId, IoFactory, IoStats};
use crate::runtime::Runtime;

/// How the initial active set of a run is produced.
pub(crate) enum Activation<V> {
    All,
    Ids(Arc<Vec<VertexId>>),
    Filter(VertexFilter<V>),
}

impl<V> Clone for Activation<V> {
    fn clone(&self) -> Self {
        match self {
            Activation::All => Activation::All,
            Activation::Ids(ids) => Activation::Ids(Arc::clone(ids)),
            Activation::Filter(filter) => Activation::Filter(Arc::clone(filter)),
        }
    }
}

pub(crate) struct RunRequest<P: VertexProgram> {
    pub(crate) activation: Activation<P::Vertex>,
    pub(crate) factory: ProgramFactory<P>,
    pub(crate) initiator: Option<VertexInitiator<P::Vertex>>,
}

impl<P: VertexProgram> Clone for RunRequest<P> {
    fn clone(&self) -> Self {
        Self {
            activation: self.activation.clone(),
            factory: Arc::clone(&self.factory),
            initiator: self.initiator.clone(),
        }
    }
}

pub(crate) struct ControlState<P: VertexProgram> {
    pub(crate) epoch: u64,
    pub(crate) request: Option<RunRequest<P>>,
    pub(crate) shutdown: bool,
}

pub(crate) struct Control<P: VertexProgram> {
    pub(crate) state: Mutex<ControlState<P>>,
    pub(crate) changed: Condvar,
}

pub(crate) struct DoneGate {
    pub(crate) epoch: Mutex<u64>,
    pub(crate) changed: Condvar,
}

/// State shared between the engine handle and its worker threads.
pub(crate) struct EngineShared<P: VertexProgram> {
    pub(crate) config: GraphConfig,
    pub(crate) index: Arc<VertexIndex>,
    pub(crate) partitioner: Partitioner,
    pub(crate) store: VertexStore<P::Vertex>,
    pub(crate) fabric: Arc<MessageFabric<P::Message>>,
    pub(crate) io: Arc<IoFactory>,
    pub(crate) graph_file: FileId,
    pub(crate) barrier1: Barrier,
    pub(crate) barrier2: Barrier,
    pub(crate) remaining_in_level: AtomicUsize,
    pub(crate) next_count: AtomicUsize,
    pub(crate) level: AtomicUsize,
    pub(crate) complete: AtomicBool,
    pub(crate) error: Mutex<Option<EmberError>>,
    pub(crate) scheduler: Mutex<Option<Arc<dyn VertexScheduler>>>,
    pub(crate) control: Control<P>,
    pub(crate) done: DoneGate,
}

impl<P: VertexProgram> EngineShared<P> {
    /// Publishes the first worker-local error of a run. Later errors are
    /// dropped; every worker checks the slot at the barriers and unwinds.
    pub(crate) fn fail(&self, err: EmberError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            warn!(error = %err, "engine run failed");
            *slot = Some(err);
        }
    }

    pub(crate) fn failed(&self) -> bool {
        self.error.lock().is_some()
    }

    /// Collective decision at barrier 2: swaps the accumulated next-level
    /// count in and reports whether the run is finished (no active vertices
    /// for the upcoming level, or a published error).
    pub(crate) fn progress_next_level(&self) -> bool {
        let total = self.next_count.swap(0, Ordering::SeqCst);
        let done = total == 0 || self.failed();
        self.remaining_in_level.store(total, Ordering::SeqCst);
        self.complete.store(done, Ordering::SeqCst);
        done
    }
}

/// Bulk-synchronous vertex-centric execution engine.
///
/// Constructed once per (graph file, index file) pair; worker threads are
/// spawned at construction, one per partition, and persist across runs.
/// `start*` seeds the initial active set and `wait4complete` blocks until
/// global quiescence.
pub struct GraphEngine<P: VertexProgram> {
    shared: Arc<EngineShared<P>>,
    threads: Vec<JoinHandle<()>>,
}

impl<P: VertexProgram> GraphEngine<P> {
    pub fn create(
        runtime: &Arc<Runtime>,
        graph_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let config = runtime.config().clone();
        let num_workers = config.num_threads.max(1);
        let index = Arc::new(VertexIndex::load(index_path)?);
        let partitioner = Partitioner::new(num_workers, index.num_vertices());
        let store = {
            let index = Arc::clone(&index);
            VertexStore::new(partitioner, move |id| P::create_vertex(id, &index))
        };
        let io = IoFactory::new(Arc::clone(runtime.cache()), num_workers, config.io_threads);
        let graph_file = io.open_file(graph_path)?;

        let shared = Arc::new(EngineShared {
            config,
            index,
            partitioner,
            store,
            fabric: MessageFabric::new(num_workers),
            io,
            graph_file,
            barrier1: Barrier::new(num_workers),
            barrier2: Barrier::new(num_workers),
            remaining_in_level: AtomicUsize::new(0),
            next_count: AtomicUsize::new(0),
            level: AtomicUsize::new(0),
            complete: AtomicBool::new(false),
            error: Mutex::new(None),
            scheduler: Mutex::new(None),
            control: Control {
                state: Mutex::new(ControlState {
                    epoch: 0,
                    request: None,
                    shutdown: false,
                }),
                changed: Condvar::new(),
            },
            done: DoneGate {
                epoch: Mutex::new(0),
                changed: Condvar::new(),
            },
        });

        let mut threads = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let shared = Arc::clone(&shared);
            let node = shared
                .partitioner
                .node_of(worker_id, shared.config.num_nodes);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("ember-worker-{worker_id}-node{node}"))
                    .spawn(move || worker::worker_main(shared, worker_id))
                    .map_err(EmberError::from)?,
            );
        }
        info!(
            num_vertices = shared.index.num_vertices(),
            num_workers,
            directed = shared.index.is_directed(),
            "graph engine created"
        );
        Ok(Self { shared, threads })
    }

    /// Starts a run whose initial active set is the vertices matched by
    /// `filter`, evaluated in parallel over all vertices.
    pub fn start(&self, filter: VertexFilter<P::Vertex>, factory: ProgramFactory<P>) {
        self.start_request(RunRequest {
            activation: Activation::Filter(filter),
            factory,
            initiator: None,
        });
    }

    /// Starts a run activating exactly `ids` (coalesced if repeated).
    pub fn start_ids(
        &self,
        ids: Vec<VertexId>,
        initiator: Option<VertexInitiator<P::Vertex>>,
        factory: ProgramFactory<P>,
    ) {
        self.start_request(RunRequest {
            activation: Activation::Ids(Arc::new(ids)),
            factory,
            initiator,
        });
    }

    /// Starts a run with every vertex active in level 0.
    pub fn start_all(
        &self,
        initiator: Option<VertexInitiator<P::Vertex>>,
        factory: ProgramFactory<P>,
    ) {
        self.start_request(RunRequest {
            activation: Activation::All,
            factory,
            initiator,
        });
    }

    fn start_request(&self, request: RunRequest<P>) {
        let mut state = self.shared.control.state.lock();
        debug_assert_eq!(
            *self.shared.done.epoch.lock(),
            state.epoch,
            "start called while a run is in flight"
        );
        *self.shared.error.lock() = None;
        self.shared.complete.store(false, Ordering::SeqCst);
        self.shared.level.store(0, Ordering::SeqCst);
        self.shared.remaining_in_level.store(0, Ordering::SeqCst);
        self.shared.next_count.store(0, Ordering::SeqCst);
        state.epoch += 1;
        state.request = Some(request);
        self.shared.control.changed.notify_all();
    }

    /// Blocks until the current run reaches quiescence, returning the run's
    /// outcome.
    pub fn wait4complete(&self) -> Result<()> {
        let target = self.shared.control.state.lock().epoch;
        let mut done = self.shared.done.epoch.lock();
        while *done < target {
            self.shared.done.changed.wait(&mut done);
        }
        drop(done);
        match &*self.shared.error.lock() {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    /// Parallel map-reduce over all vertices, independent of the level
    /// loop. Clones `query` per partition and folds the clones with
    /// `merge`.
    pub fn query_on_all<Q: VertexQuery<P::Vertex>>(&self, query: Q) -> Result<Q> {
        let shared = &self.shared;
        let num_parts = shared.partitioner.num_parts();
        let results: Vec<std::thread::Result<Q>> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(num_parts);
            for part in 0..num_parts {
                let mut clone = query.clone();
                handles.push(scope.spawn(move || {
                    let ctx = QueryContext {
                        index: &shared.index,
                    };
                    let vertices = shared.store.read_partition(part);
                    for (local, vertex) in vertices.iter().enumerate() {
                        let id = shared.partitioner.global_of(part, local as u32);
                        clone.run(&ctx, id, vertex);
                    }
                    clone
                }));
            }
            handles.into_iter().map(|handle| handle.join()).collect()
        });
        let mut merged: Option<Q> = None;
        for result in results {
            let clone =
                result.map_err(|_| EmberError::Engine("query worker panicked".to_string()))?;
            match merged.as_mut() {
                None => merged = Some(clone),
                Some(acc) => acc.merge(clone),
            }
        }
        merged.ok_or(EmberError::Invalid("query ran over zero partitions"))
    }

    /// Installs a custom within-partition processing order for subsequent
    /// levels.
    pub fn set_vertex_scheduler(&self, scheduler: Arc<dyn VertexScheduler>) {
        *self.shared.scheduler.lock() = Some(scheduler);
    }

    pub fn num_vertices(&self) -> usize {
        self.shared.index.num_vertices()
    }

    pub fn is_directed(&self) -> bool {
        self.shared.index.is_directed()
    }

    pub fn min_vertex_id(&self) -> VertexId {
        self.shared.index.min_vertex_id()
    }

    pub fn max_vertex_id(&self) -> VertexId {
        self.shared.index.max_vertex_id()
    }

    /// In+out edge count of `id` from the index.
    pub fn vertex_edges(&self, id: VertexId) -> u32 {
        self.shared.index.degree(id)
    }

    /// The level most recently dispatched.
    pub fn curr_level(&self) -> usize {
        self.shared.level.load(Ordering::SeqCst)
    }

    /// Reads one vertex's state. Valid between runs.
    pub fn with_vertex<R>(&self, id: VertexId, f: impl FnOnce(&P::Vertex) -> R) -> R {
        self.shared.store.with_vertex(id, f)
    }

    pub fn io_stats(&self) -> IoStats {
        self.shared.io.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.io.cache_stats()
    }
}

impl<P: VertexProgram> Drop for GraphEngine<P> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.control.state.lock();
            state.shutdown = true;
            self.shared.control.changed.notify_all();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
