use std::sync::Arc;

use super::index::VertexIndex;
use super::message::SendBuffers;
use super::vertex::{AdjacencyView, EdgeKind, VertexId};
use crate::error::Result;

/// Outcome of the first (adjacency-free) run phase of a vertex.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Gate {
    /// The vertex is done for this level; no I/O is issued.
    Halt,
    /// Stream the whole adjacency blob and call `run_with_adjacency`.
    RequestFull,
    /// Stream only the in- or out-edge slice. Directed graphs only;
    /// `EdgeKind::Both` is rejected (use [`Gate::RequestFull`]).
    RequestPartial(EdgeKind),
}

/// The capability contract a vertex-centric algorithm implements.
///
/// One program instance exists per worker, created through the factory
/// passed to `start`; per-worker scratch lives on the program itself and is
/// merged at level boundaries through the fabric.
pub trait VertexProgram: Send + Sized + 'static {
    /// Per-vertex compute state, created once at engine construction.
    type Vertex: Send + Sync + 'static;
    /// Fixed-size message record.
    type Message: Copy + Send + 'static;

    fn create_vertex(id: VertexId, index: &VertexIndex) -> Self::Vertex;

    /// First phase: cheap gating without adjacency data.
    fn run(
        &mut self,
        vertex: &mut Self::Vertex,
        ctx: &mut WorkerContext<'_, Self::Message>,
    ) -> Result<Gate>;

    /// Second phase, invoked when the requested adjacency I/O completes.
    /// The view is only valid for the duration of this call.
    fn run_with_adjacency(
        &mut self,
        vertex: &mut Self::Vertex,
        adjacency: &AdjacencyView,
        ctx: &mut WorkerContext<'_, Self::Message>,
    ) -> Result<()>;

    /// Delivered at the start of the next level, before that level's `run`
    /// for the same vertex.
    fn run_on_message(
        &mut self,
        vertex: &mut Self::Vertex,
        msg: &Self::Message,
        ctx: &mut WorkerContext<'_, Self::Message>,
    ) -> Result<()>;

    /// Invoked on every vertex that ran this level, after the level's work
    /// completes but before the barrier.
    fn notify_iteration_end(
        &mut self,
        _vertex: &mut Self::Vertex,
        _ctx: &mut WorkerContext<'_, Self::Message>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Creates the per-worker program instances for one run.
pub type ProgramFactory<P> = Arc<dyn Fn(usize) -> P + Send + Sync>;

/// Initial-activation predicate evaluated in parallel over all vertices.
pub type VertexFilter<V> = Arc<dyn Fn(VertexId, &V) -> bool + Send + Sync>;

/// Re-initializes vertex state on activation at `start`.
pub type VertexInitiator<V> = Arc<dyn Fn(VertexId, &mut V) + Send + Sync>;

/// Reorders the ids a worker processes within a level. The default order is
/// the partition-local queue order.
pub trait VertexScheduler: Send + Sync + 'static {
    fn schedule(&self, vertices: &mut Vec<VertexId>);
}

/// Engine surface visible to vertex callbacks. Borrowed per invocation so
/// callbacks never hold a reference back into the engine.
pub struct WorkerContext<'a, M: Copy + Send + 'static> {
    pub(crate) worker: usize,
    pub(crate) level: usize,
    pub(crate) vertex: VertexId,
    pub(crate) index: &'a VertexIndex,
    pub(crate) sends: &'a mut SendBuffers<M>,
}

impl<M: Copy + Send + 'static> WorkerContext<'_, M> {
    pub fn worker_id(&self) -> usize {
        self.worker
    }

    /// The level currently executing.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Id of the vertex the current callback runs for.
    pub fn vertex_id(&self) -> VertexId {
        self.vertex
    }

    pub fn num_vertices(&self) -> usize {
        self.index.num_vertices()
    }

    pub fn is_directed(&self) -> bool {
        self.index.is_directed()
    }

    pub fn num_in_edges(&self, id: VertexId) -> u32 {
        self.index.num_in_edges(id)
    }

    pub fn num_out_edges(&self, id: VertexId) -> u32 {
        self.index.num_out_edges(id)
    }

    /// In+out edge count of `id` from the index.
    pub fn degree(&self, id: VertexId) -> u32 {
        self.index.degree(id)
    }

    /// Sends `msg` to `dst`, visible in the next level.
    pub fn send(&mut self, dst: VertexId, msg: M) {
        self.sends.send(dst, msg);
    }

    /// Sends `msg` once per neighbor produced by the edge iterator.
    pub fn multicast(&mut self, targets: impl IntoIterator<Item = VertexId>, msg: M) {
        self.sends.multicast(targets, msg);
    }

    /// Explicitly activates `id` for the next level, in addition to
    /// message-driven activation.
    pub fn add_active_next_itr(&mut self, id: VertexId) {
        self.sends.activate(id);
    }
}
