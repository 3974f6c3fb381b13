//! Iterative k-core peeling.
//!
//! A vertex whose current degree drops below `k` deletes itself and
//! multicasts the deletion to its neighbors, which decrement their degree on
//! reception. Peeling cascades level by level until no vertex changes.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::error::{EmberError, Result};
use crate::graph::{
    AdjacencyView, EdgeKind, Gate, GraphEngine, QueryContext, VertexId, VertexIndex,
    VertexProgram, VertexQuery, WorkerContext,
};

/// Per-vertex peeling state. The degree is the live edge count, decremented
/// as neighbors are peeled; it persists across successive k values.
pub struct KcoreVertex {
    degree: u32,
    deleted: bool,
}

impl KcoreVertex {
    pub fn degree(&self) -> u32 {
        self.degree
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Deletion notice multicast to every neighbor of a peeled vertex. The
/// sender's identity is irrelevant; reception just decrements the degree.
#[derive(Copy, Clone)]
pub struct DeleteMsg;

pub struct KcoreProgram {
    k: u32,
}

impl KcoreProgram {
    pub fn new(k: u32) -> Self {
        Self { k }
    }
}

impl VertexProgram for KcoreProgram {
    type Vertex = KcoreVertex;
    type Message = DeleteMsg;

    fn create_vertex(id: VertexId, index: &VertexIndex) -> KcoreVertex {
        KcoreVertex {
            degree: index.degree(id),
            deleted: false,
        }
    }

    fn run(
        &mut self,
        vertex: &mut KcoreVertex,
        _ctx: &mut WorkerContext<'_, DeleteMsg>,
    ) -> Result<Gate> {
        if vertex.deleted || vertex.degree >= self.k {
            return Ok(Gate::Halt);
        }
        Ok(Gate::RequestFull)
    }

    fn run_with_adjacency(
        &mut self,
        vertex: &mut KcoreVertex,
        adjacency: &AdjacencyView,
        ctx: &mut WorkerContext<'_, DeleteMsg>,
    ) -> Result<()> {
        if vertex.deleted {
            return Ok(());
        }
        if vertex.degree < self.k {
            vertex.deleted = true;
            ctx.multicast(adjacency.neighbors(EdgeKind::Both)?, DeleteMsg);
        }
        Ok(())
    }

    fn run_on_message(
        &mut self,
        vertex: &mut KcoreVertex,
        _msg: &DeleteMsg,
        _ctx: &mut WorkerContext<'_, DeleteMsg>,
    ) -> Result<()> {
        if !vertex.deleted {
            vertex.degree = vertex.degree.saturating_sub(1);
        }
        Ok(())
    }
}

/// Counts peeled vertices.
#[derive(Clone, Default)]
pub struct CountDeletedQuery {
    num: usize,
}

impl CountDeletedQuery {
    pub fn num(&self) -> usize {
        self.num
    }
}

impl VertexQuery<KcoreVertex> for CountDeletedQuery {
    fn run(&mut self, _ctx: &QueryContext<'_>, _id: VertexId, vertex: &KcoreVertex) {
        if vertex.is_deleted() {
            self.num += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        self.num += other.num;
    }
}

/// Maximum in+out degree over all vertices; the highest core any vertex can
/// belong to.
#[derive(Clone, Default)]
pub struct MaxDegreeQuery {
    max: u32,
}

impl MaxDegreeQuery {
    pub fn max(&self) -> u32 {
        self.max
    }
}

impl<V: Send + Sync> VertexQuery<V> for MaxDegreeQuery {
    fn run(&mut self, ctx: &QueryContext<'_>, id: VertexId, _vertex: &V) {
        self.max = self.max.max(ctx.degree(id));
    }

    fn merge(&mut self, other: Self) {
        self.max = self.max.max(other.max);
    }
}

/// Result of one peeling pass.
#[derive(Clone, Debug)]
pub struct KcoreOutcome {
    pub k: u32,
    pub alive: usize,
    pub seconds: f64,
}

/// Computes `kmax` as the maximum vertex degree.
pub fn compute_kmax(engine: &GraphEngine<KcoreProgram>) -> Result<u32> {
    Ok(engine.query_on_all(MaxDegreeQuery::default())?.max())
}

/// Peels the graph for every k in `[kmin, kmax]`, reusing vertex state
/// between passes. Returns one outcome per k.
pub fn run_kcore(
    engine: &GraphEngine<KcoreProgram>,
    kmin: u32,
    kmax: u32,
) -> Result<Vec<KcoreOutcome>> {
    if kmin < 2 {
        return Err(EmberError::Config(format!(
            "kmin must be at least 2, got {kmin}"
        )));
    }
    if kmax < kmin {
        return Err(EmberError::Config(format!(
            "kmax {kmax} is below kmin {kmin}"
        )));
    }
    let num_vertices = engine.num_vertices();
    let mut outcomes = Vec::with_capacity((kmax - kmin + 1) as usize);
    for k in kmin..=kmax {
        let start = Instant::now();
        engine.start(
            Arc::new(move |_id, vertex: &KcoreVertex| {
                !vertex.is_deleted() && vertex.degree() < k
            }),
            Arc::new(move |_worker| KcoreProgram::new(k)),
        );
        engine.wait4complete()?;
        let seconds = start.elapsed().as_secs_f64();
        let deleted = engine.query_on_all(CountDeletedQuery::default())?.num();
        let alive = num_vertices - deleted;
        info!(k, alive, seconds, "k-core pass finished");
        outcomes.push(KcoreOutcome { k, alive, seconds });
    }
    Ok(outcomes)
}
