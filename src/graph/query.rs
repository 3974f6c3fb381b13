use super::index::VertexIndex;
use super::vertex::VertexId;

/// Engine surface visible to queries.
pub struct QueryContext<'a> {
    pub(crate) index: &'a VertexIndex,
}

impl QueryContext<'_> {
    pub fn num_vertices(&self) -> usize {
        self.index.num_vertices()
    }

    pub fn is_directed(&self) -> bool {
        self.index.is_directed()
    }

    /// In+out edge count of `id` from the index.
    pub fn degree(&self, id: VertexId) -> u32 {
        self.index.degree(id)
    }

    pub fn num_in_edges(&self, id: VertexId) -> u32 {
        self.index.num_in_edges(id)
    }

    pub fn num_out_edges(&self, id: VertexId) -> u32 {
        self.index.num_out_edges(id)
    }
}

/// A parallel fold over all vertices, independent of the level loop.
///
/// `query_on_all` clones the query per partition, runs each clone over that
/// partition's vertices, then reduces the clones pairwise with `merge`.
/// The merge must be associative and commutative.
pub trait VertexQuery<V>: Clone + Send {
    fn run(&mut self, ctx: &QueryContext<'_>, id: VertexId, vertex: &V);
    fn merge(&mut self, other: Self);
}
