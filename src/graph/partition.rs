use super::vertex::VertexId;

/// Deterministic bijection between global vertex ids and
/// `(partition, local id)` pairs.
///
/// Modulo mapping: partition `id % num_parts`, local id `id / num_parts`.
/// The mapping depends only on the partition count, so it is stable across
/// runs of the same configuration.
#[derive(Copy, Clone, Debug)]
pub struct Partitioner {
    num_parts: usize,
    num_vertices: usize,
}

impl Partitioner {
    pub fn new(num_parts: usize, num_vertices: usize) -> Self {
        Self {
            num_parts: num_parts.max(1),
            num_vertices,
        }
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn part_of(&self, id: VertexId) -> usize {
        id.0 as usize % self.num_parts
    }

    pub fn local_of(&self, id: VertexId) -> u32 {
        id.0 / self.num_parts as u32
    }

    pub fn global_of(&self, part: usize, local: u32) -> VertexId {
        VertexId(local * self.num_parts as u32 + part as u32)
    }

    /// Number of vertices owned by `part`.
    pub fn part_len(&self, part: usize) -> usize {
        debug_assert!(part < self.num_parts);
        if part >= self.num_vertices {
            return 0;
        }
        (self.num_vertices - part).div_ceil(self.num_parts)
    }

    /// NUMA node a partition's worker binds to.
    pub fn node_of(&self, part: usize, num_nodes: usize) -> usize {
        part % num_nodes.max(1)
    }
}
