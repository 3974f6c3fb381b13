use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::partition::Partitioner;
use super::vertex::VertexId;

/// Partitioned in-memory array of per-vertex compute state.
///
/// Each partition's vector is owned by the worker bound to it: every
/// mutation happens on that worker while it holds the write guard for the
/// duration of a level phase. Queries take read guards between runs.
pub struct VertexStore<V> {
    partitioner: Partitioner,
    parts: Vec<RwLock<Vec<V>>>,
}

impl<V: Send + Sync> VertexStore<V> {
    pub fn new(partitioner: Partitioner, mut create: impl FnMut(VertexId) -> V) -> Self {
        let mut parts = Vec::with_capacity(partitioner.num_parts());
        for part in 0..partitioner.num_parts() {
            let len = partitioner.part_len(part);
            let mut vertices = Vec::with_capacity(len);
            for local in 0..len as u32 {
                vertices.push(create(partitioner.global_of(part, local)));
            }
            parts.push(RwLock::new(vertices));
        }
        Self { partitioner, parts }
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn num_vertices(&self) -> usize {
        self.partitioner.num_vertices()
    }

    pub fn write_partition(&self, part: usize) -> RwLockWriteGuard<'_, Vec<V>> {
        self.parts[part].write()
    }

    pub fn read_partition(&self, part: usize) -> RwLockReadGuard<'_, Vec<V>> {
        self.parts[part].read()
    }

    /// Reads a single vertex. Intended for inspection outside the level
    /// loop; workers use partition guards instead.
    pub fn with_vertex<R>(&self, id: VertexId, f: impl FnOnce(&V) -> R) -> R {
        let part = self.partitioner.part_of(id);
        let local = self.partitioner.local_of(id) as usize;
        let guard = self.parts[part].read();
        f(&guard[local])
    }
}
