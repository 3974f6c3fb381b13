use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;

use super::vertex::VertexId;
use crate::error::{EmberError, Result};

const INDEX_MAGIC: [u8; 4] = *b"EMBX";
const INDEX_VERSION: u16 = 1;
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 16;

const FLAG_DIRECTED: u16 = 1;

/// Location and shape of one vertex's adjacency blob in the graph file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VertexInfo {
    pub offset: u64,
    pub size: u32,
    pub num_in: u32,
    pub num_out: u32,
}

#[derive(Copy, Clone, Debug)]
struct Entry {
    offset: u64,
    num_in: u32,
    num_out: u32,
}

/// Random-access map from vertex id to its adjacency location and edge
/// counts. Loaded fully into memory; the graph file itself is streamed.
#[derive(Debug)]
pub struct VertexIndex {
    directed: bool,
    entries: Vec<Entry>,
}

impl VertexIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < HEADER_LEN {
            return Err(EmberError::Corruption("index file shorter than header"));
        }
        if bytes[0..4] != INDEX_MAGIC {
            return Err(EmberError::Corruption("bad index magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != INDEX_VERSION {
            return Err(EmberError::Corruption("unsupported index version"));
        }
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let num_vertices = u64::from_le_bytes(bytes[8..16].try_into().expect("header slice"));
        let expected = HEADER_LEN as u64 + num_vertices * ENTRY_LEN as u64;
        if bytes.len() as u64 != expected {
            return Err(EmberError::Corruption("index entry table truncated"));
        }
        let mut entries = Vec::with_capacity(num_vertices as usize);
        let mut prev_end = 0u64;
        for i in 0..num_vertices as usize {
            let at = HEADER_LEN + i * ENTRY_LEN;
            let entry = Entry {
                offset: u64::from_le_bytes(bytes[at..at + 8].try_into().expect("entry slice")),
                num_in: u32::from_le_bytes(bytes[at + 8..at + 12].try_into().expect("entry slice")),
                num_out: u32::from_le_bytes(
                    bytes[at + 12..at + 16].try_into().expect("entry slice"),
                ),
            };
            // Blobs are packed in id order; overlaps mean a broken index.
            if entry.offset < prev_end {
                return Err(EmberError::Corruption("index offsets not monotonic"));
            }
            prev_end = entry.offset + 4 * (entry.num_in as u64 + entry.num_out as u64);
            entries.push(entry);
        }
        info!(
            num_vertices,
            directed = flags & FLAG_DIRECTED != 0,
            "vertex index loaded"
        );
        Ok(Self {
            directed: flags & FLAG_DIRECTED != 0,
            entries,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.entries.len()
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn min_vertex_id(&self) -> VertexId {
        VertexId(0)
    }

    pub fn max_vertex_id(&self) -> VertexId {
        VertexId(self.entries.len().saturating_sub(1) as u32)
    }

    fn entry(&self, id: VertexId) -> &Entry {
        &self.entries[id.0 as usize]
    }

    pub fn num_in_edges(&self, id: VertexId) -> u32 {
        self.entry(id).num_in
    }

    pub fn num_out_edges(&self, id: VertexId) -> u32 {
        self.entry(id).num_out
    }

    /// Total in+out edge count from the index.
    pub fn degree(&self, id: VertexId) -> u32 {
        let entry = self.entry(id);
        entry.num_in + entry.num_out
    }

    /// Size in bytes of the vertex's adjacency blob in the graph file.
    pub fn ext_mem_size(&self, id: VertexId) -> u32 {
        let entry = self.entry(id);
        4 * (entry.num_in + entry.num_out)
    }

    pub fn vertex_info(&self, id: VertexId) -> VertexInfo {
        let entry = self.entry(id);
        VertexInfo {
            offset: entry.offset,
            size: 4 * (entry.num_in + entry.num_out),
            num_in: entry.num_in,
            num_out: entry.num_out,
        }
    }
}

/// Writes a graph file plus its index from an in-memory edge list.
///
/// Directed blobs hold in-neighbors then out-neighbors, `u32` LE each.
/// A directed self-loop is recorded in the out-list only, so the vertex's
/// degree counts it once.
pub struct GraphBuilder {
    directed: bool,
    ins: Vec<Vec<u32>>,
    outs: Vec<Vec<u32>>,
}

impl GraphBuilder {
    pub fn directed(num_vertices: u32) -> Self {
        Self {
            directed: true,
            ins: vec![Vec::new(); num_vertices as usize],
            outs: vec![Vec::new(); num_vertices as usize],
        }
    }

    pub fn undirected(num_vertices: u32) -> Self {
        Self {
            directed: false,
            ins: vec![Vec::new(); num_vertices as usize],
            outs: vec![Vec::new(); num_vertices as usize],
        }
    }

    pub fn add_edge(&mut self, src: VertexId, dst: VertexId) -> Result<&mut Self> {
        let n = self.outs.len() as u32;
        if src.0 >= n || dst.0 >= n {
            return Err(EmberError::Invalid("edge endpoint out of range"));
        }
        if self.directed {
            self.outs[src.0 as usize].push(dst.0);
            if src != dst {
                self.ins[dst.0 as usize].push(src.0);
            }
        } else {
            self.outs[src.0 as usize].push(dst.0);
            if src != dst {
                self.outs[dst.0 as usize].push(src.0);
            }
        }
        Ok(self)
    }

    pub fn write(
        &self,
        graph_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
    ) -> Result<()> {
        let num_vertices = self.outs.len();
        let mut graph = fs::File::create(graph_path.as_ref())?;
        let mut index = Vec::with_capacity(HEADER_LEN + num_vertices * ENTRY_LEN);
        index.extend_from_slice(&INDEX_MAGIC);
        index.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        let flags: u16 = if self.directed { FLAG_DIRECTED } else { 0 };
        index.extend_from_slice(&flags.to_le_bytes());
        index.extend_from_slice(&(num_vertices as u64).to_le_bytes());

        let mut offset = 0u64;
        let mut blob = Vec::new();
        for v in 0..num_vertices {
            blob.clear();
            for &neighbor in self.ins[v].iter().chain(self.outs[v].iter()) {
                blob.extend_from_slice(&neighbor.to_le_bytes());
            }
            graph.write_all(&blob)?;

            index.extend_from_slice(&offset.to_le_bytes());
            index.extend_from_slice(&(self.ins[v].len() as u32).to_le_bytes());
            index.extend_from_slice(&(self.outs[v].len() as u32).to_le_bytes());
            offset += blob.len() as u64;
        }
        graph.sync_all()?;
        fs::write(index_path.as_ref(), &index)?;
        Ok(())
    }
}
