#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use ember::{GraphBuilder, GraphConfig, Runtime, VertexId};
use tempfile::TempDir;

/// A runtime with `num_threads` workers and a small private page cache.
pub fn runtime(num_threads: usize) -> Arc<Runtime> {
    Runtime::new(GraphConfig {
        num_threads,
        io_threads: 2,
        cache_size: 4 * 1024 * 1024,
        ..GraphConfig::default()
    })
}

/// Writes a directed graph to disk, returning the tempdir guard and the
/// (graph, index) paths.
pub fn write_directed(num_vertices: u32, edges: &[(u32, u32)]) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let graph_path = dir.path().join("graph.adj");
    let index_path = dir.path().join("graph.idx");
    let mut builder = GraphBuilder::directed(num_vertices);
    for &(src, dst) in edges {
        builder.add_edge(VertexId(src), VertexId(dst)).unwrap();
    }
    builder.write(&graph_path, &index_path).unwrap();
    (dir, graph_path, index_path)
}

/// The six-vertex anchoring graph:
/// `0→1, 1→2, 2→0, 2→3, 3→4, 4→5, 5→3`.
/// Degrees (in+out): 0:2, 1:2, 2:3, 3:3, 4:2, 5:2.
pub fn write_anchor_graph() -> (TempDir, PathBuf, PathBuf) {
    write_directed(
        6,
        &[(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 5), (5, 3)],
    )
}
