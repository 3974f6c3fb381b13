pub mod algs;
pub mod config;
pub mod error;
pub mod graph;
pub mod io;
pub mod matrix;
pub mod runtime;

pub use crate::config::{ConfigMap, GraphConfig, MatrixConfig};
pub use crate::error::{EmberError, Result};
pub use crate::graph::{
    AdjacencyView, EdgeKind, Gate, GraphBuilder, GraphEngine, VertexId, VertexIndex,
    VertexProgram, VertexQuery, WorkerContext,
};
pub use crate::matrix::{DenseMatrix, Layout, SparseMatrix, SpmBuilder};
pub use crate::runtime::Runtime;
