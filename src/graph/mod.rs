pub mod engine;
pub mod index;
pub mod message;
pub mod partition;
pub mod program;
pub mod query;
pub mod state;
mod worker;

pub mod vertex;

pub use engine::GraphEngine;
pub use index::{GraphBuilder, VertexIndex, VertexInfo};
pub use message::{MessageFabric, SendBuffers, GRAPH_MSG_BUF_SIZE};
pub use partition::Partitioner;
pub use program::{
    Gate, ProgramFactory, VertexFilter, VertexInitiator, VertexProgram, VertexScheduler,
    WorkerContext,
};
pub use query::{QueryContext, VertexQuery};
pub use state::VertexStore;
pub use vertex::{AdjacencyView, EdgeKind, NeighborIter, VertexId};
