mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ember::graph::VertexScheduler;
use ember::{
    AdjacencyView, EdgeKind, EmberError, Gate, GraphEngine, VertexId, VertexIndex, VertexProgram,
    WorkerContext,
};

use common::{runtime, write_directed};

/// Floods a fixed number of sequenced messages from vertex 0 to vertex 1
/// across one level boundary.
struct FloodVertex {
    received: Vec<u32>,
}

struct FloodProgram {
    count: u32,
}

impl VertexProgram for FloodProgram {
    type Vertex = FloodVertex;
    type Message = u32;

    fn create_vertex(_id: VertexId, _index: &VertexIndex) -> FloodVertex {
        FloodVertex {
            received: Vec::new(),
        }
    }

    fn run(
        &mut self,
        _vertex: &mut FloodVertex,
        ctx: &mut WorkerContext<'_, u32>,
    ) -> ember::Result<Gate> {
        if ctx.vertex_id() == VertexId(0) && ctx.level() == 0 {
            for seq in 0..self.count {
                ctx.send(VertexId(1), seq);
            }
        }
        Ok(Gate::Halt)
    }

    fn run_with_adjacency(
        &mut self,
        _vertex: &mut FloodVertex,
        _adjacency: &AdjacencyView,
        _ctx: &mut WorkerContext<'_, u32>,
    ) -> ember::Result<()> {
        Ok(())
    }

    fn run_on_message(
        &mut self,
        vertex: &mut FloodVertex,
        msg: &u32,
        _ctx: &mut WorkerContext<'_, u32>,
    ) -> ember::Result<()> {
        vertex.received.push(*msg);
        Ok(())
    }
}

#[test]
fn thousand_messages_cross_one_barrier_in_fifo_order() {
    let (_dir, graph, index) = write_directed(2, &[(0, 1)]);
    let engine: GraphEngine<FloodProgram> =
        GraphEngine::create(&runtime(2), &graph, &index).unwrap();

    engine.start_ids(
        vec![VertexId(0)],
        None,
        Arc::new(|_| FloodProgram { count: 1000 }),
    );
    engine.wait4complete().unwrap();

    let received = engine.with_vertex(VertexId(1), |v| v.received.clone());
    assert_eq!(received.len(), 1000);
    assert!(received.iter().enumerate().all(|(i, &seq)| seq == i as u32));
    // The sender kept nothing.
    assert!(engine.with_vertex(VertexId(0), |v| v.received.is_empty()));
}

/// Records run levels and message deliveries so the at-most-once and
/// exactly-once invariants are observable from the outside.
struct TraceVertex {
    run_levels: Vec<usize>,
    msgs: usize,
}

struct TraceProgram;

impl VertexProgram for TraceProgram {
    type Vertex = TraceVertex;
    type Message = u8;

    fn create_vertex(_id: VertexId, _index: &VertexIndex) -> TraceVertex {
        TraceVertex {
            run_levels: Vec::new(),
            msgs: 0,
        }
    }

    fn run(
        &mut self,
        vertex: &mut TraceVertex,
        ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<Gate> {
        vertex.run_levels.push(ctx.level());
        if ctx.level() == 0 {
            // Every vertex floods vertex 0 and also activates it explicitly;
            // all of that must coalesce into a single execution.
            for _ in 0..3 {
                ctx.send(VertexId(0), 1);
            }
            ctx.add_active_next_itr(VertexId(0));
        }
        Ok(Gate::Halt)
    }

    fn run_with_adjacency(
        &mut self,
        _vertex: &mut TraceVertex,
        _adjacency: &AdjacencyView,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }

    fn run_on_message(
        &mut self,
        vertex: &mut TraceVertex,
        _msg: &u8,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        vertex.msgs += 1;
        Ok(())
    }
}

#[test]
fn duplicate_activations_coalesce_and_messages_deliver_exactly_once() {
    let (_dir, graph, index) = write_directed(4, &[(0, 1), (1, 2), (2, 3)]);
    let engine: GraphEngine<TraceProgram> =
        GraphEngine::create(&runtime(2), &graph, &index).unwrap();

    engine.start_all(None, Arc::new(|_| TraceProgram));
    engine.wait4complete().unwrap();

    // Vertex 0 ran once in level 0 and once in level 1, despite 4 explicit
    // activations and 12 messages targeting it.
    assert_eq!(engine.with_vertex(VertexId(0), |v| v.run_levels.clone()), [0, 1]);
    assert_eq!(engine.with_vertex(VertexId(0), |v| v.msgs), 12);
    for v in 1..4 {
        assert_eq!(
            engine.with_vertex(VertexId(v), |vx| vx.run_levels.clone()),
            [0]
        );
        assert_eq!(engine.with_vertex(VertexId(v), |vx| vx.msgs), 0);
    }
}

/// Requests only the in-edge slice and records what the view exposes.
struct PartialVertex {
    seen_in: Vec<u32>,
    out_edges_visible: usize,
    out_iter_rejected: bool,
}

struct PartialProgram;

impl VertexProgram for PartialProgram {
    type Vertex = PartialVertex;
    type Message = u8;

    fn create_vertex(_id: VertexId, _index: &VertexIndex) -> PartialVertex {
        PartialVertex {
            seen_in: Vec::new(),
            out_edges_visible: 0,
            out_iter_rejected: false,
        }
    }

    fn run(
        &mut self,
        _vertex: &mut PartialVertex,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<Gate> {
        Ok(Gate::RequestPartial(EdgeKind::In))
    }

    fn run_with_adjacency(
        &mut self,
        vertex: &mut PartialVertex,
        adjacency: &AdjacencyView,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        vertex.seen_in = adjacency.neighbors(EdgeKind::In)?.map(|id| id.0).collect();
        vertex.out_edges_visible = adjacency.num_edges(EdgeKind::Out);
        vertex.out_iter_rejected = adjacency.neighbors(EdgeKind::Out).is_err();
        Ok(())
    }

    fn run_on_message(
        &mut self,
        _vertex: &mut PartialVertex,
        _msg: &u8,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }
}

#[test]
fn partial_in_request_streams_only_in_edges() {
    let (_dir, graph, index) = write_directed(3, &[(0, 1), (0, 2), (1, 2)]);
    let engine: GraphEngine<PartialProgram> =
        GraphEngine::create(&runtime(2), &graph, &index).unwrap();

    engine.start_all(None, Arc::new(|_| PartialProgram));
    engine.wait4complete().unwrap();

    assert_eq!(engine.with_vertex(VertexId(0), |v| v.seen_in.clone()), Vec::<u32>::new());
    assert_eq!(engine.with_vertex(VertexId(1), |v| v.seen_in.clone()), [0]);
    assert_eq!(engine.with_vertex(VertexId(2), |v| v.seen_in.clone()), [0, 1]);
    // The out projection is absent from an in-only view.
    assert_eq!(engine.with_vertex(VertexId(2), |v| v.out_edges_visible), 0);
    assert!(engine.with_vertex(VertexId(2), |v| v.out_iter_rejected));
}

/// Toggles between failing and succeeding runs.
struct SwitchProgram {
    mode: Mode,
}

#[derive(Copy, Clone)]
enum Mode {
    BothPartial,
    Fail,
    Succeed,
}

struct SwitchVertex;

impl VertexProgram for SwitchProgram {
    type Vertex = SwitchVertex;
    type Message = u8;

    fn create_vertex(_id: VertexId, _index: &VertexIndex) -> SwitchVertex {
        SwitchVertex
    }

    fn run(
        &mut self,
        _vertex: &mut SwitchVertex,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<Gate> {
        match self.mode {
            Mode::BothPartial => Ok(Gate::RequestPartial(EdgeKind::Both)),
            Mode::Fail => Err(EmberError::Engine("injected failure".to_string())),
            Mode::Succeed => Ok(Gate::Halt),
        }
    }

    fn run_with_adjacency(
        &mut self,
        _vertex: &mut SwitchVertex,
        _adjacency: &AdjacencyView,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }

    fn run_on_message(
        &mut self,
        _vertex: &mut SwitchVertex,
        _msg: &u8,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }
}

#[test]
fn both_partial_request_is_rejected() {
    let (_dir, graph, index) = write_directed(2, &[(0, 1)]);
    let engine: GraphEngine<SwitchProgram> =
        GraphEngine::create(&runtime(2), &graph, &index).unwrap();

    engine.start_all(
        None,
        Arc::new(|_| SwitchProgram {
            mode: Mode::BothPartial,
        }),
    );
    let err = engine.wait4complete().unwrap_err();
    assert!(matches!(err, EmberError::Invalid(_)));
}

#[test]
fn worker_errors_abort_the_run_and_the_engine_recovers() {
    let (_dir, graph, index) = write_directed(3, &[(0, 1), (1, 2)]);
    let engine: GraphEngine<SwitchProgram> =
        GraphEngine::create(&runtime(2), &graph, &index).unwrap();

    engine.start_all(None, Arc::new(|_| SwitchProgram { mode: Mode::Fail }));
    let err = engine.wait4complete().unwrap_err();
    assert!(matches!(err, EmberError::Engine(_)));

    // A later run on the same engine succeeds.
    engine.start_all(None, Arc::new(|_| SwitchProgram { mode: Mode::Succeed }));
    engine.wait4complete().unwrap();
}

/// Stamps each vertex with a global execution sequence number.
struct OrderVertex {
    seq: usize,
}

struct OrderProgram {
    counter: Arc<AtomicUsize>,
}

impl VertexProgram for OrderProgram {
    type Vertex = OrderVertex;
    type Message = u8;

    fn create_vertex(_id: VertexId, _index: &VertexIndex) -> OrderVertex {
        OrderVertex { seq: usize::MAX }
    }

    fn run(
        &mut self,
        vertex: &mut OrderVertex,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<Gate> {
        vertex.seq = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Gate::Halt)
    }

    fn run_with_adjacency(
        &mut self,
        _vertex: &mut OrderVertex,
        _adjacency: &AdjacencyView,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }

    fn run_on_message(
        &mut self,
        _vertex: &mut OrderVertex,
        _msg: &u8,
        _ctx: &mut WorkerContext<'_, u8>,
    ) -> ember::Result<()> {
        Ok(())
    }
}

struct ReverseScheduler;

impl VertexScheduler for ReverseScheduler {
    fn schedule(&self, vertices: &mut Vec<VertexId>) {
        vertices.reverse();
    }
}

#[test]
fn vertex_scheduler_reorders_execution_within_a_worker() {
    let (_dir, graph, index) = write_directed(6, &[]);
    let engine: GraphEngine<OrderProgram> =
        GraphEngine::create(&runtime(1), &graph, &index).unwrap();
    engine.set_vertex_scheduler(Arc::new(ReverseScheduler));

    let counter = Arc::new(AtomicUsize::new(0));
    let factory_counter = Arc::clone(&counter);
    engine.start_all(
        None,
        Arc::new(move |_| OrderProgram {
            counter: Arc::clone(&factory_counter),
        }),
    );
    engine.wait4complete().unwrap();

    // With one worker and a reversing scheduler, vertex 5 runs first.
    for v in 0..6u32 {
        assert_eq!(
            engine.with_vertex(VertexId(v), |vx| vx.seq),
            (5 - v) as usize
        );
    }
}
