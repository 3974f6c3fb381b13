use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::engine::{Activation, EngineShared, RunRequest};
use super::message::{Envelope, SendBuffers};
use super::program::{Gate, VertexProgram, WorkerContext};
use super::vertex::{AdjacencyView, EdgeKind, FetchKind, VertexId};
use crate::error::{EmberError, Result};
use crate::io::{round_down_page, round_up_page};

/// Cap on in-flight adjacency requests per worker. Bounds the number of
/// parked continuations and with it the page-cache pressure of one level.
const MAX_PROCESSING_VERTICES: usize = 2048;

/// A parked continuation: the vertex whose `run_with_adjacency` fires when
/// the matching read ticket completes.
struct PendingRead {
    local: u32,
    vertex: VertexId,
    fetch: FetchKind,
    num_in: u32,
    num_out: u32,
    /// Byte offset of the logical range within the page-aligned run.
    base: usize,
}

enum Staged {
    Submitted(u64, PendingRead),
    /// Zero-length adjacency; completes inline without I/O.
    Empty(FetchKind),
}

pub(crate) fn worker_main<P: VertexProgram>(shared: Arc<EngineShared<P>>, worker: usize) {
    let mut seen_epoch = 0u64;
    loop {
        let (epoch, request) = {
            let mut state = shared.control.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if state.epoch > seen_epoch {
                    let request = state.request.clone().expect("run request published");
                    break (state.epoch, request);
                }
                shared.control.changed.wait(&mut state);
            }
        };
        seen_epoch = epoch;
        run_epoch(&shared, worker, &request);
        if worker == 0 {
            let mut done = shared.done.epoch.lock();
            *done = epoch;
            shared.done.changed.notify_all();
        }
    }
}

fn run_epoch<P: VertexProgram>(
    shared: &Arc<EngineShared<P>>,
    worker: usize,
    request: &RunRequest<P>,
) {
    let mut program = (request.factory)(worker);
    let mut sends = SendBuffers::new(Arc::clone(&shared.fabric), shared.partitioner, worker);
    let part_len = shared.partitioner.part_len(worker);
    let mut next: Vec<u32> = Vec::new();
    let mut next_flags = vec![false; part_len];
    let mut current: Vec<u32> = Vec::new();

    // An aborted previous run may have left flushed envelopes behind.
    drop(shared.fabric.take_inbox(worker));

    seed(shared, worker, request, &mut next, &mut next_flags);
    shared.next_count.fetch_add(next.len(), Ordering::SeqCst);

    let mut level = 0usize;
    loop {
        shared.barrier2.wait();
        if worker == 0 {
            shared.level.store(level, Ordering::SeqCst);
            shared.progress_next_level();
        }
        shared.barrier2.wait();
        if shared.complete.load(Ordering::SeqCst) {
            break;
        }

        std::mem::swap(&mut current, &mut next);
        for &local in &current {
            next_flags[local as usize] = false;
        }

        dispatch(shared, worker, &mut program, &mut sends, &current, level);
        sends.flush_all();
        shared.barrier1.wait();

        deliver(
            shared,
            worker,
            &mut program,
            &mut sends,
            level,
            &mut next,
            &mut next_flags,
        );
        shared.next_count.fetch_add(next.len(), Ordering::SeqCst);
        current.clear();
        level += 1;
    }
    trace!(worker, levels = level, "worker finished run");
}

fn seed<P: VertexProgram>(
    shared: &EngineShared<P>,
    worker: usize,
    request: &RunRequest<P>,
    next: &mut Vec<u32>,
    flags: &mut [bool],
) {
    let part_len = shared.partitioner.part_len(worker);
    let mut vertices = shared.store.write_partition(worker);
    match &request.activation {
        Activation::All => {
            for local in 0..part_len as u32 {
                push_active(flags, next, local);
            }
        }
        Activation::Ids(ids) => {
            for &id in ids.iter() {
                if (id.0 as usize) >= shared.partitioner.num_vertices() {
                    shared.fail(EmberError::Invalid("activation id out of range"));
                    break;
                }
                if shared.partitioner.part_of(id) == worker {
                    push_active(flags, next, shared.partitioner.local_of(id));
                }
            }
        }
        Activation::Filter(filter) => {
            for local in 0..part_len as u32 {
                let id = shared.partitioner.global_of(worker, local);
                if filter(id, &vertices[local as usize]) {
                    push_active(flags, next, local);
                }
            }
        }
    }
    if let Some(initiator) = &request.initiator {
        for &local in next.iter() {
            let id = shared.partitioner.global_of(worker, local);
            initiator(id, &mut vertices[local as usize]);
        }
    }
    debug!(worker, seeded = next.len(), "initial activation");
}

fn push_active(flags: &mut [bool], next: &mut Vec<u32>, local: u32) {
    let slot = &mut flags[local as usize];
    if !*slot {
        *slot = true;
        next.push(local);
    }
}

fn dispatch<P: VertexProgram>(
    shared: &Arc<EngineShared<P>>,
    worker: usize,
    program: &mut P,
    sends: &mut SendBuffers<P::Message>,
    current: &[u32],
    level: usize,
) {
    let order = scheduled_order(shared, worker, current);
    let mut vertices = shared.store.write_partition(worker);
    let mut pending: FxHashMap<u64, PendingRead> = FxHashMap::default();
    let mut processed: Vec<u32> = Vec::with_capacity(order.len());
    let mut cursor = 0usize;
    let mut aborted = shared.failed();

    loop {
        let blocked =
            aborted || cursor >= order.len() || pending.len() >= MAX_PROCESSING_VERTICES;
        let completions = if blocked {
            if pending.is_empty() {
                break;
            }
            shared.io.wait_poll(worker)
        } else {
            shared.io.poll(worker)
        };

        for completion in completions {
            let Some(read) = pending.remove(&completion.ticket) else {
                continue;
            };
            if aborted {
                continue;
            }
            match completion.result {
                Err(err) => {
                    shared.fail(err);
                    aborted = true;
                }
                Ok(run) => {
                    let view =
                        AdjacencyView::new(run, read.base, read.fetch, read.num_in, read.num_out);
                    let mut ctx = WorkerContext {
                        worker,
                        level,
                        vertex: read.vertex,
                        index: &shared.index,
                        sends: &mut *sends,
                    };
                    match program.run_with_adjacency(
                        &mut vertices[read.local as usize],
                        &view,
                        &mut ctx,
                    ) {
                        Ok(()) => {
                            shared.remaining_in_level.fetch_sub(1, Ordering::SeqCst);
                            processed.push(read.local);
                        }
                        Err(err) => {
                            shared.fail(err);
                            aborted = true;
                        }
                    }
                }
            }
        }

        if aborted || cursor >= order.len() || pending.len() >= MAX_PROCESSING_VERTICES {
            continue;
        }

        let local = order[cursor];
        cursor += 1;
        let vertex = shared.partitioner.global_of(worker, local);
        let mut ctx = WorkerContext {
            worker,
            level,
            vertex,
            index: &shared.index,
            sends: &mut *sends,
        };
        match program.run(&mut vertices[local as usize], &mut ctx) {
            // A vertex that is already terminal (or gated out) counts as
            // processed immediately, with no I/O.
            Ok(Gate::Halt) => {
                shared.remaining_in_level.fetch_sub(1, Ordering::SeqCst);
                processed.push(local);
            }
            Ok(gate) => match stage_read(shared, worker, vertex, local, gate) {
                Ok(Staged::Submitted(ticket, read)) => {
                    pending.insert(ticket, read);
                }
                Ok(Staged::Empty(fetch)) => {
                    let view = AdjacencyView::empty(fetch);
                    let mut ctx = WorkerContext {
                        worker,
                        level,
                        vertex,
                        index: &shared.index,
                        sends: &mut *sends,
                    };
                    match program.run_with_adjacency(&mut vertices[local as usize], &view, &mut ctx)
                    {
                        Ok(()) => {
                            shared.remaining_in_level.fetch_sub(1, Ordering::SeqCst);
                            processed.push(local);
                        }
                        Err(err) => {
                            shared.fail(err);
                            aborted = true;
                        }
                    }
                }
                Err(err) => {
                    shared.fail(err);
                    aborted = true;
                }
            },
            Err(err) => {
                shared.fail(err);
                aborted = true;
            }
        }
    }

    if !shared.failed() {
        for &local in &processed {
            let vertex = shared.partitioner.global_of(worker, local);
            let mut ctx = WorkerContext {
                worker,
                level,
                vertex,
                index: &shared.index,
                sends: &mut *sends,
            };
            if let Err(err) = program.notify_iteration_end(&mut vertices[local as usize], &mut ctx)
            {
                shared.fail(err);
                break;
            }
        }
    }
}

/// Applies the optional per-worker vertex scheduler to this level's queue.
fn scheduled_order<P: VertexProgram>(
    shared: &EngineShared<P>,
    worker: usize,
    current: &[u32],
) -> Vec<u32> {
    let scheduler = shared.scheduler.lock().clone();
    match scheduler {
        None => current.to_vec(),
        Some(scheduler) => {
            let mut ids: Vec<VertexId> = current
                .iter()
                .map(|&local| shared.partitioner.global_of(worker, local))
                .collect();
            scheduler.schedule(&mut ids);
            ids.into_iter()
                .filter(|&id| shared.partitioner.part_of(id) == worker)
                .map(|id| shared.partitioner.local_of(id))
                .collect()
        }
    }
}

fn stage_read<P: VertexProgram>(
    shared: &EngineShared<P>,
    worker: usize,
    vertex: VertexId,
    local: u32,
    gate: Gate,
) -> Result<Staged> {
    let info = shared.index.vertex_info(vertex);
    let (start, len, fetch, num_in, num_out) = match gate {
        Gate::Halt => unreachable!("halt does not stage a read"),
        Gate::RequestFull => (
            info.offset,
            info.size as u64,
            FetchKind::Full,
            info.num_in,
            info.num_out,
        ),
        Gate::RequestPartial(EdgeKind::In) => {
            if !shared.index.is_directed() {
                return Err(EmberError::Invalid(
                    "partial adjacency requests need a directed graph",
                ));
            }
            (
                info.offset,
                4 * info.num_in as u64,
                FetchKind::In,
                info.num_in,
                0,
            )
        }
        Gate::RequestPartial(EdgeKind::Out) => {
            if !shared.index.is_directed() {
                return Err(EmberError::Invalid(
                    "partial adjacency requests need a directed graph",
                ));
            }
            (
                info.offset + 4 * info.num_in as u64,
                4 * info.num_out as u64,
                FetchKind::Out,
                0,
                info.num_out,
            )
        }
        Gate::RequestPartial(EdgeKind::Both) => {
            return Err(EmberError::Invalid(
                "partial adjacency request cannot ask for both edge kinds",
            ));
        }
    };
    if len == 0 {
        return Ok(Staged::Empty(fetch));
    }
    let aligned_start = round_down_page(start);
    let aligned_len = (round_up_page(start + len) - aligned_start) as usize;
    let ticket = shared
        .io
        .submit(worker, shared.graph_file, aligned_start, aligned_len)?;
    Ok(Staged::Submitted(
        ticket,
        PendingRead {
            local,
            vertex,
            fetch,
            num_in,
            num_out,
            base: (start - aligned_start) as usize,
        },
    ))
}

fn deliver<P: VertexProgram>(
    shared: &EngineShared<P>,
    worker: usize,
    program: &mut P,
    sends: &mut SendBuffers<P::Message>,
    level: usize,
    next: &mut Vec<u32>,
    flags: &mut [bool],
) {
    let envelopes = shared.fabric.take_inbox(worker);
    if envelopes.is_empty() || shared.failed() {
        return;
    }
    let mut vertices = shared.store.write_partition(worker);
    for envelope in envelopes {
        match envelope {
            Envelope::Message { dst, msg } => {
                let local = shared.partitioner.local_of(dst);
                let mut ctx = WorkerContext {
                    worker,
                    level: level + 1,
                    vertex: dst,
                    index: &shared.index,
                    sends: &mut *sends,
                };
                if let Err(err) =
                    program.run_on_message(&mut vertices[local as usize], &msg, &mut ctx)
                {
                    shared.fail(err);
                    return;
                }
                push_active(flags, next, local);
            }
            Envelope::Activate { dst } => {
                push_active(flags, next, shared.partitioner.local_of(dst));
            }
        }
    }
}
