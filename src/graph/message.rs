use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::partition::Partitioner;
use super::vertex::VertexId;
use crate::io::PAGE_SIZE;

/// Byte capacity of one per-(src,dst) send slab.
pub const GRAPH_MSG_BUF_SIZE: usize = 4 * PAGE_SIZE;

/// A routed unit of the fabric: either a vertex message or a bare
/// activation for the next level.
#[derive(Copy, Clone, Debug)]
pub enum Envelope<M> {
    Message { dst: VertexId, msg: M },
    Activate { dst: VertexId },
}

impl<M> Envelope<M> {
    pub fn dst(&self) -> VertexId {
        match self {
            Envelope::Message { dst, .. } | Envelope::Activate { dst } => *dst,
        }
    }
}

/// Cross-worker message fabric: one staging inbox per destination worker.
///
/// Senders deposit batches during a level; the owning worker drains its
/// inbox in the delivery phase after barrier 1, so everything deposited in
/// level L becomes visible exactly in level L+1. Deposits from one sender
/// keep their send order; there is no ordering between senders.
pub struct MessageFabric<M> {
    inboxes: Vec<Mutex<Vec<Envelope<M>>>>,
}

impl<M: Copy + Send> MessageFabric<M> {
    pub fn new(num_workers: usize) -> Arc<Self> {
        let mut inboxes = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            inboxes.push(Mutex::new(Vec::new()));
        }
        Arc::new(Self { inboxes })
    }

    fn deposit(&self, dst_worker: usize, batch: &mut Vec<Envelope<M>>) {
        if batch.is_empty() {
            return;
        }
        let mut inbox = self.inboxes[dst_worker].lock();
        inbox.append(batch);
    }

    /// Takes the staged envelopes for `worker`. Called by the owning worker
    /// only, in its delivery phase.
    pub fn take_inbox(&self, worker: usize) -> Vec<Envelope<M>> {
        mem::take(&mut *self.inboxes[worker].lock())
    }
}

/// Per-worker send side of the fabric: one fixed-capacity slab per
/// destination worker. A slab that fills up mid-level is flushed to the
/// destination inbox early, which keeps sends non-blocking and cannot
/// deadlock (inboxes are staging vectors, not bounded rings).
pub struct SendBuffers<M: Copy + Send> {
    fabric: Arc<MessageFabric<M>>,
    partitioner: Partitioner,
    src: usize,
    capacity: usize,
    slabs: Vec<Vec<Envelope<M>>>,
}

impl<M: Copy + Send> SendBuffers<M> {
    pub fn new(fabric: Arc<MessageFabric<M>>, partitioner: Partitioner, src: usize) -> Self {
        let capacity = (GRAPH_MSG_BUF_SIZE / mem::size_of::<Envelope<M>>().max(1)).max(1);
        let num_workers = partitioner.num_parts();
        Self {
            fabric,
            partitioner,
            src,
            capacity,
            slabs: (0..num_workers).map(|_| Vec::new()).collect(),
        }
    }

    /// Envelopes one slab can hold before forcing a flush.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&mut self, envelope: Envelope<M>) {
        let dst_worker = self.partitioner.part_of(envelope.dst());
        let slab = &mut self.slabs[dst_worker];
        slab.push(envelope);
        if slab.len() >= self.capacity {
            trace!(src = self.src, dst_worker, "send slab full, early flush");
            self.fabric.deposit(dst_worker, slab);
        }
    }

    /// Copies `msg` into the slab for `dst`'s worker.
    pub fn send(&mut self, dst: VertexId, msg: M) {
        self.push(Envelope::Message { dst, msg });
    }

    /// One delivery of `msg` per target produced by the iterator.
    pub fn multicast(&mut self, targets: impl IntoIterator<Item = VertexId>, msg: M) {
        for dst in targets {
            self.push(Envelope::Message { dst, msg });
        }
    }

    /// Activates `dst` for the next level without carrying a payload.
    pub fn activate(&mut self, dst: VertexId) {
        self.push(Envelope::Activate { dst });
    }

    /// Pushes every slab to its destination inbox. Called at barrier 1.
    pub fn flush_all(&mut self) {
        for dst_worker in 0..self.slabs.len() {
            let mut slab = mem::take(&mut self.slabs[dst_worker]);
            self.fabric.deposit(dst_worker, &mut slab);
            self.slabs[dst_worker] = slab;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_order_is_preserved_per_pair() {
        let partitioner = Partitioner::new(2, 4);
        let fabric = MessageFabric::new(2);
        let mut sends = SendBuffers::new(Arc::clone(&fabric), partitioner, 0);

        for seq in 0..100u32 {
            sends.send(VertexId(1), seq);
        }
        sends.flush_all();

        let inbox = fabric.take_inbox(1);
        assert_eq!(inbox.len(), 100);
        for (expect, envelope) in inbox.iter().enumerate() {
            match envelope {
                Envelope::Message { dst, msg } => {
                    assert_eq!(*dst, VertexId(1));
                    assert_eq!(*msg, expect as u32);
                }
                Envelope::Activate { .. } => panic!("unexpected activation"),
            }
        }
        // Inbox is drained exactly once.
        assert!(fabric.take_inbox(1).is_empty());
    }

    #[test]
    fn overflow_flushes_early_without_loss() {
        let partitioner = Partitioner::new(2, 4);
        let fabric = MessageFabric::new(2);
        let mut sends = SendBuffers::new(Arc::clone(&fabric), partitioner, 0);

        let total = sends.capacity() * 3 + 17;
        for seq in 0..total as u32 {
            sends.send(VertexId(3), seq);
        }
        sends.flush_all();

        let inbox = fabric.take_inbox(1);
        assert_eq!(inbox.len(), total);
        for (expect, envelope) in inbox.iter().enumerate() {
            match envelope {
                Envelope::Message { msg, .. } => assert_eq!(*msg, expect as u32),
                Envelope::Activate { .. } => panic!("unexpected activation"),
            }
        }
    }

    #[test]
    fn multicast_expands_per_target() {
        let partitioner = Partitioner::new(2, 6);
        let fabric = MessageFabric::new(2);
        let mut sends = SendBuffers::new(Arc::clone(&fabric), partitioner, 1);

        sends.multicast([VertexId(0), VertexId(2), VertexId(5)], 9u32);
        sends.activate(VertexId(4));
        sends.flush_all();

        // Ids 0, 2, 4 live on worker 0; id 5 on worker 1.
        assert_eq!(fabric.take_inbox(0).len(), 3);
        assert_eq!(fabric.take_inbox(1).len(), 1);
    }
}
