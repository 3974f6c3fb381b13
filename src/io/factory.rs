use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::cache::{Acquired, PageCache, PageData, PageKey};
use super::{FileIo, StdFileIo, PAGE_SIZE};
use crate::error::{EmberError, Result};

/// Handle to a file registered with the I/O factory.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileId(pub u32);

/// A page-aligned read of `len` bytes at `offset` of `file`, on behalf of
/// `worker`. The completion is delivered to that worker's queue.
#[derive(Copy, Clone, Debug)]
pub struct ReadRequest {
    pub file: FileId,
    pub offset: u64,
    pub len: usize,
    pub ticket: u64,
    pub worker: usize,
}

/// The satisfied byte range of a read: a run of pinned, read-leased pages.
/// Pages stay pinned in the cache for as long as the run is alive.
pub struct PageRun {
    offset: u64,
    len: usize,
    pages: SmallVec<[PageData; 4]>,
}

impl PageRun {
    /// A run with no pages, for zero-length logical reads.
    pub(crate) fn empty() -> Self {
        Self {
            offset: 0,
            len: 0,
            pages: SmallVec::new(),
        }
    }

    /// Aligned start offset of the run within the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of the `idx`-th page of the run.
    pub fn page(&self, idx: usize) -> &[u8] {
        self.pages[idx].as_slice()
    }

    /// Reads a little-endian `u32` at a byte offset relative to the start of
    /// the run. The offset must be 4-aligned, so a value never straddles a
    /// page boundary.
    pub fn read_u32(&self, rel: usize) -> u32 {
        debug_assert!(rel % 4 == 0, "unaligned u32 read at {rel}");
        let page = rel / PAGE_SIZE;
        let byte = rel % PAGE_SIZE;
        let slice = self.pages[page].as_slice();
        u32::from_le_bytes([
            slice[byte],
            slice[byte + 1],
            slice[byte + 2],
            slice[byte + 3],
        ])
    }

    /// Copies `dst.len()` bytes starting at relative offset `rel`.
    pub fn copy_to(&self, mut rel: usize, dst: &mut [u8]) {
        let mut copied = 0;
        while copied < dst.len() {
            let page = rel / PAGE_SIZE;
            let byte = rel % PAGE_SIZE;
            let avail = (PAGE_SIZE - byte).min(dst.len() - copied);
            dst[copied..copied + avail]
                .copy_from_slice(&self.pages[page].as_slice()[byte..byte + avail]);
            copied += avail;
            rel += avail;
        }
    }
}

/// A finished read request.
pub struct Completion {
    pub ticket: u64,
    pub result: Result<PageRun>,
}

#[derive(Default, Clone, Debug)]
pub struct IoStats {
    pub requests: u64,
    pub bytes_requested: u64,
}

struct WorkerQueue {
    completions: Mutex<VecDeque<Completion>>,
    ready: Condvar,
}

struct IoCore {
    cache: Arc<PageCache>,
    files: RwLock<Vec<Arc<dyn FileIo>>>,
    queue: Mutex<VecDeque<ReadRequest>>,
    queued: Condvar,
    workers: Vec<WorkerQueue>,
    shutdown: AtomicBool,
    requests: AtomicU64,
    bytes_requested: AtomicU64,
}

impl IoCore {
    fn service_loop(&self) {
        loop {
            let request = {
                let mut queue = self.queue.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(req) = queue.pop_front() {
                        break req;
                    }
                    self.queued.wait(&mut queue);
                }
            };
            let result = self.service(&request);
            let worker = &self.workers[request.worker];
            worker.completions.lock().push_back(Completion {
                ticket: request.ticket,
                result,
            });
            worker.ready.notify_all();
        }
    }

    fn service(&self, request: &ReadRequest) -> Result<PageRun> {
        let file = {
            let files = self.files.read();
            files
                .get(request.file.0 as usize)
                .cloned()
                .ok_or(EmberError::Invalid("read request names unknown file"))?
        };
        let first_page = request.offset / PAGE_SIZE as u64;
        let num_pages = request.len / PAGE_SIZE;
        let mut pages = SmallVec::with_capacity(num_pages);
        for page_no in first_page..first_page + num_pages as u64 {
            let key = PageKey {
                file: request.file,
                page_no,
            };
            let data = match self.cache.acquire(key)? {
                Acquired::Hit(pin) => pin.read(),
                Acquired::Miss(mut load) => {
                    file.read_at(key.offset(), load.buf_mut())?;
                    load.finish().read()
                }
            };
            pages.push(data);
        }
        trace!(
            offset = request.offset,
            len = request.len,
            worker = request.worker,
            "read serviced"
        );
        Ok(PageRun {
            offset: request.offset,
            len: request.len,
            pages,
        })
    }
}

/// Asynchronous block-read factory over the shared page cache.
///
/// Requests are page-aligned byte ranges; completions carry pinned page runs
/// and are delivered to the queue of the worker that submitted the request,
/// so callbacks always run on the submitting worker's thread.
pub struct IoFactory {
    core: Arc<IoCore>,
    next_ticket: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IoFactory {
    pub fn new(cache: Arc<PageCache>, num_workers: usize, io_threads: usize) -> Arc<Self> {
        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            workers.push(WorkerQueue {
                completions: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            });
        }
        let core = Arc::new(IoCore {
            cache,
            files: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            queued: Condvar::new(),
            workers,
            shutdown: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            bytes_requested: AtomicU64::new(0),
        });
        let mut threads = Vec::with_capacity(io_threads);
        for i in 0..io_threads.max(1) {
            let core = Arc::clone(&core);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("ember-io-{i}"))
                    .spawn(move || core.service_loop())
                    .expect("spawn io thread"),
            );
        }
        debug!(num_workers, io_threads, "io factory started");
        Arc::new(Self {
            core,
            next_ticket: AtomicU64::new(1),
            threads: Mutex::new(threads),
        })
    }

    pub fn register(&self, io: Arc<dyn FileIo>) -> FileId {
        let mut files = self.core.files.write();
        let id = FileId(files.len() as u32);
        files.push(io);
        id
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let io = StdFileIo::open(path)?;
        Ok(self.register(Arc::new(io)))
    }

    pub fn num_workers(&self) -> usize {
        self.core.workers.len()
    }

    /// Submits a read. `offset` must be page-aligned and `len` a positive
    /// page multiple.
    pub fn submit(&self, worker: usize, file: FileId, offset: u64, len: usize) -> Result<u64> {
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(EmberError::Invalid("read offset not page-aligned"));
        }
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(EmberError::Invalid("read length not a page multiple"));
        }
        if worker >= self.core.workers.len() {
            return Err(EmberError::Invalid("read submitted for unknown worker"));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.core.requests.fetch_add(1, Ordering::Relaxed);
        self.core
            .bytes_requested
            .fetch_add(len as u64, Ordering::Relaxed);
        let mut queue = self.core.queue.lock();
        queue.push_back(ReadRequest {
            file,
            offset,
            len,
            ticket,
            worker,
        });
        self.core.queued.notify_one();
        Ok(ticket)
    }

    /// Drains completions for `worker` without blocking.
    pub fn poll(&self, worker: usize) -> Vec<Completion> {
        let queue = &self.core.workers[worker];
        let mut completions = queue.completions.lock();
        completions.drain(..).collect()
    }

    /// Blocks until at least one completion is available for `worker`, then
    /// drains the queue.
    pub fn wait_poll(&self, worker: usize) -> Vec<Completion> {
        let queue = &self.core.workers[worker];
        let mut completions = queue.completions.lock();
        while completions.is_empty() && !self.core.shutdown.load(Ordering::Acquire) {
            queue.ready.wait(&mut completions);
        }
        completions.drain(..).collect()
    }

    pub fn stats(&self) -> IoStats {
        IoStats {
            requests: self.core.requests.load(Ordering::Relaxed),
            bytes_requested: self.core.bytes_requested.load(Ordering::Relaxed),
        }
    }

    pub fn cache_stats(&self) -> super::cache::CacheStats {
        self.core.cache.stats()
    }
}

impl Drop for IoFactory {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.queued.notify_all();
        for queue in &self.core.workers {
            queue.ready.notify_all();
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}
