use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::factory::FileId;
use super::PAGE_SIZE;
use crate::error::{EmberError, Result};

/// Identity of a cached page: owning file plus page number within it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PageKey {
    pub file: FileId,
    pub page_no: u64,
}

impl PageKey {
    pub fn offset(&self) -> u64 {
        self.page_no * PAGE_SIZE as u64
    }
}

struct Frame {
    buf: Arc<RwLock<Box<[u8]>>>,
    pins: AtomicU32,
    referenced: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            buf: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
            pins: AtomicU32::new(0),
            referenced: AtomicBool::new(false),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner {
    table: FxHashMap<PageKey, usize>,
    owners: Vec<Option<PageKey>>,
    clock: usize,
    stats: CacheStats,
}

/// Shared page cache with fixed-size frames and clock replacement.
///
/// A frame is pinned while any [`PagePin`] references it; pinned frames are
/// never chosen for eviction. Page content is guarded by a per-frame rwlock:
/// the loader holds the write side while filling the frame, readers block on
/// the read side until the load completes.
pub struct PageCache {
    frames: Vec<Frame>,
    inner: Mutex<CacheInner>,
}

/// Outcome of [`PageCache::acquire`].
pub enum Acquired {
    /// The page is resident; the pin can be read immediately.
    Hit(PagePin),
    /// The caller owns the load: fill the buffer, then call
    /// [`PageLoad::finish`].
    Miss(PageLoad),
}

impl std::fmt::Debug for Acquired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquired::Hit(_) => f.debug_tuple("Hit").finish(),
            Acquired::Miss(_) => f.debug_tuple("Miss").finish(),
        }
    }
}

/// A pinned reference to a cache frame. Dropping the pin makes the frame
/// evictable again (once no other pins remain).
pub struct PagePin {
    cache: Arc<PageCache>,
    frame: usize,
}

impl PagePin {
    /// Takes a read lease on the page content. Blocks until any in-progress
    /// load of this frame completes.
    pub fn read(self) -> PageData {
        let guard = self.cache.frames[self.frame].buf.read_arc();
        PageData { _pin: self, guard }
    }
}

impl Drop for PagePin {
    fn drop(&mut self) {
        self.cache.frames[self.frame]
            .pins
            .fetch_sub(1, Ordering::Release);
    }
}

/// A pinned page together with a read lease on its bytes.
pub struct PageData {
    _pin: PagePin,
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
}

impl PageData {
    pub fn as_slice(&self) -> &[u8] {
        &self.guard
    }
}

/// Exclusive access to a frame that is being filled by its loader.
///
/// Dropping the load without calling `finish` (e.g. on a read error) unmaps
/// the page again so no later lookup is served unfilled content.
pub struct PageLoad {
    key: PageKey,
    pin: Option<PagePin>,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>>,
}

impl PageLoad {
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.guard.as_mut().map(|g| &mut g[..]).unwrap_or(&mut [])
    }

    /// Publishes the loaded content and downgrades to a plain pin.
    pub fn finish(mut self) -> PagePin {
        drop(self.guard.take());
        self.pin.take().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PageLoad {
    fn drop(&mut self) {
        let Some(pin) = self.pin.take() else {
            return;
        };
        let mut inner = pin.cache.inner.lock();
        let idx = pin.frame;
        if inner.owners[idx] == Some(self.key) {
            inner.owners[idx] = None;
            inner.table.remove(&self.key);
        }
        drop(inner);
        // Zero the buffer before waking any reader that raced onto this
        // frame; it observes deterministic content while the run aborts.
        if let Some(mut guard) = self.guard.take() {
            guard.fill(0);
        }
        drop(pin);
    }
}

impl PageCache {
    pub fn new(capacity_pages: usize) -> Arc<Self> {
        let capacity = capacity_pages.max(1);
        let mut frames = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            frames.push(Frame::new());
        }
        debug!(capacity, "page cache created");
        Arc::new(Self {
            frames,
            inner: Mutex::new(CacheInner {
                table: FxHashMap::default(),
                owners: vec![None; capacity],
                clock: 0,
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Looks up `key`, pinning the frame. On a miss the caller receives a
    /// [`PageLoad`] and must fill the buffer before calling `finish`.
    pub fn acquire(self: &Arc<Self>, key: PageKey) -> Result<Acquired> {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.table.get(&key) {
            let frame = &self.frames[idx];
            frame.pins.fetch_add(1, Ordering::Acquire);
            frame.referenced.store(true, Ordering::Relaxed);
            inner.stats.hits += 1;
            return Ok(Acquired::Hit(PagePin {
                cache: Arc::clone(self),
                frame: idx,
            }));
        }

        let idx = self.find_victim(&mut inner)?;
        if let Some(old) = inner.owners[idx].take() {
            inner.table.remove(&old);
            inner.stats.evictions += 1;
        }
        inner.owners[idx] = Some(key);
        inner.table.insert(key, idx);
        inner.stats.misses += 1;
        let frame = &self.frames[idx];
        frame.pins.store(1, Ordering::Release);
        frame.referenced.store(true, Ordering::Relaxed);
        // The frame had no pins, so the write lock is uncontended. Taking it
        // before unlocking the table makes concurrent hitters block on the
        // read side until the load finishes.
        let guard = frame.buf.write_arc();
        drop(inner);
        Ok(Acquired::Miss(PageLoad {
            key,
            pin: Some(PagePin {
                cache: Arc::clone(self),
                frame: idx,
            }),
            guard: Some(guard),
        }))
    }

    fn find_victim(&self, inner: &mut CacheInner) -> Result<usize> {
        let len = self.frames.len();
        for _ in 0..2 * len {
            let idx = inner.clock;
            inner.clock = (inner.clock + 1) % len;
            let frame = &self.frames[idx];
            if frame.pins.load(Ordering::Acquire) != 0 {
                continue;
            }
            if frame.referenced.swap(false, Ordering::Relaxed) {
                continue;
            }
            return Ok(idx);
        }
        Err(EmberError::Invalid(
            "page cache exhausted: all frames pinned",
        ))
    }
}
