pub mod cache;
pub mod factory;

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::error::{EmberError, Result};

pub use cache::{CacheStats, PageCache, PageKey, PagePin};
pub use factory::{Completion, FileId, IoFactory, IoStats, PageRun, ReadRequest};

/// Size of a cache page. All adapter reads are issued in page units.
pub const PAGE_SIZE: usize = 4096;

pub fn round_down_page(off: u64) -> u64 {
    off - off % PAGE_SIZE as u64
}

pub fn round_up_page(off: u64) -> u64 {
    off.div_ceil(PAGE_SIZE as u64) * PAGE_SIZE as u64
}

/// Positional read access to a data file.
pub trait FileIo: Send + Sync + 'static {
    /// Reads at `off` until `dst` is full or EOF is reached; any tail past
    /// EOF is zero-filled. Returns the number of file bytes copied.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize>;
    fn len(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(EmberError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }

    #[cfg(unix)]
    fn read_some(&self, off: u64, dst: &mut [u8]) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file().read_at(dst, off)
    }

    #[cfg(windows)]
    fn read_some(&self, off: u64, dst: &mut [u8]) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file().seek_read(dst, off)
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, dst: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        let mut rest = &mut dst[..];
        while !rest.is_empty() {
            let read = self.read_some(off, rest).map_err(EmberError::from)?;
            if read == 0 {
                rest.fill(0);
                break;
            }
            copied += read;
            off += read as u64;
            let (_, tail) = rest.split_at_mut(read);
            rest = tail;
        }
        Ok(copied)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(EmberError::from)?.len())
    }
}
