use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::{EmberError, Result};
use crate::io::PageRun;

const MATRIX_MAGIC: [u8; 4] = *b"EMBM";
const MATRIX_VERSION: u16 = 1;
const HEADER_LEN: usize = 32;

/// Per-block layout in the matrix file:
/// `col_idx: u32, nnz: u32`, then `nnz` packed entries of
/// `row_off: u16 | col_off: u16` (one LE `u32` each). Blocks of a block-row
/// are stored in ascending column order; empty blocks are omitted.
pub const BLOCK_HEADER_LEN: usize = 8;
pub const ENTRY_LEN: usize = 4;

/// In-memory index of a 2D-blocked sparse matrix: dimensions, block shape,
/// and the file offset of every block-row.
pub struct SpmIndex {
    num_rows: u64,
    num_cols: u64,
    block_height: u32,
    block_width: u32,
    row_offs: Vec<u64>,
}

impl SpmIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < HEADER_LEN {
            return Err(EmberError::Corruption("matrix index shorter than header"));
        }
        if bytes[0..4] != MATRIX_MAGIC {
            return Err(EmberError::Corruption("bad matrix index magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != MATRIX_VERSION {
            return Err(EmberError::Corruption("unsupported matrix index version"));
        }
        let num_rows = u64::from_le_bytes(bytes[8..16].try_into().expect("header slice"));
        let num_cols = u64::from_le_bytes(bytes[16..24].try_into().expect("header slice"));
        let block_height = u32::from_le_bytes(bytes[24..28].try_into().expect("header slice"));
        let block_width = u32::from_le_bytes(bytes[28..32].try_into().expect("header slice"));
        if block_height == 0 || block_width == 0 {
            return Err(EmberError::Corruption("matrix block size is zero"));
        }
        let block_rows = num_rows.div_ceil(block_height as u64) as usize;
        let expected = HEADER_LEN + (block_rows + 1) * 8;
        if bytes.len() != expected {
            return Err(EmberError::Corruption("matrix index offset table truncated"));
        }
        let mut row_offs = Vec::with_capacity(block_rows + 1);
        for i in 0..=block_rows {
            let at = HEADER_LEN + i * 8;
            row_offs.push(u64::from_le_bytes(
                bytes[at..at + 8].try_into().expect("offset slice"),
            ));
        }
        if row_offs.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(EmberError::Corruption("matrix block-row offsets not sorted"));
        }
        info!(num_rows, num_cols, block_rows, "matrix index loaded");
        Ok(Self {
            num_rows,
            num_cols,
            block_height,
            block_width,
            row_offs,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_cols(&self) -> u64 {
        self.num_cols
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn block_width(&self) -> u32 {
        self.block_width
    }

    /// Height of the block grid.
    pub fn block_rows(&self) -> usize {
        self.row_offs.len() - 1
    }

    /// Width of the block grid.
    pub fn block_cols(&self) -> usize {
        self.num_cols.div_ceil(self.block_width as u64) as usize
    }

    /// File offset where block-row `idx` starts. Index `block_rows()` is
    /// the end of the last block-row.
    pub fn block_row_off(&self, idx: usize) -> u64 {
        self.row_offs[idx]
    }
}

/// A parsed block header within a page run.
#[derive(Copy, Clone, Debug)]
pub struct BlockRef {
    pub col_idx: u32,
    pub nnz: u32,
    /// Byte offset of the entry array, relative to the run start.
    pub entries_at: usize,
}

impl BlockRef {
    /// Decodes entry `i` as `(row_offset, col_offset)` within the block.
    pub fn entry(&self, run: &PageRun, i: usize) -> (u16, u16) {
        let packed = run.read_u32(self.entries_at + i * ENTRY_LEN);
        ((packed & 0xffff) as u16, (packed >> 16) as u16)
    }
}

/// Walks the blocks of one block-row segment inside a page run.
pub struct BlockCursor {
    at: usize,
    end: usize,
    peeked: Option<BlockRef>,
}

impl BlockCursor {
    /// `at..end` are run-relative byte bounds of the block-row segment.
    pub fn new(at: usize, end: usize) -> Self {
        Self {
            at,
            end,
            peeked: None,
        }
    }

    pub fn peek(&mut self, run: &PageRun) -> Result<Option<BlockRef>> {
        if self.peeked.is_none() {
            if self.at >= self.end {
                return Ok(None);
            }
            if self.at + BLOCK_HEADER_LEN > self.end {
                return Err(EmberError::Corruption("matrix block header truncated"));
            }
            let col_idx = run.read_u32(self.at);
            let nnz = run.read_u32(self.at + 4);
            let entries_at = self.at + BLOCK_HEADER_LEN;
            if entries_at + nnz as usize * ENTRY_LEN > self.end {
                return Err(EmberError::Corruption("matrix block entries truncated"));
            }
            self.peeked = Some(BlockRef {
                col_idx,
                nnz,
                entries_at,
            });
        }
        Ok(self.peeked)
    }

    pub fn advance(&mut self) {
        if let Some(block) = self.peeked.take() {
            self.at = block.entries_at + block.nnz as usize * ENTRY_LEN;
        }
    }
}

/// Writes a 2D-blocked sparse matrix file plus its index from a triplet
/// list. Entries are binary (presence only), matching adjacency-derived
/// matrices.
pub struct SpmBuilder {
    num_rows: u64,
    num_cols: u64,
    block_height: u32,
    block_width: u32,
    // (block_row, block_col) -> packed entries in insertion-independent
    // row-major order.
    blocks: BTreeMap<(u64, u64), Vec<(u16, u16)>>,
}

impl SpmBuilder {
    /// Blocks the matrix with square blocks of `row_block_size` from the
    /// execution configuration.
    pub fn with_config(num_rows: u64, num_cols: u64, config: &crate::config::MatrixConfig) -> Self {
        let block = config.row_block_size.min(u16::MAX as usize + 1) as u32;
        Self::new(num_rows, num_cols, block, block)
    }

    pub fn new(num_rows: u64, num_cols: u64, block_height: u32, block_width: u32) -> Self {
        // Entry offsets are u16, so blocks cannot exceed 65536 per side.
        Self {
            num_rows,
            num_cols,
            block_height: block_height.clamp(1, 1 << 16),
            block_width: block_width.clamp(1, 1 << 16),
            blocks: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, row: u64, col: u64) -> Result<&mut Self> {
        if row >= self.num_rows || col >= self.num_cols {
            return Err(EmberError::Invalid("matrix entry out of range"));
        }
        let key = (row / self.block_height as u64, col / self.block_width as u64);
        let entry = (
            (row % self.block_height as u64) as u16,
            (col % self.block_width as u64) as u16,
        );
        self.blocks.entry(key).or_default().push(entry);
        Ok(self)
    }

    pub fn write(&self, mat_path: impl AsRef<Path>, idx_path: impl AsRef<Path>) -> Result<()> {
        let block_rows = self.num_rows.div_ceil(self.block_height as u64) as usize;
        let mut mat = fs::File::create(mat_path.as_ref())?;
        let mut row_offs = Vec::with_capacity(block_rows + 1);
        let mut offset = 0u64;
        let mut buf = Vec::new();
        for block_row in 0..block_rows as u64 {
            row_offs.push(offset);
            buf.clear();
            let lo = (block_row, 0u64);
            let hi = (block_row, u64::MAX);
            for ((_, block_col), entries) in self.blocks.range(lo..=hi) {
                let mut sorted = entries.clone();
                sorted.sort_unstable();
                buf.extend_from_slice(&(*block_col as u32).to_le_bytes());
                buf.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
                for (r, c) in sorted {
                    let packed = r as u32 | (c as u32) << 16;
                    buf.extend_from_slice(&packed.to_le_bytes());
                }
            }
            mat.write_all(&buf)?;
            offset += buf.len() as u64;
        }
        row_offs.push(offset);
        mat.sync_all()?;

        let mut idx = Vec::with_capacity(HEADER_LEN + row_offs.len() * 8);
        idx.extend_from_slice(&MATRIX_MAGIC);
        idx.extend_from_slice(&MATRIX_VERSION.to_le_bytes());
        idx.extend_from_slice(&0u16.to_le_bytes());
        idx.extend_from_slice(&self.num_rows.to_le_bytes());
        idx.extend_from_slice(&self.num_cols.to_le_bytes());
        idx.extend_from_slice(&self.block_height.to_le_bytes());
        idx.extend_from_slice(&self.block_width.to_le_bytes());
        for off in &row_offs {
            idx.extend_from_slice(&off.to_le_bytes());
        }
        fs::write(idx_path.as_ref(), &idx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn build_and_load_index() {
        let dir = tempdir().unwrap();
        let mat_path = dir.path().join("m.spm");
        let idx_path = dir.path().join("m.spi");

        let mut builder = SpmBuilder::new(8, 8, 2, 2);
        builder.add(0, 0).unwrap();
        builder.add(3, 5).unwrap();
        builder.add(7, 7).unwrap();
        builder.write(&mat_path, &idx_path).unwrap();

        let index = SpmIndex::load(&idx_path).unwrap();
        assert_eq!(index.num_rows(), 8);
        assert_eq!(index.num_cols(), 8);
        assert_eq!(index.block_rows(), 4);
        assert_eq!(index.block_cols(), 4);
        assert_eq!(index.block_row_off(0), 0);
        // Block row 0 holds one block with one entry.
        assert_eq!(
            index.block_row_off(1),
            (BLOCK_HEADER_LEN + ENTRY_LEN) as u64
        );
        let total = index.block_row_off(4);
        assert_eq!(total, 3 * (BLOCK_HEADER_LEN + ENTRY_LEN) as u64);
    }

    #[test]
    fn out_of_range_entry_rejected() {
        let mut builder = SpmBuilder::new(4, 4, 2, 2);
        assert!(builder.add(4, 0).is_err());
        assert!(builder.add(0, 9).is_err());
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let idx_path = dir.path().join("m.spi");
        fs::write(&idx_path, vec![0u8; 64]).unwrap();
        assert!(matches!(
            SpmIndex::load(&idx_path),
            Err(EmberError::Corruption(_))
        ));
    }
}
