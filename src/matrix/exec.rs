use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::dense::{DenseMatrix, Layout};
use super::format::{BlockCursor, BlockRef, SpmIndex};
use super::order::{BlockOrder, HilbertOrder};
use crate::config::MatrixConfig;
use crate::error::{EmberError, Result};
use crate::io::{round_down_page, round_up_page, FileId, IoFactory, PageRun};
use crate::runtime::Runtime;

/// External-memory 2D-blocked sparse matrix.
///
/// Multiplication streams strips of block-rows through the page cache; each
/// strip is one I/O, iterated block by block in the configured order.
/// Entries are binary, so `out[row] += Σ in[col]` per block (or the
/// row-vector equivalent for a dense operand).
pub struct SparseMatrix {
    index: SpmIndex,
    io: Arc<IoFactory>,
    file: FileId,
    config: MatrixConfig,
}

impl SparseMatrix {
    pub fn open(
        runtime: &Arc<Runtime>,
        mat_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
        config: MatrixConfig,
    ) -> Result<Self> {
        let index = SpmIndex::load(idx_path)?;
        let io = IoFactory::new(
            Arc::clone(runtime.cache()),
            runtime.config().num_threads,
            runtime.config().io_threads,
        );
        let file = io.open_file(mat_path)?;
        info!(
            num_rows = index.num_rows(),
            num_cols = index.num_cols(),
            block_rows = index.block_rows(),
            block_cols = index.block_cols(),
            "sparse matrix opened"
        );
        Ok(Self {
            index,
            io,
            file,
            config,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.index.num_rows()
    }

    pub fn num_cols(&self) -> u64 {
        self.index.num_cols()
    }

    pub fn io_stats(&self) -> crate::io::IoStats {
        self.io.stats()
    }

    /// Validates the configured ordering against the block grid and returns
    /// the strip height (in block-rows) plus the order to use. Rejection
    /// happens here, before any task is dispatched.
    fn plan(&self) -> Result<(usize, BlockOrder)> {
        let grid_rows = self.index.block_rows();
        let grid_cols = self.index.block_cols();
        let strip = self.config.rb_io_size.min(grid_rows.max(1));
        if !self.config.use_hilbert_order {
            return Ok((strip, BlockOrder::Sequential));
        }
        if grid_rows != grid_cols {
            return Err(EmberError::Invalid(
                "hilbert order requires a square block grid",
            ));
        }
        if grid_rows % strip != 0 {
            return Err(EmberError::Invalid(
                "hilbert order requires strips that tile the block grid",
            ));
        }
        let order = HilbertOrder::new(strip)?;
        debug!(strip, "hilbert execution order selected");
        Ok((strip, BlockOrder::Hilbert(Arc::new(order))))
    }

    /// Sparse matrix–vector product.
    pub fn spmv(&self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() != self.index.num_cols() as usize {
            return Err(EmberError::Invalid(
                "operand length does not match matrix columns",
            ));
        }
        let (strip, order) = self.plan()?;
        let mut output = vec![0.0; self.index.num_rows() as usize];
        self.execute(strip, &order, input, 1, &mut output)?;
        Ok(output)
    }

    /// Sparse matrix–dense matrix product. The inner loop is row-strided;
    /// a column-major result is accumulated in a row-major scratch and
    /// copied back on completion.
    pub fn spmm(&self, input: &DenseMatrix, output_layout: Layout) -> Result<DenseMatrix> {
        if input.rows() != self.index.num_cols() as usize {
            return Err(EmberError::Invalid(
                "operand height does not match matrix columns",
            ));
        }
        let width = input.cols();
        let (strip, order) = self.plan()?;
        let input = input.to_row_major();
        let num_rows = self.index.num_rows() as usize;
        match output_layout {
            Layout::RowMajor => {
                let mut output = DenseMatrix::zeros(num_rows, width, Layout::RowMajor);
                self.execute(strip, &order, input.data(), width, output.data_mut())?;
                Ok(output)
            }
            Layout::ColMajor => {
                let mut scratch = vec![0.0; num_rows * width];
                self.execute(strip, &order, input.data(), width, &mut scratch)?;
                let mut output = DenseMatrix::zeros(num_rows, width, Layout::ColMajor);
                for row in 0..num_rows {
                    for col in 0..width {
                        output.set(row, col, scratch[row * width + col]);
                    }
                }
                Ok(output)
            }
        }
    }

    /// Streams every strip through the workers, accumulating
    /// `out[row*k..] += in[col*k..]` per stored entry. Strips own disjoint
    /// output row ranges, so each worker writes only its chunks.
    fn execute(
        &self,
        strip: usize,
        order: &BlockOrder,
        input: &[f64],
        k: usize,
        output: &mut [f64],
    ) -> Result<()> {
        if self.index.block_rows() == 0 {
            return Ok(());
        }
        let rows_per_strip = strip * self.index.block_height() as usize;
        let num_workers = self.io.num_workers();
        let mut assignments: Vec<Vec<(usize, &mut [f64])>> =
            (0..num_workers).map(|_| Vec::new()).collect();
        for (strip_idx, chunk) in output.chunks_mut(rows_per_strip * k).enumerate() {
            assignments[strip_idx % num_workers].push((strip_idx, chunk));
        }
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (worker, strips) in assignments.into_iter().enumerate() {
                if strips.is_empty() {
                    continue;
                }
                let order = order.clone();
                handles.push(scope.spawn(move || -> Result<()> {
                    for (strip_idx, chunk) in strips {
                        self.run_strip(worker, strip_idx, strip, &order, input, k, chunk)?;
                    }
                    Ok(())
                }));
            }
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| EmberError::Engine("matrix worker panicked".to_string()))
                        .and_then(|result| result)
                })
                .collect()
        });
        for result in results {
            result?;
        }
        Ok(())
    }

    fn run_strip(
        &self,
        worker: usize,
        strip_idx: usize,
        strip: usize,
        order: &BlockOrder,
        input: &[f64],
        k: usize,
        out: &mut [f64],
    ) -> Result<()> {
        let grid_rows = self.index.block_rows();
        let br_start = strip_idx * strip;
        let br_end = (br_start + strip).min(grid_rows);
        let start = self.index.block_row_off(br_start);
        let end = self.index.block_row_off(br_end);
        if start == end {
            return Ok(());
        }
        let aligned_start = round_down_page(start);
        let aligned_len = (round_up_page(end) - aligned_start) as usize;
        let ticket = self.io.submit(worker, self.file, aligned_start, aligned_len)?;
        let run = loop {
            let mut completions = self.io.wait_poll(worker);
            if let Some(pos) = completions.iter().position(|c| c.ticket == ticket) {
                break completions.swap_remove(pos).result?;
            }
        };

        let n = br_end - br_start;
        let mut cursors: Vec<BlockCursor> = (0..n)
            .map(|i| {
                BlockCursor::new(
                    (self.index.block_row_off(br_start + i) - aligned_start) as usize,
                    (self.index.block_row_off(br_start + i + 1) - aligned_start) as usize,
                )
            })
            .collect();
        let strip_row0 = br_start * self.index.block_height() as usize;

        match order {
            BlockOrder::Sequential => {
                for (i, cursor) in cursors.iter_mut().enumerate() {
                    while let Some(block) = cursor.peek(&run)? {
                        self.apply_block(&run, &block, br_start + i, strip_row0, input, k, out);
                        cursor.advance();
                    }
                }
            }
            BlockOrder::Hilbert(hilbert) => {
                debug_assert_eq!(hilbert.n(), n);
                let mut window: Vec<Option<BlockRef>> = vec![None; n * n];
                let mut window_col = 0u32;
                loop {
                    let mut more = false;
                    window.iter_mut().for_each(|slot| *slot = None);
                    for (i, cursor) in cursors.iter_mut().enumerate() {
                        while let Some(block) = cursor.peek(&run)? {
                            if block.col_idx >= window_col + n as u32 {
                                break;
                            }
                            window[i * n + (block.col_idx - window_col) as usize] = Some(block);
                            cursor.advance();
                        }
                        if cursor.peek(&run)?.is_some() {
                            more = true;
                        }
                    }
                    for &(r, c) in hilbert.visits() {
                        if let Some(block) = window[r as usize * n + c as usize] {
                            self.apply_block(
                                &run,
                                &block,
                                br_start + r as usize,
                                strip_row0,
                                input,
                                k,
                                out,
                            );
                        }
                    }
                    if !more {
                        break;
                    }
                    window_col += n as u32;
                }
            }
        }
        Ok(())
    }

    fn apply_block(
        &self,
        run: &PageRun,
        block: &BlockRef,
        block_row: usize,
        strip_row0: usize,
        input: &[f64],
        k: usize,
        out: &mut [f64],
    ) {
        let row_base = block_row * self.index.block_height() as usize - strip_row0;
        let col_base = block.col_idx as usize * self.index.block_width() as usize;
        for i in 0..block.nnz as usize {
            let (r, c) = block.entry(run, i);
            let row = row_base + r as usize;
            let col = col_base + c as usize;
            if k == 1 {
                out[row] += input[col];
            } else {
                let out_row = &mut out[row * k..(row + 1) * k];
                let in_row = &input[col * k..(col + 1) * k];
                for (acc, value) in out_row.iter_mut().zip(in_row) {
                    *acc += value;
                }
            }
        }
    }
}
