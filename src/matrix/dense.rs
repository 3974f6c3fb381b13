use crate::error::{EmberError, Result};

/// Element layout of a dense operand.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

/// A dense `f64` matrix used as the SpMM operand and result.
#[derive(Clone, Debug)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    layout: Layout,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize, layout: Layout) -> Self {
        Self {
            rows,
            cols,
            layout,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(EmberError::Invalid("ragged rows in dense matrix"));
        }
        Ok(Self {
            rows: nrows,
            cols: ncols,
            layout: Layout::RowMajor,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self.layout {
            Layout::RowMajor => self.data[row * self.cols + col],
            Layout::ColMajor => self.data[col * self.rows + row],
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        match self.layout {
            Layout::RowMajor => self.data[row * self.cols + col] = value,
            Layout::ColMajor => self.data[col * self.rows + row] = value,
        }
    }

    /// Contiguous row slice; row-major only.
    pub fn row(&self, row: usize) -> &[f64] {
        debug_assert_eq!(self.layout, Layout::RowMajor);
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub(crate) fn data(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Returns a row-major copy of `self`, or a cheap clone when already
    /// row-major.
    pub fn to_row_major(&self) -> DenseMatrix {
        match self.layout {
            Layout::RowMajor => self.clone(),
            Layout::ColMajor => {
                let mut out = DenseMatrix::zeros(self.rows, self.cols, Layout::RowMajor);
                for row in 0..self.rows {
                    for col in 0..self.cols {
                        out.set(row, col, self.get(row, col));
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_agree_elementwise() {
        let mut row_major = DenseMatrix::zeros(2, 3, Layout::RowMajor);
        let mut col_major = DenseMatrix::zeros(2, 3, Layout::ColMajor);
        for r in 0..2 {
            for c in 0..3 {
                let v = (r * 3 + c) as f64;
                row_major.set(r, c, v);
                col_major.set(r, c, v);
            }
        }
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(row_major.get(r, c), col_major.get(r, c));
            }
        }
        let converted = col_major.to_row_major();
        assert_eq!(converted.row(1), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn ragged_rows_rejected() {
        assert!(DenseMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
