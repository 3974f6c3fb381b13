pub mod dense;
pub mod exec;
pub mod format;
pub mod order;

pub use dense::{DenseMatrix, Layout};
pub use exec::SparseMatrix;
pub use format::{SpmBuilder, SpmIndex};
pub use order::{hilbert_d2xy, BlockOrder, HilbertOrder};
