mod common;

use ember::{DenseMatrix, EmberError, Layout, MatrixConfig, SparseMatrix, SpmBuilder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use common::runtime;

struct Fixture {
    _dir: tempfile::TempDir,
    mat_path: std::path::PathBuf,
    idx_path: std::path::PathBuf,
    entries: Vec<(u64, u64)>,
    rows: u64,
    cols: u64,
}

fn build_matrix(
    rows: u64,
    cols: u64,
    block: u32,
    entries: &[(u64, u64)],
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mat_path = dir.path().join("m.spm");
    let idx_path = dir.path().join("m.spi");
    let mut builder = SpmBuilder::new(rows, cols, block, block);
    for &(r, c) in entries {
        builder.add(r, c).unwrap();
    }
    builder.write(&mat_path, &idx_path).unwrap();
    Fixture {
        _dir: dir,
        mat_path,
        idx_path,
        entries: entries.to_vec(),
        rows,
        cols,
    }
}

fn random_entries(rows: u64, cols: u64, count: usize, seed: u64) -> Vec<(u64, u64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut entries = std::collections::BTreeSet::new();
    while entries.len() < count {
        entries.insert((rng.gen_range(0..rows), rng.gen_range(0..cols)));
    }
    entries.into_iter().collect()
}

fn reference_spmv(fixture: &Fixture, input: &[f64]) -> Vec<f64> {
    assert_eq!(input.len(), fixture.cols as usize);
    let mut out = vec![0.0; fixture.rows as usize];
    for &(r, c) in &fixture.entries {
        out[r as usize] += input[c as usize];
    }
    out
}

fn open(fixture: &Fixture, config: MatrixConfig) -> SparseMatrix {
    SparseMatrix::open(&runtime(3), &fixture.mat_path, &fixture.idx_path, config).unwrap()
}

#[test]
fn spmv_matches_reference_in_file_order() {
    let fixture = build_matrix(16, 16, 2, &random_entries(16, 16, 40, 7));
    let matrix = open(&fixture, MatrixConfig::default());
    let input: Vec<f64> = (0..16).map(|i| (i + 1) as f64).collect();
    assert_eq!(matrix.spmv(&input).unwrap(), reference_spmv(&fixture, &input));
}

#[test]
fn hilbert_order_visits_every_block_and_matches_sequential() {
    // A fully populated 4x4 block grid; one strip covers the whole grid, so
    // the task walks all 16 blocks along the curve.
    let mut entries = Vec::new();
    for r in 0..8u64 {
        for c in 0..8u64 {
            if (r + c) % 3 != 0 {
                entries.push((r, c));
            }
        }
    }
    let fixture = build_matrix(8, 8, 2, &entries);
    let input: Vec<f64> = (0..8).map(|i| (2 * i + 1) as f64).collect();

    let sequential = open(
        &fixture,
        MatrixConfig {
            rb_io_size: 4,
            use_hilbert_order: false,
            ..MatrixConfig::default()
        },
    );
    let hilbert = open(
        &fixture,
        MatrixConfig {
            rb_io_size: 4,
            use_hilbert_order: true,
            ..MatrixConfig::default()
        },
    );
    let expect = reference_spmv(&fixture, &input);
    assert_eq!(sequential.spmv(&input).unwrap(), expect);
    assert_eq!(hilbert.spmv(&input).unwrap(), expect);
}

#[test]
fn hilbert_with_multiple_strips_matches_reference() {
    // 8x8 block grid processed as four 2-block-row strips with 2x2 windows.
    let fixture = build_matrix(16, 16, 2, &random_entries(16, 16, 60, 21));
    let matrix = open(
        &fixture,
        MatrixConfig {
            rb_io_size: 2,
            use_hilbert_order: true,
            ..MatrixConfig::default()
        },
    );
    // Integer-valued operands keep every partial sum exact, so results are
    // comparable across block visit orders.
    let input: Vec<f64> = (0..16).map(|i| ((i % 7) + 1) as f64).collect();
    assert_eq!(matrix.spmv(&input).unwrap(), reference_spmv(&fixture, &input));
}

#[test]
fn hilbert_rejects_non_square_grid_before_dispatch() {
    // 4x3 block grid.
    let fixture = build_matrix(8, 6, 2, &[(0, 0), (7, 5)]);
    let matrix = open(
        &fixture,
        MatrixConfig {
            rb_io_size: 4,
            use_hilbert_order: true,
            ..MatrixConfig::default()
        },
    );
    let err = matrix.spmv(&vec![1.0; 6]).unwrap_err();
    assert!(matches!(err, EmberError::Invalid(_)));
    assert_eq!(matrix.io_stats().requests, 0);
}

#[test]
fn hilbert_rejects_non_power_of_two_grid_before_dispatch() {
    // 3x3 block grid.
    let fixture = build_matrix(6, 6, 2, &[(0, 0), (5, 5)]);
    let matrix = open(
        &fixture,
        MatrixConfig {
            rb_io_size: 3,
            use_hilbert_order: true,
            ..MatrixConfig::default()
        },
    );
    let err = matrix.spmv(&vec![1.0; 6]).unwrap_err();
    assert!(matches!(err, EmberError::Invalid(_)));
}

#[test]
fn builder_blocks_by_configured_row_block_size() {
    let config = MatrixConfig {
        row_block_size: 4,
        ..MatrixConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let mat_path = dir.path().join("m.spm");
    let idx_path = dir.path().join("m.spi");
    let mut builder = ember::SpmBuilder::with_config(8, 8, &config);
    builder.add(0, 0).unwrap();
    builder.add(7, 3).unwrap();
    builder.write(&mat_path, &idx_path).unwrap();

    let index = ember::matrix::SpmIndex::load(&idx_path).unwrap();
    assert_eq!(index.block_height(), 4);
    assert_eq!(index.block_rows(), 2);
    assert_eq!(index.block_cols(), 2);

    let matrix = SparseMatrix::open(&runtime(2), &mat_path, &idx_path, config).unwrap();
    let out = matrix.spmv(&vec![2.0; 8]).unwrap();
    assert_eq!(out[0], 2.0);
    assert_eq!(out[7], 2.0);
    assert_eq!(out[1..7], [0.0; 6]);
}

#[test]
fn empty_matrix_yields_zero_output() {
    let fixture = build_matrix(8, 8, 2, &[]);
    let matrix = open(&fixture, MatrixConfig::default());
    assert_eq!(matrix.spmv(&vec![1.0; 8]).unwrap(), vec![0.0; 8]);
}

#[test]
fn operand_shape_mismatch_is_rejected() {
    let fixture = build_matrix(8, 8, 2, &[(0, 0)]);
    let matrix = open(&fixture, MatrixConfig::default());
    assert!(matrix.spmv(&vec![1.0; 5]).is_err());
}

#[test]
fn spmm_row_and_column_major_outputs_agree() {
    let fixture = build_matrix(16, 16, 2, &random_entries(16, 16, 50, 3));
    let matrix = open(&fixture, MatrixConfig::default());

    let mut operand = DenseMatrix::zeros(16, 3, Layout::RowMajor);
    for r in 0..16 {
        for c in 0..3 {
            operand.set(r, c, (r * 3 + c) as f64 * 0.5 + 1.0);
        }
    }

    let row_major = matrix.spmm(&operand, Layout::RowMajor).unwrap();
    let col_major = matrix.spmm(&operand, Layout::ColMajor).unwrap();
    assert_eq!(col_major.layout(), Layout::ColMajor);
    for r in 0..16 {
        for c in 0..3 {
            assert_eq!(row_major.get(r, c), col_major.get(r, c));
        }
    }

    // Column 0 of the operand reproduces spmv.
    let input: Vec<f64> = (0..16).map(|r| operand.get(r, 0)).collect();
    let spmv = matrix.spmv(&input).unwrap();
    for r in 0..16 {
        assert_eq!(row_major.get(r, 0), spmv[r]);
    }
}
