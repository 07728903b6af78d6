use crate::{dense_local, test_system_strategy};
use blocksys::error::ConfigError;
use blocksys::matrix::{BlockKind, DistributedMatrix, MatrixFormat, StorageOrder};
use blocksys::pattern::{IndexBase, SparsityPattern};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

fn full_pattern(num_output: usize, num_input: usize, base: IndexBase) -> Arc<SparsityPattern> {
    let entries = (0..num_output).flat_map(|i| (0..num_input).map(move |j| (i, j)));
    Arc::new(SparsityPattern::from_sorted_entries(num_output, num_input, entries, base))
}

/// Two local rows and columns, one ghost row and column, every non-ghost pair stored.
fn full_matrix(format: MatrixFormat) -> DistributedMatrix<f64> {
    let base = format.index_base;
    let (cc, rc) = match format.storage_order {
        StorageOrder::RowMajor => (full_pattern(2, 1, base), full_pattern(1, 2, base)),
        StorageOrder::ColMajor => (full_pattern(1, 2, base), full_pattern(2, 1, base)),
    };
    DistributedMatrix::allocate(full_pattern(2, 2, base), cc, rc, 1, 1, format).unwrap()
}

#[test]
fn allocate_rejects_invalid_configurations() {
    let base = IndexBase::Zero;
    let format = MatrixFormat::default();
    let main = full_pattern(2, 2, base);

    let result = DistributedMatrix::<f64>::allocate(
        main.clone(),
        full_pattern(2, 1, base),
        full_pattern(1, 2, base),
        0,
        1,
        format,
    );
    assert_eq!(
        result,
        Err(ConfigError::NonPositiveBlockSize {
            row_block_size: 0,
            col_block_size: 1
        })
    );

    let result = DistributedMatrix::<f64>::allocate(
        main.clone(),
        full_pattern(3, 1, base),
        full_pattern(1, 2, base),
        1,
        1,
        format,
    );
    assert!(matches!(
        result,
        Err(ConfigError::InconsistentPatterns {
            expected: 2,
            actual: 3,
            ..
        })
    ));

    let result = DistributedMatrix::<f64>::allocate(
        main.clone(),
        full_pattern(2, 1, base),
        full_pattern(1, 4, base),
        1,
        1,
        format,
    );
    assert!(matches!(
        result,
        Err(ConfigError::InconsistentPatterns {
            expected: 2,
            actual: 4,
            ..
        })
    ));

    let result = DistributedMatrix::<f64>::allocate(
        main,
        full_pattern(2, 1, IndexBase::One),
        full_pattern(1, 2, base),
        1,
        1,
        format,
    );
    assert_eq!(
        result,
        Err(ConfigError::IndexBaseMismatch {
            block: BlockKind::ColCouple.name()
        })
    );
}

#[test]
fn allocate_derives_extents_for_both_storage_orders() {
    for order in [StorageOrder::RowMajor, StorageOrder::ColMajor] {
        let matrix = full_matrix(MatrixFormat::new(order, IndexBase::One));
        let extents = matrix.extents();
        assert_eq!((extents.num_my_rows, extents.num_my_cols), (2, 2));
        assert_eq!((extents.num_ghost_rows, extents.num_ghost_cols), (1, 1));
        assert_eq!(matrix.block_size(), 1);
        assert_eq!(matrix.main_block().values().len(), 4);
    }
}

#[test]
fn reset_values_fills_all_blocks() {
    let mut matrix = full_matrix(MatrixFormat::default());
    matrix.reset_values(3.0);
    for kind in BlockKind::ALL {
        assert!(matrix.block(kind).values().iter().all(|&v| v == 3.0));
    }
    matrix.reset_values(0.0);
    assert_matrix_eq!(dense_local(&matrix), DMatrix::<f64>::zeros(3, 3));
}

#[test]
fn nullify_rows_and_cols_keeps_main_diagonal() {
    for order in [StorageOrder::RowMajor, StorageOrder::ColMajor] {
        let mut matrix = full_matrix(MatrixFormat::new(order, IndexBase::Zero));
        matrix.reset_values(1.0);

        // Local row 0 and ghost column 2
        matrix
            .nullify_rows_and_cols(&[true, false, false], &[false, false, true], 5.0)
            .unwrap();

        #[rustfmt::skip]
        let expected = DMatrix::from_row_slice(3, 3, &[
            5.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            1.0, 1.0, 0.0,
        ]);
        assert_matrix_eq!(dense_local(&matrix), expected);
    }

    let mut matrix = full_matrix(MatrixFormat::default());
    assert_eq!(
        matrix.nullify_rows_and_cols(&[true], &[false; 3], 1.0),
        Err(ConfigError::VectorLength {
            what: "Row mask",
            expected: 3,
            actual: 1
        })
    );
}

#[test]
fn format_is_serializable() {
    let format = MatrixFormat::new(StorageOrder::ColMajor, IndexBase::One);
    let json = serde_json::to_string(&format).unwrap();
    assert_eq!(json, r#"{"storage_order":"ColMajor","index_base":"One"}"#);
    let deserialized: MatrixFormat = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, format);
    assert_eq!(MatrixFormat::default(), MatrixFormat::new(StorageOrder::RowMajor, IndexBase::Zero));
}

#[test]
fn locate_block_splits_by_local_extents() {
    let matrix = full_matrix(MatrixFormat::default());
    let located = |row, col| matrix.locate_block(row, col).map(|entry| (entry.block, entry.row, entry.col));
    assert_eq!(located(1, 1), Some((BlockKind::Main, 1, 1)));
    assert_eq!(located(0, 2), Some((BlockKind::ColCouple, 0, 0)));
    assert_eq!(located(2, 1), Some((BlockKind::RowCouple, 0, 1)));
    assert_eq!(located(2, 2), None);
}

proptest! {
    #[test]
    fn apply_matches_dense_product(
        system in test_system_strategy(),
        col_major in any::<bool>(),
        x_values in vec(-3i32..=3, 64),
        y_values in vec(-3i32..=3, 64),
        alpha in -2i32..=2,
        beta in -2i32..=2
    ) {
        let order = if col_major { StorageOrder::ColMajor } else { StorageOrder::RowMajor };
        let mut matrix = system.allocate(MatrixFormat::new(order, IndexBase::Zero));
        for e in 0..system.elements.len() {
            matrix.add(
                system.elements.equation_nodes(e),
                system.elements.num_equ(),
                system.elements.solution_nodes(e),
                system.elements.num_sol(),
                system.elements.array(e),
            ).unwrap();
        }

        let extents = matrix.extents();
        let (rbs, cbs) = (matrix.row_block_size(), matrix.col_block_size());
        let num_local_cols = extents.num_my_cols * cbs;
        let num_cols = extents.num_cols() * cbs;
        let num_local_rows = extents.num_my_rows * rbs;
        let x = DVector::from_iterator(num_cols, x_values.iter().cycle().take(num_cols).map(|&v| f64::from(v)));
        let y0 = DVector::from_iterator(num_local_rows, y_values.iter().cycle().take(num_local_rows).map(|&v| f64::from(v)));
        let (alpha, beta) = (f64::from(alpha), f64::from(beta));

        let x_local = x.rows(0, num_local_cols).clone_owned();
        let x_ghost = x.rows(num_local_cols, num_cols - num_local_cols).clone_owned();
        let mut y = y0.clone();
        matrix.apply(alpha, &x_local, &x_ghost, beta, &mut y).unwrap();

        let dense = dense_local(&matrix);
        let expected = dense.rows(0, num_local_rows) * &x * alpha + &y0 * beta;
        assert_matrix_eq!(y, expected, comp = abs, tol = 1e-12);
    }
}
