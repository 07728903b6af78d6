use blocksys::matrix::{LocalExtents, StorageOrder};
use blocksys::pattern::{DistributedPatternBuilder, IndexBase, SparsityPattern};
use proptest::collection::vec;
use proptest::prelude::*;

/// Three nodes in a chain, node 2 is a ghost. Elements are the two segments.
fn chain_builder(order: StorageOrder) -> DistributedPatternBuilder {
    let extents = LocalExtents {
        num_my_rows: 2,
        num_my_cols: 2,
        num_ghost_rows: 1,
        num_ghost_cols: 1,
    };
    let mut builder = DistributedPatternBuilder::new(extents, order, IndexBase::Zero);
    builder.add_element(&[0, 1], &[0, 1]);
    builder.add_element(&[1, 2], &[1, 2]);
    builder
}

#[test]
fn builder_splits_chain_into_blocks() {
    let patterns = chain_builder(StorageOrder::RowMajor).build();

    assert_eq!(patterns.main.ptr(), &[0, 2, 4]);
    assert_eq!(patterns.main.index(), &[0, 1, 0, 1]);

    // Local row 1 couples to ghost column 0
    assert_eq!((patterns.col_couple.num_output(), patterns.col_couple.num_input()), (2, 1));
    assert_eq!(patterns.col_couple.ptr(), &[0, 0, 1]);
    assert_eq!(patterns.col_couple.index(), &[0]);

    // Ghost row 0 couples to local column 1, the ghost x ghost pair (2, 2) is not stored
    assert_eq!((patterns.row_couple.num_output(), patterns.row_couple.num_input()), (1, 2));
    assert_eq!(patterns.row_couple.ptr(), &[0, 1]);
    assert_eq!(patterns.row_couple.index(), &[1]);
}

#[test]
fn col_major_builder_compresses_by_column() {
    let patterns = chain_builder(StorageOrder::ColMajor).build();

    // Column-major coupling patterns are indexed by the block's columns
    assert_eq!((patterns.col_couple.num_output(), patterns.col_couple.num_input()), (1, 2));
    assert_eq!(patterns.col_couple.ptr(), &[0, 1]);
    assert_eq!(patterns.col_couple.index(), &[1]);

    assert_eq!((patterns.row_couple.num_output(), patterns.row_couple.num_input()), (2, 1));
    assert_eq!(patterns.row_couple.ptr(), &[0, 0, 1]);
    assert_eq!(patterns.row_couple.index(), &[0]);
}

#[test]
fn builder_expands_nodes_into_subblocks() {
    let extents = LocalExtents {
        num_my_rows: 4,
        num_my_cols: 2,
        num_ghost_rows: 0,
        num_ghost_cols: 0,
    };
    let mut builder = DistributedPatternBuilder::new(extents, StorageOrder::RowMajor, IndexBase::One).with_subblocks(2, 1);
    builder.add_element(&[1], &[0]);
    let patterns = builder.build();

    assert_eq!(patterns.main.ptr(), &[1, 1, 1, 2, 3]);
    assert_eq!(patterns.main.index(), &[1, 1]);
    assert_eq!(patterns.main.find(2, 0), Some(0));
    assert_eq!(patterns.main.find(3, 0), Some(1));
}

#[test]
fn neighbours_include_the_slot_offset() {
    let pattern = SparsityPattern::from_sorted_entries(3, 4, [(0, 1), (0, 3), (2, 0), (2, 2)], IndexBase::One);
    assert_eq!(pattern.neighbours_of(0), (0, &[2, 4][..]));
    assert_eq!(pattern.neighbours_of(1), (2, &[][..]));
    assert_eq!(pattern.neighbours_of(2), (2, &[1, 3][..]));
    assert_eq!(pattern.nnz(), 4);
}

proptest! {
    #[test]
    fn sorted_entries_round_trip_through_offsets_and_indices(
        entries in vec((0usize..5, 0usize..4), 0..20),
        one_based in any::<bool>()
    ) {
        let base = if one_based { IndexBase::One } else { IndexBase::Zero };
        let mut sorted = entries.clone();
        sorted.sort_unstable();
        sorted.dedup();

        let pattern = SparsityPattern::from_sorted_entries(5, 4, entries_sorted_with_duplicates(&entries), base);
        prop_assert_eq!(pattern.entries().collect::<Vec<_>>(), sorted.clone());

        let rebuilt = SparsityPattern::try_from_offsets_and_indices(
            5,
            4,
            pattern.ptr().to_vec(),
            pattern.index().to_vec(),
            base,
        );
        prop_assert_eq!(rebuilt.as_ref(), Ok(&pattern));

        for (slot, &(major, minor)) in sorted.iter().enumerate() {
            prop_assert_eq!(pattern.find(major, minor), Some(slot));
        }
    }
}

fn entries_sorted_with_duplicates(entries: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut sorted = entries.to_vec();
    sorted.sort_unstable();
    sorted
}
