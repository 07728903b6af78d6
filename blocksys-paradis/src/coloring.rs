use crate::DisjointSubsets;
use std::mem;

/// Greedily partitions the given index subsets into colors, such that the subsets assigned
/// to the same color are pairwise disjoint.
///
/// Subset `i` is labelled `i` in the output. Colors are filled in order: in each sweep, every
/// subset that does not collide with the current color is added to it, and the rest are
/// postponed to the next color.
pub fn sequential_greedy_coloring<S: AsRef<[usize]>>(subsets: &[S]) -> Vec<DisjointSubsets> {
    let mut colors = Vec::new();
    let mut current_subset_indices: Vec<usize> = (0..subsets.len()).collect();
    let mut postponed_subset_indices = Vec::new();

    // For every index, the last color that claimed it. Grown on demand, since we do not
    // know the largest index up front.
    let mut last_claimed_by: Vec<Option<usize>> = Vec::new();

    let mut color_idx = 0;
    while !current_subset_indices.is_empty() {
        let mut color = DisjointSubsets::default();
        for &subset_idx in &current_subset_indices {
            let subset = subsets[subset_idx].as_ref();
            let is_blocked = subset
                .iter()
                .any(|&idx| last_claimed_by.get(idx).copied().flatten() == Some(color_idx));

            if is_blocked {
                postponed_subset_indices.push(subset_idx);
            } else {
                for &idx in subset {
                    if idx >= last_claimed_by.len() {
                        // Amortize growth over many new indices
                        last_claimed_by.resize(2 * idx + 1, None);
                    }
                    last_claimed_by[idx] = Some(color_idx);
                }
                color.push_unchecked(subset_idx, subset);
            }
        }

        debug_assert!(DisjointSubsets::try_from_labeled_subsets(color.iter()).is_ok());

        colors.push(color);
        mem::swap(&mut postponed_subset_indices, &mut current_subset_indices);
        postponed_subset_indices.clear();
        color_idx += 1;
    }

    colors
}
