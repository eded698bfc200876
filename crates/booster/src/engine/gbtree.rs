//! Tree ensemble and its prediction kernels.
//!
//! Kernels read dense row-major input (`n_cols` values per row, NaN for
//! missing) and write row-major output, one rayon task per row chunk.

use std::ops::Range;

use rayon::prelude::*;

use super::tree::RegTree;

/// Gradient-boosted trees, one tree per output group per round.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GbTree {
    pub trees: Vec<RegTree>,
    /// Output group of each tree.
    pub tree_info: Vec<u32>,
}

/// Dense row-major rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rows<'a> {
    pub data: &'a [f32],
    pub n_rows: usize,
    pub n_cols: usize,
}

impl<'a> Rows<'a> {
    #[inline]
    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }
}

impl GbTree {
    pub fn push(&mut self, tree: RegTree, group: u32) {
        self.trees.push(tree);
        self.tree_info.push(group);
    }

    pub fn boosted_rounds(&self, n_groups: usize) -> u32 {
        (self.trees.len() / n_groups.max(1)) as u32
    }

    /// Trees of rounds `[begin, end)`; `end == 0` means every round.
    pub fn tree_range(&self, begin: u32, end: u32, n_groups: usize) -> Option<Range<usize>> {
        let rounds = self.boosted_rounds(n_groups);
        let end = if end == 0 { rounds } else { end };
        if begin > end || end > rounds {
            return None;
        }
        Some(begin as usize * n_groups..end as usize * n_groups)
    }

    /// Add the outputs of `trees` to `out` (`[n_rows, n_groups]`).
    pub fn accumulate_margins(
        &self,
        rows: Rows<'_>,
        n_groups: usize,
        trees: Range<usize>,
        out: &mut [f32],
    ) {
        if trees.is_empty() || rows.n_rows == 0 {
            return;
        }
        out.par_chunks_mut(n_groups)
            .enumerate()
            .for_each(|(i, out_row)| {
                let row = rows.row(i);
                for t in trees.clone() {
                    let tree = &self.trees[t];
                    out_row[self.tree_info[t] as usize] += tree.value(tree.traverse_to_leaf(row));
                }
            });
    }

    /// Leaf index per row per tree (`[n_rows, trees.len()]`).
    pub fn predict_leaf(&self, rows: Rows<'_>, trees: Range<usize>) -> Vec<f32> {
        let n_trees = trees.len();
        let mut out = vec![0.0f32; rows.n_rows * n_trees];
        if n_trees == 0 {
            return out;
        }
        out.par_chunks_mut(n_trees)
            .enumerate()
            .for_each(|(i, out_row)| {
                let row = rows.row(i);
                for (slot, t) in out_row.iter_mut().zip(trees.clone()) {
                    *slot = self.trees[t].traverse_to_leaf(row) as f32;
                }
            });
        out
    }

    /// Path-attribution contributions, `[n_rows, n_groups, n_features + 1]`.
    ///
    /// Each split on a row's path credits its feature with the change in
    /// subtree mean; the last column holds the bias (root means plus
    /// `base_margin`). Every row's slice sums to its margin.
    pub fn predict_contribs(
        &self,
        rows: Rows<'_>,
        n_features: usize,
        n_groups: usize,
        trees: Range<usize>,
        base_margin: &[f32],
    ) -> Vec<f32> {
        let width = n_features + 1;
        let stride = n_groups * width;
        let mut out = vec![0.0f32; rows.n_rows * stride];
        if rows.n_rows == 0 {
            return out;
        }
        let means: Vec<Vec<f32>> = self.trees[trees.clone()]
            .iter()
            .map(RegTree::node_means)
            .collect();

        out.par_chunks_mut(stride)
            .enumerate()
            .for_each(|(i, out_row)| {
                let row = rows.row(i);
                for (t, tree_means) in trees.clone().zip(&means) {
                    let tree = &self.trees[t];
                    let group = &mut out_row[self.tree_info[t] as usize * width..][..width];
                    group[n_features] += tree_means[0];
                    let mut node = 0;
                    while !tree.is_leaf(node) {
                        let next = tree.next_node(node, row);
                        let feature = tree.split_index(node) as usize;
                        if feature < n_features {
                            group[feature] += tree_means[next as usize] - tree_means[node as usize];
                        }
                        node = next;
                    }
                }
                for g in 0..n_groups {
                    out_row[g * width + n_features] += base_margin[i * n_groups + g];
                }
            });
        out
    }
}
