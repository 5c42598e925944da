//! Sparse data model (spec.md §3/§4.A): `Node`, `SparseRow`, `Batch`.

use std::cmp;

use fnv::FnvHashSet;

/// One non-zero of a sparse row. `field_id` is 0 for LR/FM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub field_id: u32,
    pub feat_id: u32,
    pub value: f32,
}

impl Node {
    pub fn new(field_id: u32, feat_id: u32, value: f32) -> Self {
        Self {
            field_id,
            feat_id,
            value,
        }
    }
}

/// An ordered sequence of `Node`s for a single instance. Iteration order
/// matches the source-file order.
pub type SparseRow = Vec<Node>;

/// Sentinel label value for rows with no ground truth (spec.md §4.B).
pub const NO_LABEL: f32 = -2.0;

/// A columnar container of training instances ("DMatrix" in the original).
///
/// Invariant: `rows.len() == y.len() == norm.len() == row_length as usize`.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub row_length: u32,
    pub rows: Vec<SparseRow>,
    pub y: Vec<f32>,
    pub norm: Vec<f32>,
    pub has_label: bool,
    pub pos: u32,
    pub hash_value_1: u64,
    pub hash_value_2: u64,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-allocate the batch to hold `length` empty rows, all norm=1.0,
    /// releasing any rows the batch currently owns.
    pub fn reset(&mut self, length: u32, has_label: bool) {
        self.row_length = length;
        self.rows = vec![Vec::new(); length as usize];
        self.y = vec![NO_LABEL; length as usize];
        self.norm = vec![1.0; length as usize];
        self.has_label = has_label;
        self.pos = 0;
    }

    /// Append (field, feat, value) to `row`'s node list, lazily growing the
    /// batch if `row` is beyond the current length.
    pub fn add_node(&mut self, row: usize, feat: u32, value: f32, field: u32) {
        if row >= self.rows.len() {
            let new_len = row + 1;
            self.rows.resize(new_len, Vec::new());
            self.y.resize(new_len, NO_LABEL);
            self.norm.resize(new_len, 1.0);
            self.row_length = new_len as u32;
        }
        self.rows[row].push(Node::new(field, feat, value));
    }

    pub fn set_label(&mut self, row: usize, label: f32) {
        self.y[row] = label;
    }

    pub fn max_feat(&self) -> u32 {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|n| n.feat_id)
            .max()
            .unwrap_or(0)
    }

    pub fn max_field(&self) -> u32 {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|n| n.field_id)
            .max()
            .unwrap_or(0)
    }

    pub fn set_hash(&mut self, h1: u64, h2: u64) {
        self.hash_value_1 = h1;
        self.hash_value_2 = h2;
    }

    pub fn copy_from(&mut self, other: &Batch) {
        self.clone_from(other);
    }

    /// Instance-wise norm: `1 / sum(value^2)` over a row's non-zeros, or
    /// 1.0 everywhere when normalisation is disabled (`--no-norm`).
    pub fn compute_norm(&mut self, normalize: bool) {
        if !normalize {
            self.norm = vec![1.0; self.rows.len()];
            return;
        }
        self.norm = self
            .rows
            .iter()
            .map(|row| {
                let sum_sq: f32 = row.iter().map(|n| n.value * n.value).sum();
                if sum_sq > 0.0 {
                    1.0 / sum_sq
                } else {
                    f32::INFINITY
                }
            })
            .collect();
    }

    /// Consume at most `k` rows starting at `pos`, writing shared
    /// references into `out` and returning the count actually copied.
    /// Rows are borrowed, not duplicated.
    pub fn get_mini_batch<'a>(&'a self, k: u32, out: &mut Vec<(&'a SparseRow, f32, f32)>) -> u32 {
        out.clear();
        let start = self.pos as usize;
        let end = cmp::min(start + k as usize, self.rows.len());
        for i in start..end {
            out.push((&self.rows[i], self.y[i], self.norm[i]));
        }
        (end - start) as u32
    }

    /// Renumber feature ids densely `1..n` using the sorted set of observed
    /// ids. Returns the sorted feature list. Part of the distributed-shard
    /// contract (spec.md §4.A); unused by the single-node training path.
    pub fn compress(&mut self) -> Vec<u32> {
        let mut seen: FnvHashSet<u32> = FnvHashSet::default();
        for row in &self.rows {
            for node in row {
                seen.insert(node.feat_id);
            }
        }
        let mut feature_list: Vec<u32> = seen.into_iter().collect();
        feature_list.sort_unstable();
        let remap: std::collections::HashMap<u32, u32> = feature_list
            .iter()
            .enumerate()
            .map(|(new_id, &old_id)| (old_id, (new_id + 1) as u32))
            .collect();
        for row in &mut self.rows {
            for node in row.iter_mut() {
                node.feat_id = remap[&node.feat_id];
            }
        }
        feature_list
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invariant_lengths_match() {
        let mut b = Batch::new();
        b.reset(3, true);
        assert_eq!(b.rows.len(), b.y.len());
        assert_eq!(b.rows.len(), b.norm.len());
        assert_eq!(b.rows.len(), b.row_length as usize);
    }

    #[test]
    fn norm_matches_inverse_sum_of_squares() {
        let mut b = Batch::new();
        b.reset(1, true);
        b.add_node(0, 1, 2.0, 0);
        b.add_node(0, 2, 3.0, 0);
        b.compute_norm(true);
        let expected = 1.0 / (2.0f32 * 2.0 + 3.0 * 3.0);
        assert!((b.norm[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn empty_row_is_bias_only_and_legal() {
        let mut b = Batch::new();
        b.reset(1, true);
        b.set_label(0, 1.0);
        assert!(b.rows[0].is_empty());
    }

    #[test]
    fn mini_batch_advances_from_pos() {
        let mut b = Batch::new();
        b.reset(5, true);
        b.pos = 3;
        let mut out = Vec::new();
        let n = b.get_mini_batch(10, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn compress_renumbers_densely_ascending() {
        let mut b = Batch::new();
        b.reset(2, true);
        b.add_node(0, 100, 1.0, 0);
        b.add_node(0, 5, 1.0, 0);
        b.add_node(1, 100, 1.0, 0);
        let feats = b.compress();
        assert_eq!(feats, vec![5, 100]);
        assert_eq!(b.rows[0][0].feat_id, 2); // 100 -> 2nd smallest
        assert_eq!(b.rows[0][1].feat_id, 1); // 5 -> 1st smallest
    }
}
