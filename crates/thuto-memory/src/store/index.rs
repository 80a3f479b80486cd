//! Exact, append-only L2 index over one contiguous buffer.

/// Euclidean distance between two equally sized vectors.
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Wrap an existing row-major buffer. Returns `None` unless `data.len()` is a multiple of `dim`.
    #[must_use]
    pub fn from_raw(dim: usize, data: Vec<f32>) -> Option<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return None;
        }
        Some(Self { dim, data })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Position of the first vector whose length differs from the index dimension.
    #[must_use]
    pub fn first_mismatch(&self, vectors: &[Vec<f32>]) -> Option<usize> {
        vectors.iter().position(|v| v.len() != self.dim)
    }

    /// Append `vectors` in order. The caller checks dimensions with [`Self::first_mismatch`];
    /// a wrong-sized vector here leaves the index unchanged and returns `false`.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> bool {
        if self.first_mismatch(vectors).is_some() {
            return false;
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        true
    }

    /// Drop every vector from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dim);
    }

    /// Up to `k` nearest positions accepted by `keep`, closest first.
    /// Equal distances are ordered by insertion position.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        keep: impl Fn(usize) -> bool,
    ) -> Vec<(usize, f32)> {
        if k == 0 || query.len() != self.dim {
            return Vec::new();
        }
        let mut hits: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .filter(|(i, _)| keep(*i))
            .map(|(i, v)| (i, l2_distance(query, v)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }

    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        self.search_filtered(query, k, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(rows: &[[f32; 2]]) -> FlatIndex {
        let mut index = FlatIndex::new(2);
        let rows: Vec<Vec<f32>> = rows.iter().map(|r| r.to_vec()).collect();
        assert!(index.add(&rows));
        index
    }

    #[test]
    fn distance_is_euclidean() {
        assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn search_orders_by_distance() {
        let index = index_with(&[[10.0, 0.0], [1.0, 0.0], [5.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = index_with(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
        let order: Vec<usize> = index.search(&[0.0, 0.0], 3).iter().map(|h| h.0).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn fewer_than_k_returns_all() {
        let index = index_with(&[[1.0, 1.0], [2.0, 2.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).len(), 2);
        assert!(FlatIndex::new(2).search(&[0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn filter_skips_positions() {
        let index = index_with(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]);
        let hits = index.search_filtered(&[0.0, 0.0], 2, |i| i != 0);
        let order: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn wrong_dimension_add_leaves_index_unchanged() {
        let mut index = index_with(&[[1.0, 2.0]]);
        assert!(!index.add(&[vec![1.0, 2.0], vec![1.0]]));
        assert_eq!(index.len(), 1);
        assert_eq!(index.first_mismatch(&[vec![0.0; 2], vec![0.0; 3]]), Some(1));
    }

    #[test]
    fn truncate_rolls_back() {
        let mut index = index_with(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        index.truncate(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.vector(0), Some(&[1.0, 2.0][..]));
        assert_eq!(index.vector(1), None);
    }

    #[test]
    fn from_raw_validates_shape() {
        assert!(FlatIndex::from_raw(3, vec![0.0; 6]).is_some());
        assert!(FlatIndex::from_raw(3, vec![0.0; 5]).is_none());
        assert!(FlatIndex::from_raw(0, Vec::new()).is_none());
    }
}
