//! Bucket-splitting kd-tree over fixed-dimension keys.
//!
//! Used twice: over triangle xy-bounds (`D = 4`, keys
//! `[min_x, max_x, min_y, max_y]`) for cutter-footprint range queries, and
//! over plain points for nearest-neighbour lookups.
//!
//! Leaves hold up to `bucket_size` entries. A full leaf splits on the axis
//! with the largest spread, at the median. Entries whose keys are all
//! identical stay in one oversized leaf, so duplicate keys never recurse.

/// A keyed item stored in the tree.
#[derive(Debug, Clone)]
pub struct Entry<T, const D: usize> {
    /// Position of the item in key space.
    pub key: [f64; D],
    /// The item itself.
    pub item: T,
}

#[derive(Debug, Clone)]
enum Node<T, const D: usize> {
    Bucket(Vec<Entry<T, D>>),
    Split {
        dim: usize,
        threshold: f64,
        /// Keys strictly below the threshold.
        low: Box<Node<T, D>>,
        /// Keys at or above the threshold.
        high: Box<Node<T, D>>,
    },
}

/// A kd-tree mapping `D`-dimensional keys to items.
#[derive(Debug, Clone)]
pub struct KdTree<T, const D: usize> {
    root: Node<T, D>,
    bucket_size: usize,
    len: usize,
}

/// Leaf capacity used by [`KdTree::build`] callers that have no preference.
pub const DEFAULT_BUCKET_SIZE: usize = 8;

impl<T, const D: usize> KdTree<T, D> {
    /// Empty tree.
    pub fn new(bucket_size: usize) -> Self {
        Self {
            root: Node::Bucket(Vec::new()),
            bucket_size: bucket_size.max(1),
            len: 0,
        }
    }

    /// Build a tree from a snapshot of keyed items.
    pub fn build(items: impl IntoIterator<Item = ([f64; D], T)>, bucket_size: usize) -> Self {
        let bucket_size = bucket_size.max(1);
        let entries: Vec<Entry<T, D>> = items
            .into_iter()
            .map(|(key, item)| Entry { key, item })
            .collect();
        let len = entries.len();
        Self {
            root: Node::from_entries(entries, bucket_size),
            bucket_size,
            len,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the tree holds no items.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add one item, splitting its leaf if it overflows.
    pub fn insert(&mut self, key: [f64; D], item: T) {
        self.len += 1;
        self.root.insert(Entry { key, item }, self.bucket_size);
    }

    /// The entry closest to `query` (Euclidean) and its squared distance.
    ///
    /// Among equally close entries any one may be returned.
    pub fn nearest(&self, query: &[f64; D]) -> Option<(&Entry<T, D>, f64)> {
        let mut best = None;
        self.root.nearest(query, &mut best);
        best
    }

    /// All items whose key lies inside the closed box `[lo, hi]`.
    ///
    /// Infinite bounds are allowed and leave that axis unconstrained.
    pub fn within(&self, lo: &[f64; D], hi: &[f64; D]) -> Vec<&T> {
        let mut out = Vec::new();
        self.root.within(lo, hi, &mut out);
        out
    }
}

impl<T, const D: usize> Node<T, D> {
    fn from_entries(entries: Vec<Entry<T, D>>, bucket_size: usize) -> Self {
        if entries.len() <= bucket_size {
            return Node::Bucket(entries);
        }
        let Some((dim, threshold)) = split_plan(&entries) else {
            return Node::Bucket(entries);
        };
        let (low, high): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.key[dim] < threshold);
        Node::Split {
            dim,
            threshold,
            low: Box::new(Node::from_entries(low, bucket_size)),
            high: Box::new(Node::from_entries(high, bucket_size)),
        }
    }

    fn insert(&mut self, entry: Entry<T, D>, bucket_size: usize) {
        match self {
            Node::Bucket(entries) => {
                entries.push(entry);
                if entries.len() > bucket_size {
                    let taken = std::mem::take(entries);
                    *self = Node::from_entries(taken, bucket_size);
                }
            }
            Node::Split {
                dim,
                threshold,
                low,
                high,
            } => {
                if entry.key[*dim] < *threshold {
                    low.insert(entry, bucket_size);
                } else {
                    high.insert(entry, bucket_size);
                }
            }
        }
    }

    fn nearest<'a>(&'a self, query: &[f64; D], best: &mut Option<(&'a Entry<T, D>, f64)>) {
        match self {
            Node::Bucket(entries) => {
                for entry in entries {
                    let d = dist_sq(&entry.key, query);
                    if best.map_or(true, |(_, bd)| d < bd) {
                        *best = Some((entry, d));
                    }
                }
            }
            Node::Split {
                dim,
                threshold,
                low,
                high,
            } => {
                let diff = query[*dim] - threshold;
                let (near, far) = if diff < 0.0 { (low, high) } else { (high, low) };
                near.nearest(query, best);
                if best.map_or(true, |(_, bd)| diff * diff <= bd) {
                    far.nearest(query, best);
                }
            }
        }
    }

    fn within<'a>(&'a self, lo: &[f64; D], hi: &[f64; D], out: &mut Vec<&'a T>) {
        match self {
            Node::Bucket(entries) => {
                for entry in entries {
                    if (0..D).all(|d| entry.key[d] >= lo[d] && entry.key[d] <= hi[d]) {
                        out.push(&entry.item);
                    }
                }
            }
            Node::Split {
                dim,
                threshold,
                low,
                high,
            } => {
                if lo[*dim] < *threshold {
                    low.within(lo, hi, out);
                }
                if hi[*dim] >= *threshold {
                    high.within(lo, hi, out);
                }
            }
        }
    }
}

/// Axis of largest spread and a median threshold that leaves both sides
/// non-empty, or `None` if every key is identical.
fn split_plan<T, const D: usize>(entries: &[Entry<T, D>]) -> Option<(usize, f64)> {
    let mut best_dim = 0;
    let mut best_spread = 0.0;
    for dim in 0..D {
        let (min, max) = entries.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| {
            (lo.min(e.key[dim]), hi.max(e.key[dim]))
        });
        if max - min > best_spread {
            best_spread = max - min;
            best_dim = dim;
        }
    }
    if best_spread <= 0.0 {
        return None;
    }

    let mut values: Vec<f64> = entries.iter().map(|e| e.key[best_dim]).collect();
    values.sort_by(f64::total_cmp);
    let min = values[0];
    let mut threshold = values[values.len() / 2];
    if threshold <= min {
        threshold = values.iter().copied().find(|&v| v > min)?;
    }
    Some((best_dim, threshold))
}

fn dist_sq<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_nearest(points: &[[f64; 3]], q: &[f64; 3]) -> Option<f64> {
        points
            .iter()
            .map(|p| dist_sq(p, q))
            .min_by(f64::total_cmp)
    }

    fn check_nearest(points: &[[f64; 3]], queries: &[[f64; 3]], bucket_size: usize) {
        let tree = KdTree::build(points.iter().enumerate().map(|(i, p)| (*p, i)), bucket_size);
        assert_eq!(tree.len(), points.len());
        for q in queries {
            let expected = brute_nearest(points, q);
            let found = tree.nearest(q);
            match (expected, found) {
                (None, None) => {}
                (Some(d), Some((entry, fd))) => {
                    assert_eq!(d, fd);
                    assert_eq!(dist_sq(&points[entry.item], q), d);
                }
                other => panic!("mismatch: {:?}", other.0),
            }
        }
    }

    fn random_points(rng: &mut StdRng, n: usize, grid: i32) -> Vec<[f64; 3]> {
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(-grid..=grid) as f64,
                    rng.gen_range(-grid..=grid) as f64,
                    rng.gen_range(-grid..=grid) as f64,
                ]
            })
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree: KdTree<usize, 3> = KdTree::new(4);
        assert!(tree.is_empty());
        assert!(tree.nearest(&[0.0, 0.0, 0.0]).is_none());
        assert!(tree.within(&[-1.0; 3], &[1.0; 3]).is_empty());
    }

    #[test]
    fn test_sizes_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [0, 1, 100, 10_000] {
            let points = random_points(&mut rng, n, 20);
            let queries = random_points(&mut rng, 200, 25);
            check_nearest(&points, &queries, DEFAULT_BUCKET_SIZE);
        }
    }

    #[test]
    fn test_all_duplicates() {
        let points = vec![[1.0, 1.0, 1.0]; 50];
        check_nearest(&points, &[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]], 2);
    }

    #[test]
    fn test_incremental_insert_matches_build() {
        let mut rng = StdRng::seed_from_u64(11);
        let points = random_points(&mut rng, 500, 6);
        let mut tree = KdTree::new(4);
        for (i, p) in points.iter().enumerate() {
            tree.insert(*p, i);
        }
        assert_eq!(tree.len(), 500);
        for q in random_points(&mut rng, 100, 8) {
            let (_, d) = tree.nearest(&q).unwrap();
            assert_eq!(Some(d), brute_nearest(&points, &q));
        }
    }

    #[test]
    fn test_within_box() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = random_points(&mut rng, 1_000, 10);
        let tree = KdTree::build(points.iter().enumerate().map(|(i, p)| (*p, i)), 6);
        let lo = [-2.0, f64::NEG_INFINITY, 0.0];
        let hi = [3.0, 1.0, f64::INFINITY];
        let mut found: Vec<usize> = tree.within(&lo, &hi).into_iter().copied().collect();
        found.sort_unstable();
        let expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| (0..3).all(|d| p[d] >= lo[d] && p[d] <= hi[d]))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(found, expected);
    }

    proptest! {
        #[test]
        fn prop_nearest_matches_brute_force(
            raw in prop::collection::vec((-4i32..4, -4i32..4, -4i32..4), 0..150),
            query in (-6i32..6, -6i32..6, -6i32..6),
            bucket_size in 1usize..10,
        ) {
            let points: Vec<[f64; 3]> = raw
                .iter()
                .map(|&(x, y, z)| [x as f64, y as f64, z as f64])
                .collect();
            let q = [query.0 as f64, query.1 as f64, query.2 as f64];
            let tree = KdTree::build(points.iter().enumerate().map(|(i, p)| (*p, i)), bucket_size);
            let found = tree.nearest(&q).map(|(_, d)| d);
            prop_assert_eq!(found, brute_nearest(&points, &q));
        }
    }
}
