//! k-d tree for nearest-neighbour queries on particle positions.
//!
//! The tree is built once from a point list and queried many times while
//! building descriptors. Distances are compared as `(distance², index)` so that
//! equal distances always resolve to the lower index and descriptor
//! construction is reproducible.

use nalgebra::Point3;
use std::cmp::Ordering;

/// A 2D or 3D k-d tree over a fixed point set.
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<Point3<f64>>,
    num_dimensions: usize,
}

#[derive(Debug, Clone)]
struct KdNode {
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    split_dim: usize,
}

/// Neighbour returned by a query: point index and squared distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dist_sq: f64,
}

fn neighbor_cmp(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.dist_sq
        .total_cmp(&b.dist_sq)
        .then_with(|| a.index.cmp(&b.index))
}

impl KdTree {
    /// Builds a tree over `points`; only the first `num_dimensions` axes are used.
    ///
    /// Returns `None` for an empty point list.
    pub fn build(points: &[Point3<f64>], num_dimensions: usize) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let points = points.to_vec();
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(&points, num_dimensions, &mut indices, 0, &mut nodes);
        Some(Self {
            nodes,
            points,
            num_dimensions,
        })
    }

    fn build_recursive(
        points: &[Point3<f64>],
        num_dimensions: usize,
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }
        let split_dim = depth % num_dimensions;
        indices.sort_by(|&a, &b| {
            points[a][split_dim]
                .total_cmp(&points[b][split_dim])
                .then_with(|| a.cmp(&b))
        });

        let median = indices.len() / 2;
        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx: indices[median],
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];
        let left = Self::build_recursive(points, num_dimensions, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, num_dimensions, right_indices, depth + 1, nodes);
        nodes[node_idx].left = left;
        nodes[node_idx].right = right;
        Some(node_idx)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, idx: usize) -> Point3<f64> {
        self.points[idx]
    }

    fn dist_sq(&self, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
        (0..self.num_dimensions)
            .map(|d| (a[d] - b[d]) * (a[d] - b[d]))
            .sum()
    }

    /// The `k` nearest points to `query`, sorted by ascending distance.
    pub fn k_nearest(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut heap = BoundedMaxHeap::new(k);
        self.k_nearest_recursive(0, query, &mut heap);
        let mut result = heap.into_vec();
        result.sort_by(neighbor_cmp);
        result
    }

    /// The `k` nearest neighbours of the stored point `index`, excluding itself.
    pub fn k_nearest_excluding(&self, index: usize, k: usize) -> Vec<Neighbor> {
        let query = self.points[index];
        let mut result = self.k_nearest(&query, k + 1);
        result.retain(|n| n.index != index);
        result.truncate(k);
        result
    }

    fn k_nearest_recursive(&self, node_idx: usize, query: &Point3<f64>, heap: &mut BoundedMaxHeap) {
        let node = &self.nodes[node_idx];
        let point = &self.points[node.point_idx];
        heap.push(Neighbor {
            index: node.point_idx,
            dist_sq: self.dist_sq(query, point),
        });

        let diff = query[node.split_dim] - point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(first_idx) = first {
            self.k_nearest_recursive(first_idx, query, heap);
        }
        // `<=` keeps equal-distance candidates reachable for index tie-breaking.
        if let Some(second_idx) = second {
            if !heap.is_full() || diff * diff <= heap.max_distance() {
                self.k_nearest_recursive(second_idx, query, heap);
            }
        }
    }
}

/// Bounded max-heap keeping the k best neighbours seen so far.
#[derive(Debug)]
struct BoundedMaxHeap {
    capacity: usize,
    items: Vec<Neighbor>,
}

impl BoundedMaxHeap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity + 1),
        }
    }

    fn push(&mut self, n: Neighbor) {
        if self.items.len() < self.capacity {
            self.items.push(n);
            self.sift_up(self.items.len() - 1);
        } else if neighbor_cmp(&n, &self.items[0]) == Ordering::Less {
            self.items[0] = n;
            self.sift_down(0);
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn max_distance(&self) -> f64 {
        self.items.first().map_or(f64::INFINITY, |n| n.dist_sq)
    }

    fn into_vec(self) -> Vec<Neighbor> {
        self.items
    }

    fn greater(&self, a: usize, b: usize) -> bool {
        neighbor_cmp(&self.items[a], &self.items[b]) == Ordering::Greater
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.greater(idx, parent) {
                self.items.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut largest = idx;
            if left < self.items.len() && self.greater(left, largest) {
                largest = left;
            }
            if right < self.items.len() && self.greater(right, largest) {
                largest = right;
            }
            if largest == idx {
                break;
            }
            self.items.swap(idx, largest);
            idx = largest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{neighbor_cmp, KdTree, Neighbor};
    use nalgebra::Point3;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn brute_force(points: &[Point3<f64>], query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = points
            .iter()
            .enumerate()
            .map(|(index, p)| Neighbor {
                index,
                dist_sq: (p - query).norm_squared(),
            })
            .collect();
        all.sort_by(neighbor_cmp);
        all.truncate(k);
        all
    }

    #[test]
    fn matches_brute_force_in_3d() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let points: Vec<Point3<f64>> = (0..200)
            .map(|_| {
                Point3::new(
                    rng.random_range(0.0..100.0),
                    rng.random_range(0.0..100.0),
                    rng.random_range(0.0..30.0),
                )
            })
            .collect();
        let tree = KdTree::build(&points, 3).unwrap();
        let ids = |v: Vec<Neighbor>| v.into_iter().map(|n| n.index).collect::<Vec<_>>();
        for q in points.iter().take(20) {
            assert_eq!(ids(tree.k_nearest(q, 6)), ids(brute_force(&points, q, 6)));
        }
    }

    #[test]
    fn equal_distances_resolve_to_lower_index() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
        ];
        let tree = KdTree::build(&points, 2).unwrap();
        let n = tree.k_nearest_excluding(0, 2);
        assert_eq!(n.iter().map(|n| n.index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn excludes_the_query_point() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ];
        let tree = KdTree::build(&points, 2).unwrap();
        let n = tree.k_nearest_excluding(1, 2);
        assert_eq!(n[0].index, 2);
        assert_eq!(n[1].index, 0);
        assert!(KdTree::build(&[], 2).is_none());
    }
}
