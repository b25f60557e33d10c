//! Neighbour subsets for descriptors built without a known model.

/// Iterator over k-combinations of `0..n` in lexicographic order.
pub struct Combinations {
    n: usize,
    k: usize,
    next: Option<Vec<usize>>,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        let next = if k <= n { Some((0..k).collect()) } else { None };
        Self { n, k, next }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        // Advance the rightmost position that still has room.
        let mut succ = current.clone();
        let mut i = self.k;
        while i > 0 {
            i -= 1;
            if succ[i] < self.n - self.k + i {
                succ[i] += 1;
                for j in (i + 1)..self.k {
                    succ[j] = succ[j - 1] + 1;
                }
                self.next = Some(succ);
                break;
            }
        }
        Some(current)
    }
}

/// Enumerates every `num_neighbors`-subset of the `num_neighbors + redundancy`
/// nearest neighbours.
#[derive(Clone, Debug)]
pub struct SubsetMatcher {
    num_neighbors: usize,
    redundancy: usize,
    subsets: Vec<Vec<usize>>,
}

impl SubsetMatcher {
    pub fn new(num_neighbors: usize, redundancy: usize) -> Self {
        let subsets = Combinations::new(num_neighbors + redundancy, num_neighbors).collect();
        Self {
            num_neighbors,
            redundancy,
            subsets,
        }
    }

    /// Neighbours each descriptor must collect.
    pub fn required_neighbors(&self) -> usize {
        self.num_neighbors + self.redundancy
    }

    pub fn num_neighbors(&self) -> usize {
        self.num_neighbors
    }

    /// Index subsets into the distance-sorted neighbour list.
    pub fn subsets(&self) -> &[Vec<usize>] {
        &self.subsets
    }
}

#[cfg(test)]
mod tests {
    use super::{Combinations, SubsetMatcher};

    #[test]
    fn enumerates_all_combinations_in_order() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(5, 3).count(), 10);
        assert_eq!(Combinations::new(2, 3).count(), 0);
        assert_eq!(Combinations::new(3, 0).collect::<Vec<_>>(), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn subset_matcher_counts() {
        let m = SubsetMatcher::new(3, 1);
        assert_eq!(m.required_neighbors(), 4);
        assert_eq!(m.subsets().len(), 4);
        let m = SubsetMatcher::new(3, 0);
        assert_eq!(m.subsets(), &[vec![0, 1, 2]]);
    }
}
