//! Which image pairs are compared.

/// Pair selection policy for a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Every unordered pair.
    AllToAll,
    /// Unordered pairs whose index distance is at most the range.
    WithinRange(usize),
    /// Every image against the first one.
    AllToOne,
    /// Every image against its predecessor.
    Consecutive,
}

impl Default for Topology {
    fn default() -> Self {
        Topology::WithinRange(5)
    }
}

/// Two images to match; the pair model maps `a` onto `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComparisonPair {
    pub a: usize,
    pub b: usize,
}

/// Enumerates the pairs of `num_images` images in a fixed order.
pub fn compare_pairs(topology: Topology, num_images: usize) -> Vec<ComparisonPair> {
    let unordered = |range: usize| {
        (0..num_images)
            .flat_map(move |a| (a + 1..num_images).map(move |b| ComparisonPair { a, b }))
            .filter(move |p| p.b - p.a <= range)
            .collect()
    };
    match topology {
        Topology::AllToAll => unordered(usize::MAX),
        Topology::WithinRange(range) => unordered(range),
        Topology::AllToOne => (1..num_images).map(|a| ComparisonPair { a, b: 0 }).collect(),
        Topology::Consecutive => (1..num_images)
            .map(|a| ComparisonPair { a, b: a - 1 })
            .collect(),
    }
}
