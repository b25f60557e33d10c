//! Local point descriptors built from nearest neighbours.
//!
//! Two flavours exist. [`ModelDescriptor`] is used while no transform between
//! the images is known: its distance aligns neighbour subsets with the best
//! rotation before comparing them, so it is invariant to rotation and
//! translation. [`SimpleDescriptor`] is used once the A particles have been
//! mapped through a current model; neighbour offsets are compared directly.

pub mod matcher;
pub mod subset;

pub use matcher::find_corresponding_descriptors;
pub use subset::SubsetMatcher;

use crate::model::affine::fit_rotation;
use crate::point::Particle;
use crate::spatial::KdTree;
use crate::util::MatchFailure;
use nalgebra::Vector3;

/// Descriptor construction and matching parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorConfig {
    /// Neighbours per descriptor.
    pub num_neighbors: usize,
    /// Extra neighbours collected for subset enumeration.
    pub redundancy: usize,
    /// Required ratio between second-best and best distance.
    pub significance: f64,
    /// Absolute ceiling on the best distance.
    pub min_similarity: f64,
    /// Treat the images as roughly pre-aligned and skip rotation invariance.
    pub similar_orientation: bool,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            num_neighbors: 3,
            redundancy: 1,
            significance: 3.0,
            min_similarity: 100.0,
            similar_orientation: false,
        }
    }
}

/// A descriptor that can be compared with others of its type.
pub trait PointDescriptor {
    /// The particle the descriptor was built around.
    fn basis(&self) -> &Particle;

    /// Dissimilarity; lower is more similar.
    fn distance(&self, other: &Self) -> f64;
}

/// Offsets to the `k` nearest neighbours, compared position by position.
#[derive(Clone, Debug)]
pub struct SimpleDescriptor {
    basis: Particle,
    relative: Vec<Vector3<f64>>,
}

impl PointDescriptor for SimpleDescriptor {
    fn basis(&self) -> &Particle {
        &self.basis
    }

    fn distance(&self, other: &Self) -> f64 {
        self.relative
            .iter()
            .zip(&other.relative)
            .map(|(a, b)| (a - b).norm_squared())
            .sum()
    }
}

/// Offsets to the `n + r` nearest neighbours, compared over all subsets after
/// rotational alignment.
#[derive(Clone, Debug)]
pub struct ModelDescriptor<'m> {
    basis: Particle,
    relative: Vec<Vector3<f64>>,
    matcher: &'m SubsetMatcher,
}

impl ModelDescriptor<'_> {
    /// Sum of squared residuals after rotating subset `sa` onto subset `sb`.
    fn aligned_residual(&self, other: &Self, sa: &[usize], sb: &[usize]) -> f64 {
        let pairs: Vec<(Vector3<f64>, Vector3<f64>, f64)> = sa
            .iter()
            .zip(sb)
            .map(|(&i, &j)| (self.relative[i], other.relative[j], 1.0))
            .collect();
        let Ok(rotation) = fit_rotation(&pairs, self.basis.num_dimensions()) else {
            return f64::INFINITY;
        };
        pairs
            .iter()
            .map(|(p, q, _)| (rotation * p - q).norm_squared())
            .sum()
    }
}

impl PointDescriptor for ModelDescriptor<'_> {
    fn basis(&self) -> &Particle {
        &self.basis
    }

    fn distance(&self, other: &Self) -> f64 {
        let subsets = self.matcher.subsets();
        let mut best = f64::INFINITY;
        for sa in subsets {
            for sb in subsets {
                best = best.min(self.aligned_residual(other, sa, sb));
            }
        }
        best
    }
}

/// Distance-sorted neighbour offsets (world coordinates) for every particle.
fn neighbour_offsets(
    particles: &[Particle],
    required: usize,
) -> Result<Vec<Vec<Vector3<f64>>>, MatchFailure> {
    if particles.len() <= required {
        return Err(MatchFailure::InsufficientData {
            reason: format!(
                "{} peaks, descriptors need more than {} neighbours",
                particles.len(),
                required
            ),
        });
    }
    let n = particles.first().map_or(2, Particle::num_dimensions);
    let points: Vec<_> = particles.iter().map(Particle::world).collect();
    let tree = KdTree::build(&points, n).ok_or_else(|| MatchFailure::InsufficientData {
        reason: "no peaks".to_string(),
    })?;
    Ok((0..particles.len())
        .map(|i| {
            tree.k_nearest_excluding(i, required)
                .into_iter()
                .map(|nb| tree.point(nb.index) - points[i])
                .collect()
        })
        .collect())
}

/// Builds descriptors from the `num_neighbors` nearest neighbours.
pub fn simple_descriptors(
    particles: &[Particle],
    num_neighbors: usize,
) -> Result<Vec<SimpleDescriptor>, MatchFailure> {
    let offsets = neighbour_offsets(particles, num_neighbors)?;
    Ok(particles
        .iter()
        .zip(offsets)
        .map(|(p, relative)| SimpleDescriptor {
            basis: *p,
            relative,
        })
        .collect())
}

/// Builds rotation-invariant descriptors over the matcher's neighbour subsets.
pub fn model_descriptors<'m>(
    particles: &[Particle],
    matcher: &'m SubsetMatcher,
) -> Result<Vec<ModelDescriptor<'m>>, MatchFailure> {
    let offsets = neighbour_offsets(particles, matcher.required_neighbors())?;
    Ok(particles
        .iter()
        .zip(offsets)
        .map(|(p, relative)| ModelDescriptor {
            basis: *p,
            relative,
            matcher,
        })
        .collect())
}
