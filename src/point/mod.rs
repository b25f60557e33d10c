//! Particles and point correspondences.
//!
//! A [`Particle`] wraps one detected [`Peak`] and carries two coordinates:
//! `local`, the stretch-corrected detection that never changes, and `world`,
//! the working position that models are applied to. Matching code moves
//! `world` around freely and calls [`Particle::restore_coordinates`] before
//! anything that needs the untransformed geometry.

use crate::detect::Peak;
use crate::model::Model;
use nalgebra::Point3;

/// A detection taking part in one matching pass.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    id: usize,
    peak: Peak,
    z_stretch: f64,
    num_dimensions: usize,
    local: Point3<f64>,
    world: Point3<f64>,
}

impl Particle {
    /// Creates a particle; `z_stretch` scales the axial coordinate of 3D peaks.
    pub fn new(id: usize, peak: Peak, z_stretch: f64, num_dimensions: usize) -> Self {
        let local = Self::stretched(&peak, z_stretch, num_dimensions);
        Self {
            id,
            peak,
            z_stretch,
            num_dimensions,
            local,
            world: local,
        }
    }

    /// Builds particles with ids `0..peaks.len()`.
    pub fn from_peaks(peaks: &[Peak], z_stretch: f64, num_dimensions: usize) -> Vec<Particle> {
        peaks
            .iter()
            .enumerate()
            .map(|(id, p)| Particle::new(id, *p, z_stretch, num_dimensions))
            .collect()
    }

    fn stretched(peak: &Peak, z_stretch: f64, num_dimensions: usize) -> Point3<f64> {
        let [x, y, z] = peak.location();
        if num_dimensions == 3 {
            Point3::new(x, y, z * z_stretch)
        } else {
            Point3::new(x, y, 0.0)
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peak(&self) -> &Peak {
        &self.peak
    }

    pub fn z_stretch(&self) -> f64 {
        self.z_stretch
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    /// Stretch-corrected detection position.
    pub fn local(&self) -> Point3<f64> {
        self.local
    }

    /// Current working position.
    pub fn world(&self) -> Point3<f64> {
        self.world
    }

    /// Resets both coordinates to the stretch-corrected peak location.
    pub fn restore_coordinates(&mut self) {
        self.local = Self::stretched(&self.peak, self.z_stretch, self.num_dimensions);
        self.world = self.local;
    }

    /// Sets `world = model(local)`.
    pub fn apply(&mut self, model: &Model) {
        self.world = model.apply(&self.local);
    }

    /// World position with the axial stretch undone, as written to dumps.
    pub fn world_unstretched(&self) -> [f64; 3] {
        [self.world.x, self.world.y, self.world.z / self.z_stretch]
    }
}

/// Weighted correspondence between a particle of image A and one of image B.
///
/// Equality compares particle ids only.
#[derive(Clone, Copy, Debug)]
pub struct PointMatch {
    pub a: Particle,
    pub b: Particle,
    pub weight: f64,
}

impl PointMatch {
    pub fn new(a: Particle, b: Particle) -> Self {
        Self { a, b, weight: 1.0 }
    }

    /// Swaps the roles of A and B.
    pub fn flipped(&self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            weight: self.weight,
        }
    }

    /// Distance between the world positions.
    pub fn distance(&self) -> f64 {
        nalgebra::distance(&self.a.world, &self.b.world)
    }

    /// Applies a model to the A side.
    pub fn apply(&mut self, model: &Model) {
        self.a.apply(model);
    }

    /// Restores both particles to their detection coordinates.
    pub fn restore_coordinates(&mut self) {
        self.a.restore_coordinates();
        self.b.restore_coordinates();
    }
}

impl PartialEq for PointMatch {
    fn eq(&self, other: &Self) -> bool {
        self.a.id == other.a.id && self.b.id == other.b.id
    }
}

/// Mean distance of a correspondence list after applying `model` to the A side.
pub fn mean_residual(model: &Model, matches: &[PointMatch]) -> f64 {
    if matches.is_empty() {
        return 0.0;
    }
    let sum: f64 = matches
        .iter()
        .map(|m| nalgebra::distance(&model.apply(&m.a.local), &m.b.world))
        .sum();
    sum / matches.len() as f64
}
