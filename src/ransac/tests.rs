use super::{compute_ransac, filter, ransac, RansacConfig};
use crate::detect::{ExtremumKind, Peak};
use crate::model::affine::{planar_rotation, AffineModel};
use crate::model::{Model, ModelKind};
use crate::point::{Particle, PointMatch};
use crate::util::MatchFailure;
use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn particle(id: usize, x: f64, y: f64) -> Particle {
    let peak = Peak {
        position: [0, 0, 0],
        offset: [x, y, 0.0],
        value: 1.0,
        kind: ExtremumKind::Maximum,
        valid: true,
    };
    Particle::new(id, peak, 1.0, 2)
}

fn truth() -> Model {
    Model::Affine(AffineModel::from_parts(
        ModelKind::Rigid,
        2,
        planar_rotation(0.25, 1.0),
        Vector3::new(12.0, -7.0, 0.0),
    ))
}

/// `good` exact correspondences followed by `bad` random ones.
fn candidates(good: usize, bad: usize, seed: u64) -> Vec<PointMatch> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let model = truth();
    let mut out = Vec::new();
    for i in 0..good + bad {
        let x = rng.random_range(0.0..200.0);
        let y = rng.random_range(0.0..200.0);
        let q = if i < good {
            model.apply(&Point3::new(x, y, 0.0))
        } else {
            Point3::new(rng.random_range(0.0..200.0), rng.random_range(0.0..200.0), 0.0)
        };
        out.push(PointMatch::new(particle(i, x, y), particle(i, q.x, q.y)));
    }
    out
}

fn rigid() -> Model {
    Model::identity(ModelKind::Rigid, 2).unwrap()
}

#[test]
fn ransac_separates_inliers_from_outliers() {
    let cands = candidates(40, 20, 3);
    let (model, inliers) = ransac(&rigid(), &cands, &RansacConfig::default()).unwrap();
    assert_eq!(inliers.len(), 40);
    assert!(inliers.iter().all(|m| m.a.id() < 40));
    let p = Point3::new(50.0, 60.0, 0.0);
    assert!((model.apply(&p) - truth().apply(&p)).norm() < 1e-6);
}

#[test]
fn seeded_runs_are_reproducible() {
    let cands = candidates(30, 30, 9);
    let cfg = RansacConfig {
        iterations: 50,
        ..RansacConfig::default()
    };
    let a = compute_ransac(&rigid(), &cands, &cfg).unwrap();
    let b = compute_ransac(&rigid(), &cands, &cfg).unwrap();
    assert_eq!(a.inliers, b.inliers);
    assert_eq!(a.model, b.model);
}

#[test]
fn trust_filter_drops_residuals_far_above_the_median() {
    let mut cands = candidates(20, 0, 5);
    // Perturb every correspondence a little and one a lot (but within epsilon).
    for (i, m) in cands.iter_mut().enumerate() {
        let shift = if i == 7 { 4.0 } else { 0.1 * ((i % 3) as f64 + 1.0) };
        let w = m.b.local();
        m.b = particle(m.b.id(), w.x + shift, w.y);
    }
    let (_, kept) = filter(&truth(), &cands, 4.0).unwrap();
    assert!(kept.len() < 20);
    assert!(!kept.iter().any(|m| m.a.id() == 7));
}

#[test]
fn inlier_floor_is_strict() {
    // Rigid 2D needs 2 matches; the default factor makes the floor 4.
    let cands = candidates(4, 0, 1);
    let err = compute_ransac(&rigid(), &cands, &RansacConfig::default()).unwrap_err();
    assert!(matches!(err, MatchFailure::NoConvergence { .. }));
    let cands = candidates(5, 0, 1);
    let fit = compute_ransac(&rigid(), &cands, &RansacConfig::default()).unwrap();
    assert_eq!(fit.inliers.len(), 5);
    assert!(fit.cost < 1e-9);
}

#[test]
fn too_few_candidates_is_insufficient_data() {
    let cands = candidates(1, 0, 1);
    assert!(matches!(
        ransac(&rigid(), &cands, &RansacConfig::default()),
        Err(MatchFailure::InsufficientData { .. })
    ));
}
