use descreg::descriptor::DescriptorConfig;
use descreg::{
    pairwise_matching, Model, ModelKind, PairwiseConfig, Particle, Peak, RansacConfig,
};
use nalgebra::Point3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const NUM_POINTS: usize = 50;
const NUM_OUTLIERS: usize = 5;
const ANGLE_DEG: f64 = 10.0;
const SHIFT: (f64, f64) = (5.0, 3.0);
/// Minimum distance between generated points. Outliers move at most 10px, so a
/// moved outlier stays more than the RANSAC threshold away from every other
/// point's true position.
const MIN_SPACING: f64 = 15.0;
/// Neighbours gathered per descriptor: `num_neighbors + redundancy`.
const NEIGHBOURHOOD: usize = 4;

fn spaced_points(n: usize, rng: &mut ChaCha8Rng) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = Vec::with_capacity(n);
    while points.len() < n {
        let p = (rng.random_range(0.0..400.0), rng.random_range(0.0..400.0));
        if points
            .iter()
            .all(|q| (p.0 - q.0).hypot(p.1 - q.1) >= MIN_SPACING)
        {
            points.push(p);
        }
    }
    points
}

fn rigid(p: (f64, f64)) -> (f64, f64) {
    let (s, c) = ANGLE_DEG.to_radians().sin_cos();
    (c * p.0 - s * p.1 + SHIFT.0, s * p.0 + c * p.1 + SHIFT.1)
}

/// Random distinct outlier indices, each moved 3 to 10px in a random direction.
fn random_outliers(rng: &mut ChaCha8Rng) -> Vec<(usize, (f64, f64))> {
    let mut outliers: Vec<(usize, (f64, f64))> = Vec::with_capacity(NUM_OUTLIERS);
    while outliers.len() < NUM_OUTLIERS {
        let i = rng.random_range(0..NUM_POINTS);
        if outliers.iter().any(|&(j, _)| j == i) {
            continue;
        }
        let dir = rng.random_range(0.0..std::f64::consts::TAU);
        let len = rng.random_range(3.0..10.0);
        outliers.push((i, (len * dir.cos(), len * dir.sin())));
    }
    outliers
}

fn transformed(points: &[(f64, f64)], outliers: &[(usize, (f64, f64))]) -> Vec<(f64, f64)> {
    points
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let q = rigid(p);
            match outliers.iter().find(|&&(j, _)| j == i) {
                Some(&(_, (dx, dy))) => (q.0 + dx, q.1 + dy),
                None => q,
            }
        })
        .collect()
}

fn nearest(points: &[(f64, f64)], i: usize, k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..points.len()).filter(|&j| j != i).collect();
    let d = |j: usize| (points[j].0 - points[i].0).hypot(points[j].1 - points[i].1);
    order.sort_by(|&a, &b| d(a).total_cmp(&d(b)));
    order.truncate(k);
    order
}

/// Counts the unperturbed points whose neighbourhoods in both sets hold at
/// most one outlier. Such a point keeps three shared neighbours, so one of its
/// subset descriptors matches exactly and it must end up as an inlier.
fn recoverable_points(a: &[(f64, f64)], b: &[(f64, f64)], outliers: &[usize]) -> usize {
    (0..a.len())
        .filter(|i| !outliers.contains(i))
        .filter(|&i| {
            let mut near = nearest(a, i, NEIGHBOURHOOD);
            near.extend(nearest(b, i, NEIGHBOURHOOD));
            near.sort_unstable();
            near.dedup();
            near.iter().filter(|j| outliers.contains(j)).count() <= 1
        })
        .count()
}

fn particles(points: &[(f64, f64)]) -> Vec<Particle> {
    let peaks: Vec<Peak> = points
        .iter()
        .map(|&(x, y)| Peak::from_location([x, y, 0.0], 1.0))
        .collect();
    Particle::from_peaks(&peaks, 1.0, 2)
}

#[test]
fn rotated_and_shifted_set_is_recovered_with_random_outliers() {
    let cfg = PairwiseConfig {
        descriptor: DescriptorConfig {
            num_neighbors: 3,
            redundancy: 1,
            significance: 3.0,
            ..DescriptorConfig::default()
        },
        ransac: RansacConfig {
            max_epsilon: 2.0,
            ..RansacConfig::default()
        },
        max_refinement_rounds: None,
    };
    let template = Model::identity(ModelKind::Rigid, 2).unwrap();

    for seed in 0..24u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a_points = spaced_points(NUM_POINTS, &mut rng);
        let outliers = random_outliers(&mut rng);
        let b_points = transformed(&a_points, &outliers);
        let outlier_ids: Vec<usize> = outliers.iter().map(|&(i, _)| i).collect();
        let recoverable = recoverable_points(&a_points, &b_points, &outlier_ids);

        let result = pairwise_matching(&particles(&a_points), &particles(&b_points), &template, &cfg)
            .unwrap_or_else(|e| panic!("seed {seed}: {e}"));

        // Rotation and translation are exact regardless of which points were lost.
        let origin = result.model.apply(&Point3::new(0.0, 0.0, 0.0));
        let unit = result.model.apply(&Point3::new(1.0, 0.0, 0.0));
        let angle = (unit.y - origin.y).atan2(unit.x - origin.x).to_degrees();
        assert!((angle - ANGLE_DEG).abs() < 0.5, "seed {seed}: angle {angle}");
        assert!((origin.x - SHIFT.0).abs() < 0.5, "seed {seed}");
        assert!((origin.y - SHIFT.1).abs() < 0.5, "seed {seed}");

        assert!(result
            .inliers
            .iter()
            .all(|m| m.a.id() == m.b.id() && !outlier_ids.contains(&m.a.id())));
        assert!(
            result.inliers.len() >= recoverable,
            "seed {seed}: {} inliers, {recoverable} recoverable",
            result.inliers.len()
        );
        // With every neighbourhood holding at most one outlier all 45 clean
        // points are found.
        if recoverable == NUM_POINTS - NUM_OUTLIERS {
            assert_eq!(result.inliers.len(), NUM_POINTS - NUM_OUTLIERS, "seed {seed}");
        }
        assert!(result.inlier_history.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn restore_is_idempotent_after_model_applications() {
    let points = spaced_points(10, &mut ChaCha8Rng::seed_from_u64(7));
    let mut ps = particles(&points);
    let original: Vec<Point3<f64>> = ps.iter().map(Particle::local).collect();
    let shift = Model::translation(2, nalgebra::Vector3::new(3.0, -1.0, 0.0));
    for p in ps.iter_mut() {
        p.apply(&shift);
        p.restore_coordinates();
        p.apply(&shift);
        p.apply(&shift);
        p.restore_coordinates();
        p.restore_coordinates();
    }
    for (p, o) in ps.iter().zip(&original) {
        assert_eq!(p.local(), *o);
        assert_eq!(p.world(), *o);
    }
}
