//! Matching of one image pair.
//!
//! The first pass builds rotation-invariant descriptors (or, for images assumed
//! to share orientation, simple descriptors under the initial model), matches
//! them and runs robust estimation. While a model is known the pass is
//! repeated with simple descriptors on the A particles mapped through the
//! current model, keeping a new result only when it has strictly more inliers.

pub mod dump;

pub use dump::CorrespondenceWriter;

use crate::descriptor::{
    find_corresponding_descriptors, model_descriptors, simple_descriptors, DescriptorConfig,
    SubsetMatcher,
};
use crate::model::Model;
use crate::point::{Particle, PointMatch};
use crate::ransac::{compute_ransac, RansacConfig, RansacFit};
use crate::trace::{trace_debug, trace_event, trace_span};
use crate::util::MatchFailure;

/// Parameters of the pairwise matcher.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PairwiseConfig {
    pub descriptor: DescriptorConfig,
    pub ransac: RansacConfig,
    /// Optional cap on refinement passes after the first one.
    pub max_refinement_rounds: Option<usize>,
}

/// Result of a successful pair comparison.
#[derive(Clone, Debug)]
pub struct PairMatch {
    /// Maps A coordinates onto B coordinates.
    pub model: Model,
    pub inliers: Vec<PointMatch>,
    /// Mean inlier residual.
    pub cost: f64,
    /// Inlier count of each accepted pass; non-decreasing.
    pub inlier_history: Vec<usize>,
}

/// Candidate correspondences between two particle sets.
///
/// With `model` set, A particles are mapped through it before simple
/// descriptors are built; otherwise rotation-invariant descriptors are used.
/// Returned matches have their coordinates restored.
pub fn correspondence_candidates(
    a: &[Particle],
    b: &[Particle],
    model: Option<&Model>,
    config: &DescriptorConfig,
) -> Result<Vec<PointMatch>, MatchFailure> {
    let mut a: Vec<Particle> = a.to_vec();
    let mut b: Vec<Particle> = b.to_vec();
    a.iter_mut().for_each(Particle::restore_coordinates);
    b.iter_mut().for_each(Particle::restore_coordinates);

    let mut matches = match model {
        Some(model) => {
            a.iter_mut().for_each(|p| p.apply(model));
            let da = simple_descriptors(&a, config.num_neighbors)?;
            let db = simple_descriptors(&b, config.num_neighbors)?;
            find_corresponding_descriptors(&da, &db, config.min_similarity, config.significance)
        }
        None => {
            let matcher = SubsetMatcher::new(config.num_neighbors, config.redundancy);
            let da = model_descriptors(&a, &matcher)?;
            let db = model_descriptors(&b, &matcher)?;
            find_corresponding_descriptors(&da, &db, config.min_similarity, config.significance)
        }
    };
    matches.iter_mut().for_each(PointMatch::restore_coordinates);
    Ok(matches)
}

/// Matches two particle sets and estimates the transform from A to B.
///
/// `template` is an unfitted instance of the model to estimate.
pub fn pairwise_matching(
    a: &[Particle],
    b: &[Particle],
    template: &Model,
    config: &PairwiseConfig,
) -> Result<PairMatch, MatchFailure> {
    let _span = trace_span!("pairwise_matching", peaks_a = a.len(), peaks_b = b.len()).entered();

    let initial = config.descriptor.similar_orientation.then_some(template);
    let candidates = correspondence_candidates(a, b, initial, &config.descriptor)?;
    let mut best: RansacFit = compute_ransac(template, &candidates, &config.ransac)?;
    let mut history = vec![best.inliers.len()];
    trace_debug!("initial pass: {}", best.statement());

    let mut rounds = 0usize;
    loop {
        if config.max_refinement_rounds.is_some_and(|max| rounds >= max) {
            break;
        }
        rounds += 1;
        let Ok(candidates) =
            correspondence_candidates(a, b, Some(&best.model), &config.descriptor)
        else {
            break;
        };
        match compute_ransac(template, &candidates, &config.ransac) {
            Ok(fit) if fit.inliers.len() > best.inliers.len() => {
                trace_debug!("refinement pass {}: {}", rounds, fit.statement());
                history.push(fit.inliers.len());
                best = fit;
            }
            _ => break,
        }
    }

    trace_event!(
        "pair_matched",
        inliers = best.inliers.len(),
        candidates = best.num_candidates,
        rounds = rounds
    );
    Ok(PairMatch {
        model: best.model,
        inliers: best.inliers,
        cost: best.cost,
        inlier_history: history,
    })
}

#[cfg(test)]
mod tests {
    use super::{pairwise_matching, PairwiseConfig};
    use crate::descriptor::DescriptorConfig;
    use crate::detect::{ExtremumKind, Peak};
    use crate::model::{Model, ModelKind};
    use crate::point::Particle;
    use crate::ransac::RansacConfig;
    use crate::util::MatchFailure;
    use nalgebra::Vector3;
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

    fn cloud(n: usize, seed: u64) -> Vec<(f64, f64)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| (rng.random_range(0.0..300.0), rng.random_range(0.0..300.0)))
            .collect()
    }

    #[test]
    fn translated_copy_is_matched_completely() {
        let pts = cloud(40, 11);
        let a: Vec<Particle> = pts
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| particle(i, x, y))
            .collect();
        let b: Vec<Particle> = pts
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| particle(i, x + 20.0, y - 10.0))
            .collect();
        let template = Model::identity(ModelKind::Translation, 2).unwrap();
        let cfg = PairwiseConfig::default();
        let result = pairwise_matching(&a, &b, &template, &cfg).unwrap();
        assert_eq!(result.inliers.len(), 40);
        assert!(result.inliers.iter().all(|m| m.a.id() == m.b.id()));
        let expected = Model::translation(2, Vector3::new(20.0, -10.0, 0.0));
        let p = a[0].local();
        assert!((result.model.apply(&p) - expected.apply(&p)).norm() < 1e-9);
        assert!(result.inlier_history.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn unrelated_clouds_fail_without_panicking() {
        let a: Vec<Particle> = cloud(30, 1)
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| particle(i, x, y))
            .collect();
        let b: Vec<Particle> = cloud(30, 2)
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| particle(i, x, y))
            .collect();
        let template = Model::identity(ModelKind::Rigid, 2).unwrap();
        let cfg = PairwiseConfig {
            descriptor: DescriptorConfig {
                min_similarity: 1.0,
                ..DescriptorConfig::default()
            },
            ransac: RansacConfig {
                max_epsilon: 1.0,
                ..RansacConfig::default()
            },
            max_refinement_rounds: Some(3),
        };
        assert!(pairwise_matching(&a, &b, &template, &cfg).is_err());
    }

    #[test]
    fn too_few_peaks_is_insufficient_data() {
        let a = vec![particle(0, 0.0, 0.0), particle(1, 5.0, 0.0)];
        let template = Model::identity(ModelKind::Rigid, 2).unwrap();
        let err = pairwise_matching(&a, &a, &template, &PairwiseConfig::default()).unwrap_err();
        assert!(matches!(err, MatchFailure::InsufficientData { .. }));
    }
}
