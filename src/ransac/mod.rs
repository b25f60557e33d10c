//! RANSAC (Random Sample Consensus) with an optional trust filter.
//!
//! The estimator repeatedly fits the model to a minimal random sample, counts
//! correspondences within `max_epsilon`, and keeps the sample with the most
//! inliers. The winning set is refit and re-thresholded until it stops
//! growing. With `filter` enabled the inliers are then pruned iteratively,
//! dropping every correspondence whose residual exceeds `max_trust` times the
//! median residual. Finally the inlier count must exceed
//! `min_num_matches * min_inlier_factor`.
//!
//! Failures are ordinary outcomes for a pair of images and are returned as
//! [`MatchFailure`], never as crate errors.

use crate::model::Model;
use crate::point::PointMatch;
use crate::trace::{trace_debug, trace_span};
use crate::util::math::median;
use crate::util::MatchFailure;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Seed used when none is configured, so repeated runs agree.
pub const DEFAULT_SEED: u64 = 69997;

/// Residuals below this are rounding noise and always survive the trust filter.
const RESIDUAL_NOISE_FLOOR: f64 = 1e-9;

/// RANSAC configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RansacConfig {
    /// Number of random minimal samples.
    pub iterations: usize,
    /// Inlier distance threshold in (stretch-corrected) pixels.
    pub max_epsilon: f64,
    /// Minimum inlier fraction of all candidates.
    pub min_inlier_ratio: f64,
    /// Trust filter multiplier on the median residual.
    pub max_trust: f64,
    /// Inliers must exceed `min_num_matches * min_inlier_factor`.
    pub min_inlier_factor: f64,
    /// Enables the trust filter.
    pub filter: bool,
    /// Random seed; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            max_epsilon: 5.0,
            min_inlier_ratio: 0.05,
            max_trust: 4.0,
            min_inlier_factor: 2.0,
            filter: true,
            seed: Some(DEFAULT_SEED),
        }
    }
}

/// A successful robust fit.
#[derive(Debug, Clone)]
pub struct RansacFit {
    pub model: Model,
    pub inliers: Vec<PointMatch>,
    /// Mean residual over the inliers.
    pub cost: f64,
    pub num_candidates: usize,
}

impl RansacFit {
    /// One-line summary for logs.
    pub fn statement(&self) -> String {
        format!(
            "{} of {} candidates remain after RANSAC, mean error {:.4} px",
            self.inliers.len(),
            self.num_candidates,
            self.cost
        )
    }
}

/// Sample `k` distinct indices from `0..n` into `buffer` (Floyd's algorithm).
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();
    for j in (n - k)..n {
        let t = rng.random_range(0..=j);
        if buffer.contains(&t) {
            buffer.push(j);
        } else {
            buffer.push(t);
        }
    }
}

fn residual(model: &Model, m: &PointMatch) -> f64 {
    nalgebra::distance(&model.apply(&m.a.local()), &m.b.world())
}

fn collect_inliers(model: &Model, candidates: &[PointMatch], epsilon: f64) -> Vec<PointMatch> {
    candidates
        .iter()
        .filter(|m| residual(model, m) < epsilon)
        .copied()
        .collect()
}

/// Plain RANSAC: best minimal sample, then refit until the inlier set is stable.
pub fn ransac(
    template: &Model,
    candidates: &[PointMatch],
    config: &RansacConfig,
) -> Result<(Model, Vec<PointMatch>), MatchFailure> {
    let needed = template.min_num_matches();
    if candidates.len() < needed {
        return Err(MatchFailure::InsufficientData {
            reason: format!(
                "{} candidates, the model needs at least {}",
                candidates.len(),
                needed
            ),
        });
    }

    let mut rng: ChaCha8Rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };
    let mut sample_idx = Vec::with_capacity(needed);
    let mut sample = Vec::with_capacity(needed);
    let mut best: Option<(Model, Vec<PointMatch>, f64)> = None;

    for _ in 0..config.iterations {
        random_sample_into(&mut rng, candidates.len(), needed, &mut sample_idx);
        sample.clear();
        sample.extend(sample_idx.iter().map(|&i| candidates[i]));
        let mut model = template.clone();
        if model.fit(&sample).is_err() {
            continue;
        }
        let inliers = collect_inliers(&model, candidates, config.max_epsilon);
        if inliers.len() < needed {
            continue;
        }
        let cost = model.cost(&inliers);
        let better = match &best {
            None => true,
            Some((_, b, c)) => inliers.len() > b.len() || (inliers.len() == b.len() && cost < *c),
        };
        if better {
            best = Some((model, inliers, cost));
        }
    }

    let Some((mut model, mut inliers, _)) = best else {
        return Err(MatchFailure::NoConvergence {
            reason: "no sample produced a consistent model".to_string(),
        });
    };

    // Refit on the consensus set until it stops growing.
    loop {
        let mut refit = model.clone();
        if refit.fit(&inliers).is_err() {
            break;
        }
        let grown = collect_inliers(&refit, candidates, config.max_epsilon);
        if grown.len() <= inliers.len() {
            break;
        }
        model = refit;
        inliers = grown;
    }

    let ratio = inliers.len() as f64 / candidates.len() as f64;
    if ratio < config.min_inlier_ratio {
        return Err(MatchFailure::NoConvergence {
            reason: format!(
                "inlier ratio {:.3} below {:.3}",
                ratio, config.min_inlier_ratio
            ),
        });
    }
    Ok((model, inliers))
}

/// Iteratively drops correspondences above `max_trust * median` residual.
pub fn filter(
    template: &Model,
    candidates: &[PointMatch],
    max_trust: f64,
) -> Result<(Model, Vec<PointMatch>), MatchFailure> {
    let needed = template.min_num_matches();
    let mut model = template.clone();
    let mut kept: Vec<PointMatch> = candidates.to_vec();
    loop {
        if kept.len() < needed {
            return Err(MatchFailure::NoConvergence {
                reason: format!("trust filter left {} correspondences", kept.len()),
            });
        }
        model
            .fit(&kept)
            .map_err(|err| MatchFailure::NoConvergence {
                reason: err.to_string(),
            })?;
        let residuals: Vec<f64> = kept.iter().map(|m| residual(&model, m)).collect();
        let Some(med) = median(&residuals) else {
            break;
        };
        let limit = (max_trust * med).max(RESIDUAL_NOISE_FLOOR);
        let before = kept.len();
        let next: Vec<PointMatch> = kept
            .iter()
            .zip(&residuals)
            .filter(|(_, r)| **r <= limit)
            .map(|(m, _)| *m)
            .collect();
        kept = next;
        if kept.len() == before {
            break;
        }
    }
    Ok((model, kept))
}

/// Full robust estimation as used by the pairwise matcher.
///
/// Runs RANSAC, the trust filter when enabled, the inlier-count floor and a
/// final least-squares fit on the surviving inliers.
pub fn compute_ransac(
    template: &Model,
    candidates: &[PointMatch],
    config: &RansacConfig,
) -> Result<RansacFit, MatchFailure> {
    let _span = trace_span!("ransac", candidates = candidates.len()).entered();
    let (model, inliers) = ransac(template, candidates, config)?;
    let (mut model, inliers) = if config.filter {
        filter(&model, &inliers, config.max_trust)?
    } else {
        (model, inliers)
    };

    let floor = template.min_num_matches() as f64 * config.min_inlier_factor;
    if (inliers.len() as f64) <= floor {
        return Err(MatchFailure::NoConvergence {
            reason: format!(
                "{} inliers do not exceed the floor of {:.1}",
                inliers.len(),
                floor
            ),
        });
    }
    model.fit(&inliers).map_err(|err| MatchFailure::NoConvergence {
        reason: err.to_string(),
    })?;
    let cost = model.cost(&inliers);
    let fit = RansacFit {
        model,
        inliers,
        cost,
        num_candidates: candidates.len(),
    };
    trace_debug!("{}", fit.statement());
    Ok(fit)
}

#[cfg(test)]
mod tests;
