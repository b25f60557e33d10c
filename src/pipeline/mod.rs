//! Series registration driver.
//!
//! Detection runs once per image. Pairs chosen by the [`Topology`] are matched
//! independently, their inliers feed a [`TileGraph`] and the global optimizer
//! turns them into one model per image. With a region of interest the peak
//! lists are re-filtered through the current models and the matching is
//! repeated until the total inlier count stops changing.

pub mod config;
pub mod session;
pub mod topology;
pub mod track;

pub use config::RegistrationConfig;
pub use session::RegistrationSession;
pub use topology::{compare_pairs, ComparisonPair, Topology};
pub use track::track_brightest_peak;

use crate::detect::{brightest_n, detect_peaks, DetectionStats, Peak};
use crate::image::{normalize_series, Roi, Volume};
use crate::model::Model;
use crate::pairwise::{pairwise_matching, CorrespondenceWriter, PairMatch};
use crate::point::{Particle, PointMatch};
use crate::tile::{optimize, ErrorStats, Optimization, TileGraph};
use crate::trace::{trace_debug, trace_event, trace_span, trace_warn};
use crate::util::{CancelToken, DescRegError, DescRegResult, MatchFailure};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Outcome of one pair comparison.
#[derive(Clone, Debug)]
pub struct PairResult {
    pub pair: ComparisonPair,
    pub outcome: Result<PairMatch, MatchFailure>,
}

impl PairResult {
    /// Accepted correspondences; empty when matching failed.
    pub fn inliers(&self) -> &[PointMatch] {
        match &self.outcome {
            Ok(m) => &m.inliers,
            Err(_) => &[],
        }
    }
}

/// Result of a series registration.
#[derive(Clone, Debug)]
pub struct RegistrationResult {
    /// One model per image in stretch-corrected coordinates, never regularized.
    pub models: Vec<Model>,
    pub pairs: Vec<PairResult>,
    pub stats: ErrorStats,
    pub fixed: Option<usize>,
    pub unconnected: Vec<usize>,
    pub optimizer_iterations: usize,
    /// ROI refinement passes after the first registration.
    pub roi_iterations: usize,
    /// Detector statistics per image; empty when peaks were supplied.
    pub detections: Vec<DetectionStats>,
    /// Peaks per image when `store_points` is set.
    pub peaks: Vec<Vec<Peak>>,
    pub z_stretch: f64,
}

impl RegistrationResult {
    /// Total number of accepted correspondences.
    pub fn num_inliers(&self) -> usize {
        count_inliers(&self.pairs)
    }

    /// Models acting on raw voxel coordinates.
    pub fn voxel_models(&self) -> Vec<Model> {
        self.models
            .iter()
            .map(|m| m.with_axial_scaling(self.z_stretch))
            .collect()
    }

    /// Union of the transformed image boxes, for sizing an output canvas.
    ///
    /// `size` is the image extent in pixels; z is stretch-corrected here.
    pub fn canvas_bounds(&self, size: [f64; 3]) -> ([f64; 3], [f64; 3]) {
        let max = [size[0], size[1], size[2] * self.z_stretch];
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for model in &self.models {
            let (a, b) = model.estimate_bounds([0.0; 3], max);
            for d in 0..3 {
                lo[d] = lo[d].min(a[d]);
                hi[d] = hi[d].max(b[d]);
            }
        }
        (lo, hi)
    }
}

/// Result of registering two images.
#[derive(Clone, Debug)]
pub struct PairRegistration {
    pub outcome: Result<PairMatch, MatchFailure>,
    /// Model for image A (mapping it onto B) and identity for image B.
    pub models: Option<[Model; 2]>,
    pub detections: [DetectionStats; 2],
}

fn count_inliers(pairs: &[PairResult]) -> usize {
    pairs.iter().map(|p| p.inliers().len()).sum()
}

/// Particles for `peaks` that fall inside `roi`, after `model` when given.
///
/// Particle ids are indices into `peaks`, so they stay stable between passes.
fn select_particles(
    peaks: &[Peak],
    z_stretch: f64,
    num_dimensions: usize,
    roi: Option<&Roi>,
    model: Option<&Model>,
) -> Vec<Particle> {
    Particle::from_peaks(peaks, z_stretch, num_dimensions)
        .into_iter()
        .filter(|p| {
            let Some(roi) = roi else {
                return true;
            };
            let q = match model {
                Some(m) => m.apply(&p.local()),
                None => p.local(),
            };
            roi.contains(q.x, q.y)
        })
        .collect()
}

/// Splits `0..n` round-robin over `workers` partitions.
#[cfg(feature = "rayon")]
pub(crate) fn round_robin(n: usize, workers: usize) -> Vec<Vec<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|w| (w..n).step_by(workers).collect())
        .collect()
}

fn match_one(
    particles: &[Vec<Particle>],
    pair: ComparisonPair,
    template: &Model,
    config: &RegistrationConfig,
    writer: Option<&CorrespondenceWriter>,
) -> PairResult {
    let outcome = pairwise_matching(
        &particles[pair.a],
        &particles[pair.b],
        template,
        &config.pairwise,
    );
    match &outcome {
        Ok(m) => {
            trace_debug!("pair {}-{}: {} inliers", pair.a, pair.b, m.inliers.len());
            if let Some(writer) = writer {
                writer.write_pair(pair.a, pair.b, &m.model, &m.inliers);
            }
        }
        Err(failure) => trace_debug!("pair {}-{} rejected: {}", pair.a, pair.b, failure),
    }
    PairResult { pair, outcome }
}

#[cfg(feature = "rayon")]
fn match_pairs_par(
    particles: &[Vec<Particle>],
    pairs: &[ComparisonPair],
    template: &Model,
    config: &RegistrationConfig,
    writer: Option<&CorrespondenceWriter>,
    cancel: &CancelToken,
) -> DescRegResult<Vec<PairResult>> {
    let run = || -> Vec<Vec<(usize, PairResult)>> {
        round_robin(pairs.len(), rayon::current_num_threads())
            .into_par_iter()
            .map(|indices| {
                let mut out = Vec::with_capacity(indices.len());
                for i in indices {
                    if cancel.is_cancelled() {
                        break;
                    }
                    out.push((i, match_one(particles, pairs[i], template, config, writer)));
                }
                out
            })
            .collect()
    };
    let chunks = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|_| DescRegError::InvalidInput("cannot build the worker pool"))?
            .install(run),
        None => run(),
    };
    cancel.check()?;

    let mut slots: Vec<Option<PairResult>> = (0..pairs.len()).map(|_| None).collect();
    for (i, result) in chunks.into_iter().flatten() {
        slots[i] = Some(result);
    }
    slots
        .into_iter()
        .map(|slot| slot.ok_or(DescRegError::Cancelled))
        .collect()
}

fn match_pairs(
    particles: &[Vec<Particle>],
    pairs: &[ComparisonPair],
    template: &Model,
    config: &RegistrationConfig,
    writer: Option<&CorrespondenceWriter>,
    cancel: &CancelToken,
) -> DescRegResult<Vec<PairResult>> {
    #[cfg(feature = "rayon")]
    {
        if config.parallel {
            return match_pairs_par(particles, pairs, template, config, writer, cancel);
        }
    }
    let mut results = Vec::with_capacity(pairs.len());
    for &pair in pairs {
        cancel.check()?;
        results.push(match_one(particles, pair, template, config, writer));
    }
    Ok(results)
}

/// One pass of pair matching followed by global optimization.
fn match_and_optimize(
    particles: &[Vec<Particle>],
    pairs: &[ComparisonPair],
    template: &Model,
    config: &RegistrationConfig,
    cancel: &CancelToken,
) -> DescRegResult<(Vec<PairResult>, Optimization)> {
    let writer = config
        .correspondence_dir
        .as_ref()
        .map(CorrespondenceWriter::new);
    let results = match_pairs(particles, pairs, template, config, writer.as_ref(), cancel)?;
    if let Some(writer) = writer {
        if let Err(err) = writer.finish() {
            trace_warn!("cannot flush correspondence dump: {}", err);
        }
    }
    trace_event!(
        "pairs_matched",
        pairs = results.len(),
        successful = results.iter().filter(|r| r.outcome.is_ok()).count(),
        inliers = count_inliers(&results)
    );

    let mut graph = TileGraph::new(particles.len(), template);
    for r in &results {
        graph.connect(r.pair.a, r.pair.b, r.inliers())?;
    }
    let optimization = optimize(&mut graph, &config.optimizer, cancel)?;
    Ok((results, optimization))
}

/// Registers a series from precomputed peak lists (one per image).
///
/// Peaks are in pixel coordinates; `z_stretch` is the axial to lateral pixel
/// size ratio of 3D data.
pub fn register_peaks(
    peaks: &[Vec<Peak>],
    z_stretch: f64,
    config: &RegistrationConfig,
    cancel: &CancelToken,
) -> DescRegResult<RegistrationResult> {
    let _span = trace_span!("register_series", images = peaks.len()).entered();
    config.validate()?;
    if !(z_stretch > 0.0) || !z_stretch.is_finite() {
        return Err(DescRegError::InvalidInput("z stretch must be positive"));
    }
    let template = config.model.create()?;
    let num_dimensions = config.model.num_dimensions;
    let pairs = compare_pairs(config.topology, peaks.len());
    let roi = config.roi.as_ref();

    let particles: Vec<Vec<Particle>> = peaks
        .iter()
        .map(|p| select_particles(p, z_stretch, num_dimensions, roi, None))
        .collect();
    let (mut results, mut optimization) =
        match_and_optimize(&particles, &pairs, &template, config, cancel)?;

    let mut roi_iterations = 0;
    if roi.is_some() {
        let mut matches = count_inliers(&results);
        while roi_iterations < config.max_roi_iterations {
            let particles: Vec<Vec<Particle>> = peaks
                .iter()
                .zip(&optimization.models)
                .map(|(p, m)| select_particles(p, z_stretch, num_dimensions, roi, Some(m)))
                .collect();
            let (next_results, next_optimization) =
                match_and_optimize(&particles, &pairs, &template, config, cancel)?;
            roi_iterations += 1;
            let next_matches = count_inliers(&next_results);
            trace_event!(
                "roi_iteration",
                iteration = roi_iterations,
                matches = next_matches
            );
            results = next_results;
            optimization = next_optimization;
            if next_matches == matches {
                break;
            }
            matches = next_matches;
        }
    }

    Ok(RegistrationResult {
        models: optimization.models,
        pairs: results,
        stats: optimization.stats,
        fixed: optimization.fixed,
        unconnected: optimization.unconnected,
        optimizer_iterations: optimization.iterations,
        roi_iterations,
        detections: Vec::new(),
        peaks: if config.store_points {
            peaks.to_vec()
        } else {
            Vec::new()
        },
        z_stretch,
    })
}

/// Detects peaks in every image, keeping the strongest when configured.
fn detect_series(
    images: &[Volume],
    config: &RegistrationConfig,
) -> DescRegResult<Vec<(Vec<Peak>, DetectionStats)>> {
    let normalized = normalize_series(images, config.normalization);
    let detect_one = |image: &Volume| -> DescRegResult<(Vec<Peak>, DetectionStats)> {
        let detection = detect_peaks(image, &config.detect)?;
        let peaks = match config.brightest_n {
            Some(n) => brightest_n(&detection.peaks, n),
            None => detection.peaks,
        };
        trace_event!("peaks_selected", peaks = peaks.len());
        Ok((peaks, detection.stats))
    };
    #[cfg(feature = "rayon")]
    {
        if config.parallel {
            return normalized.par_iter().map(&detect_one).collect();
        }
    }
    normalized.iter().map(&detect_one).collect()
}

/// Checks that all images share dimensionality and calibration; returns the
/// z stretch.
fn series_z_stretch(images: &[Volume], num_dimensions: usize) -> DescRegResult<f64> {
    let first = images
        .first()
        .ok_or(DescRegError::InvalidInput("the series has no images"))?;
    for image in images {
        if image.num_dimensions() != num_dimensions {
            return Err(DescRegError::IncompatibleModel {
                reason: format!(
                    "{}D model for {}D images",
                    num_dimensions,
                    image.num_dimensions()
                ),
            });
        }
        if image.calibration() != first.calibration() {
            return Err(DescRegError::InvalidInput("images differ in calibration"));
        }
    }
    Ok(first.z_stretch())
}

/// Registers a series of images.
///
/// On success the models are stored in `session` when `store_models` is set.
pub fn register_series(
    images: &[Volume],
    config: &RegistrationConfig,
    session: &mut RegistrationSession,
    cancel: &CancelToken,
) -> DescRegResult<RegistrationResult> {
    config.validate()?;
    let z_stretch = series_z_stretch(images, config.model.num_dimensions)?;
    let detected = detect_series(images, config)?;
    cancel.check()?;
    let (peaks, detections): (Vec<Vec<Peak>>, Vec<DetectionStats>) = detected.into_iter().unzip();

    let mut result = register_peaks(&peaks, z_stretch, config, cancel)?;
    result.detections = detections;
    if config.store_models {
        session.store(&result.models, config.model.num_dimensions);
    }
    Ok(result)
}

/// Result for a series built from the models of an earlier run.
///
/// No detection or matching happens; the session checks that it holds a
/// model for every image and that the data is not of lower dimensionality.
pub fn reapply_series(
    images: &[Volume],
    session: &RegistrationSession,
) -> DescRegResult<RegistrationResult> {
    let _span = trace_span!("reapply_series", images = images.len()).entered();
    let first = images
        .first()
        .ok_or(DescRegError::InvalidInput("the series has no images"))?;
    let num_dimensions = first.num_dimensions();
    let z_stretch = series_z_stretch(images, num_dimensions)?;
    let models = session.reapply(images.len(), num_dimensions)?;
    trace_event!("models_reapplied", models = models.len());
    Ok(RegistrationResult {
        models,
        pairs: Vec::new(),
        stats: ErrorStats::default(),
        fixed: None,
        unconnected: Vec::new(),
        optimizer_iterations: 0,
        roi_iterations: 0,
        detections: Vec::new(),
        peaks: Vec::new(),
        z_stretch,
    })
}

/// Registers image A onto image B, each with its own optional ROI.
pub fn register_pair(
    image_a: &Volume,
    image_b: &Volume,
    rois: [Option<Roi>; 2],
    config: &RegistrationConfig,
) -> DescRegResult<PairRegistration> {
    let _span = trace_span!("register_pair").entered();
    config.validate()?;
    let images = [image_a.clone(), image_b.clone()];
    let z_stretch = series_z_stretch(&images, config.model.num_dimensions)?;
    let detected = detect_series(&images, config)?;
    let template = config.model.create()?;
    let num_dimensions = config.model.num_dimensions;

    let particles: Vec<Vec<Particle>> = detected
        .iter()
        .zip(&rois)
        .map(|((peaks, _), roi)| {
            select_particles(peaks, z_stretch, num_dimensions, roi.as_ref(), None)
        })
        .collect();
    let pair = ComparisonPair { a: 0, b: 1 };
    let writer = config
        .correspondence_dir
        .as_ref()
        .map(CorrespondenceWriter::new);
    let result = match_one(&particles, pair, &template, config, writer.as_ref());
    if let Some(writer) = writer {
        if let Err(err) = writer.finish() {
            trace_warn!("cannot flush correspondence dump: {}", err);
        }
    }

    let models = result
        .outcome
        .as_ref()
        .ok()
        .map(|m| [m.model.decomposed(), template.decomposed()]);
    Ok(PairRegistration {
        outcome: result.outcome,
        models,
        detections: [detected[0].1, detected[1].1],
    })
}
