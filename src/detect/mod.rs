//! Difference-of-Gaussian blob detection with subpixel localization.
//!
//! The detector smooths the image at two scales, subtracts them with a
//! `1/(k-1)` weight so the response approximates a scale-normalized Laplacian,
//! collects strict local extrema and optionally refines them. Peaks below the
//! response threshold, peaks whose localization failed and peaks whose
//! Gaussian-mask fit diverged are dropped and counted in [`DetectionStats`].

mod extrema;
pub(crate) mod gauss;
mod mask_fit;
pub mod peak;
mod quadratic;
pub mod select;

pub use peak::{ExtremumKind, Peak};
pub use select::{brightest, brightest_n};

use crate::image::Volume;
use crate::trace::{trace_event, trace_span};
use crate::util::{DescRegError, DescRegResult};
use gauss::{difference_of_gaussian, DogSigmas};
use mask_fit::{gaussian_mask_fit, MaskFit, MaskFitParams};
use quadratic::{localize_peak, QuadraticParams};

/// Subpixel localization strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Localization {
    /// Integer pixel positions.
    None,
    /// Quadratic fit of the DoG response.
    #[default]
    Quadratic,
    /// Iterative Gaussian-mask centroid on the input image.
    GaussianMask,
}

/// Detection parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectConfig {
    /// Blob sigma of the inner Gaussian, in pixels.
    pub sigma: f64,
    /// Outer sigma; `None` uses `sigma * 2^(1/4)`.
    pub sigma2: Option<f64>,
    /// Minimum absolute DoG response.
    pub threshold: f64,
    pub find_max: bool,
    pub find_min: bool,
    pub localization: Localization,
    /// Blur already present in the input.
    pub image_sigma: f64,
    /// Quadratic localization: maximum number of one-pixel moves.
    pub max_moves: usize,
    /// Quadratic localization: accept offsets slightly beyond half a pixel.
    pub allow_maxima_tolerance: bool,
    /// Gaussian-mask fit: mask sigma per axis.
    pub fit_sigma: [f64; 3],
    /// Gaussian-mask fit: window size per axis.
    pub support_region: [usize; 3],
    /// Gaussian-mask fit: number of centroid iterations.
    pub fit_iterations: usize,
    /// Gaussian-mask fit: maximum distance between fit and pixel position.
    pub max_fit_shift: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            sigma2: None,
            threshold: 0.03,
            find_max: true,
            find_min: false,
            localization: Localization::Quadratic,
            image_sigma: 0.5,
            max_moves: 10,
            allow_maxima_tolerance: true,
            fit_sigma: [2.0; 3],
            support_region: [11; 3],
            fit_iterations: 10,
            max_fit_shift: 1.5,
        }
    }
}

impl DetectConfig {
    /// Outer sigma, derived from `sigma` when not set explicitly.
    pub fn outer_sigma(&self) -> f64 {
        self.sigma2
            .unwrap_or_else(|| self.sigma * 2f64.powf(0.25))
    }

    fn validate(&self) -> DescRegResult<()> {
        if !(self.sigma > 0.0) || !self.sigma.is_finite() {
            return Err(DescRegError::InvalidInput("sigma must be positive"));
        }
        if !(self.outer_sigma() > self.sigma) {
            return Err(DescRegError::InvalidInput(
                "outer sigma must exceed the inner sigma",
            ));
        }
        if !(self.threshold >= 0.0) || !(self.image_sigma >= 0.0) {
            return Err(DescRegError::InvalidInput(
                "threshold and image sigma must be non-negative",
            ));
        }
        if self.localization == Localization::GaussianMask
            && (self.fit_sigma.iter().any(|s| !(*s > 0.0))
                || self.support_region.iter().any(|r| *r == 0))
        {
            return Err(DescRegError::InvalidInput(
                "gaussian fit needs positive sigma and support region",
            ));
        }
        Ok(())
    }

    /// Threshold used while collecting extrema, before refinement.
    fn initial_threshold(&self) -> f64 {
        match self.localization {
            Localization::Quadratic => self.threshold / 4.0,
            Localization::None | Localization::GaussianMask => self.threshold,
        }
    }
}

/// Counters describing what the detector kept and dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetectionStats {
    /// Extrema found before refinement, by polarity.
    pub maxima: usize,
    pub minima: usize,
    /// Quadratic localization failed.
    pub invalid: usize,
    /// Response dropped below the threshold after refinement.
    pub below_threshold: usize,
    /// Gaussian-mask window left the image.
    pub removed_border: usize,
    /// Gaussian-mask fit moved too far.
    pub removed_distance: usize,
}

/// Detected peaks in scan order plus statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub peaks: Vec<Peak>,
    pub stats: DetectionStats,
}

/// Detects DoG extrema in `volume`.
pub fn detect_peaks(volume: &Volume, config: &DetectConfig) -> DescRegResult<Detection> {
    let _span = trace_span!("detect_peaks").entered();
    config.validate()?;

    let mut stats = DetectionStats::default();
    if !config.find_max && !config.find_min {
        return Ok(Detection {
            peaks: Vec::new(),
            stats,
        });
    }

    let sigmas = DogSigmas::new(
        config.sigma,
        config.outer_sigma(),
        config.image_sigma,
        volume.z_stretch(),
    );
    let dog = difference_of_gaussian(volume, &sigmas);
    let mut peaks = extrema::find_extrema(
        &dog,
        config.find_max,
        config.find_min,
        config.initial_threshold(),
    );
    stats.maxima = peaks.iter().filter(|p| p.is_max()).count();
    stats.minima = peaks.len() - stats.maxima;

    match config.localization {
        Localization::None => {}
        Localization::Quadratic => {
            let params = QuadraticParams {
                max_moves: config.max_moves,
                allow_maxima_tolerance: config.allow_maxima_tolerance,
            };
            for peak in peaks.iter_mut() {
                localize_peak(&dog, peak, params);
            }
            peaks.retain(|p| {
                if !p.valid {
                    stats.invalid += 1;
                    false
                } else if p.value.abs() < config.threshold {
                    stats.below_threshold += 1;
                    false
                } else {
                    true
                }
            });
        }
        Localization::GaussianMask => {
            let params = MaskFitParams {
                sigma: config.fit_sigma,
                support_region: config.support_region,
                iterations: config.fit_iterations,
            };
            let n = volume.num_dimensions();
            peaks.retain_mut(|p| {
                match gaussian_mask_fit(volume, p.position, !p.is_max(), &params) {
                    MaskFit::OutOfBounds => {
                        stats.removed_border += 1;
                        false
                    }
                    MaskFit::Located(loc) => {
                        let mut dist_sq = 0.0;
                        for d in 0..n {
                            let diff = loc[d] - p.position[d] as f64;
                            dist_sq += diff * diff;
                        }
                        if dist_sq.sqrt() > config.max_fit_shift {
                            stats.removed_distance += 1;
                            return false;
                        }
                        for d in 0..n {
                            p.offset[d] = loc[d] - p.position[d] as f64;
                        }
                        true
                    }
                }
            });
        }
    }

    // Quadratic localization may move peaks; restore a canonical order.
    peaks.sort_by(peak::peak_cmp_scan);
    peaks.dedup_by(|a, b| a.position == b.position && a.kind == b.kind);

    trace_event!(
        "peaks_found",
        maxima = stats.maxima,
        minima = stats.minima,
        kept = peaks.len(),
        invalid = stats.invalid,
        below_threshold = stats.below_threshold,
        removed_border = stats.removed_border,
        removed_distance = stats.removed_distance
    );
    Ok(Detection { peaks, stats })
}

#[cfg(test)]
mod tests {
    use super::{detect_peaks, DetectConfig, Localization};
    use crate::image::Volume;
    use crate::util::DescRegError;

    fn blobs(centres: &[(f64, f64)], w: usize, h: usize) -> Volume {
        let mut data = vec![0.0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let mut v = 0.0;
                for &(cx, cy) in centres {
                    let dx = x as f64 - cx;
                    let dy = y as f64 - cy;
                    v += (-(dx * dx + dy * dy) / 8.0).exp();
                }
                data[y * w + x] = v as f32;
            }
        }
        Volume::new_2d(data, w, h).unwrap()
    }

    #[test]
    fn finds_isolated_blobs_with_subpixel_accuracy() {
        let vol = blobs(&[(20.3, 15.6), (45.0, 40.2)], 64, 56);
        let det = detect_peaks(&vol, &DetectConfig::default()).unwrap();
        assert_eq!(det.peaks.len(), 2);
        let a = det.peaks[0].location();
        let b = det.peaks[1].location();
        assert!((a[0] - 20.3).abs() < 0.3 && (a[1] - 15.6).abs() < 0.3);
        assert!((b[0] - 45.0).abs() < 0.3 && (b[1] - 40.2).abs() < 0.3);
    }

    #[test]
    fn gaussian_mask_drops_border_peaks() {
        let vol = blobs(&[(3.0, 30.0), (30.0, 30.0)], 60, 60);
        let cfg = DetectConfig {
            localization: Localization::GaussianMask,
            ..DetectConfig::default()
        };
        let det = detect_peaks(&vol, &cfg).unwrap();
        assert_eq!(det.peaks.len(), 1);
        assert_eq!(det.stats.removed_border, 1);
        let loc = det.peaks[0].location();
        assert!((loc[0] - 30.0).abs() < 0.1);
    }

    #[test]
    fn no_polarity_means_no_peaks() {
        let vol = blobs(&[(20.0, 20.0)], 40, 40);
        let cfg = DetectConfig {
            find_max: false,
            find_min: false,
            ..DetectConfig::default()
        };
        assert!(detect_peaks(&vol, &cfg).unwrap().peaks.is_empty());
    }

    #[test]
    fn rejects_inverted_sigmas() {
        let vol = blobs(&[(20.0, 20.0)], 40, 40);
        let cfg = DetectConfig {
            sigma2: Some(1.0),
            ..DetectConfig::default()
        };
        assert!(matches!(
            detect_peaks(&vol, &cfg),
            Err(DescRegError::InvalidInput(_))
        ));
    }
}
