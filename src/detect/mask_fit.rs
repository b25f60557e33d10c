//! Gaussian-mask centroid fit for subpixel localization on the raw image.

use crate::image::Volume;

#[derive(Clone, Copy, Debug)]
pub(crate) struct MaskFitParams {
    pub sigma: [f64; 3],
    pub support_region: [usize; 3],
    pub iterations: usize,
}

/// Outcome of fitting one peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum MaskFit {
    /// Fitted location in pixel coordinates.
    Located([f64; 3]),
    /// The support window does not fit inside the image.
    OutOfBounds,
}

/// Inclusive window `p ± region/2` per axis, or `None` if it leaves the image.
fn window(vol: &Volume, p: [i64; 3], region: [usize; 3]) -> Option<([i64; 3], [i64; 3])> {
    let dims = vol.dims();
    let mut lo = [0i64; 3];
    let mut hi = [0i64; 3];
    for d in 0..vol.num_dimensions() {
        let half = (region[d] / 2) as i64;
        lo[d] = p[d] - half;
        hi[d] = p[d] + half;
        if lo[d] < 0 || hi[d] >= dims[d] as i64 {
            return None;
        }
    }
    Some((lo, hi))
}

/// Iterative weighted centroid with a Gaussian mask centred on the estimate.
///
/// The window minimum is subtracted as background; minima are fitted on the
/// inverted window.
pub(crate) fn gaussian_mask_fit(
    vol: &Volume,
    position: [i64; 3],
    invert: bool,
    params: &MaskFitParams,
) -> MaskFit {
    let Some((lo, hi)) = window(vol, position, params.support_region) else {
        return MaskFit::OutOfBounds;
    };
    let n = vol.num_dimensions();

    let mut samples: Vec<([f64; 3], f64)> = Vec::new();
    for z in lo[2]..=hi[2] {
        for y in lo[1]..=hi[1] {
            for x in lo[0]..=hi[0] {
                let v = vol.data()[vol.index(x as usize, y as usize, z as usize)] as f64;
                samples.push(([x as f64, y as f64, z as f64], if invert { -v } else { v }));
            }
        }
    }
    let background = samples
        .iter()
        .map(|s| s.1)
        .fold(f64::INFINITY, f64::min);
    for s in samples.iter_mut() {
        s.1 -= background;
    }

    let inv_two_sigma_sq: Vec<f64> = (0..n)
        .map(|d| 1.0 / (2.0 * params.sigma[d] * params.sigma[d]))
        .collect();
    let mut center = [position[0] as f64, position[1] as f64, position[2] as f64];
    for _ in 0..params.iterations {
        let mut sum = [0.0f64; 3];
        let mut total = 0.0;
        for (x, v) in &samples {
            let mut e = 0.0;
            for d in 0..n {
                let diff = x[d] - center[d];
                e += diff * diff * inv_two_sigma_sq[d];
            }
            let w = v * (-e).exp();
            for d in 0..n {
                sum[d] += x[d] * w;
            }
            total += w;
        }
        if !(total > 0.0) {
            break;
        }
        for d in 0..n {
            center[d] = sum[d] / total;
        }
    }
    MaskFit::Located(center)
}
