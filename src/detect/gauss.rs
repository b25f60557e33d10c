//! Separable Gaussian smoothing and the difference-of-Gaussian response.

use crate::image::Volume;
use crate::util::math::mirror_index;

/// Normalized 1D Gaussian kernel with radius `ceil(3 sigma)`.
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel.into_iter().map(|v| v as f32).collect()
}

/// Convolves the volume along `axis` with mirrored boundaries.
fn convolve_axis(vol: &mut Volume, axis: usize, kernel: &[f32]) {
    let dims = vol.dims();
    let len = dims[axis];
    if len <= 1 {
        return;
    }
    let radius = (kernel.len() / 2) as isize;
    let stride = match axis {
        0 => 1,
        1 => dims[0],
        _ => dims[0] * dims[1],
    };
    let mut line = vec![0.0f32; len];
    let (outer_a, outer_b) = match axis {
        0 => (dims[1], dims[2]),
        1 => (dims[0], dims[2]),
        _ => (dims[0], dims[1]),
    };
    let data = vol.data_mut();
    for b in 0..outer_b {
        for a in 0..outer_a {
            let start = match axis {
                0 => b * dims[0] * dims[1] + a * dims[0],
                1 => b * dims[0] * dims[1] + a,
                _ => b * dims[0] + a,
            };
            for (i, slot) in line.iter_mut().enumerate() {
                *slot = data[start + i * stride];
            }
            for i in 0..len {
                let mut acc = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let src = mirror_index(i as isize + k as isize - radius, len);
                    acc += w * line[src];
                }
                data[start + i * stride] = acc;
            }
        }
    }
}

/// Smooths the volume with per-axis sigmas; a zero sigma leaves that axis untouched.
pub(crate) fn gaussian_smooth(vol: &Volume, sigma: [f64; 3]) -> Volume {
    let mut out = vol.clone();
    for (axis, &s) in sigma.iter().enumerate().take(vol.num_dimensions()) {
        if s > 0.0 {
            convolve_axis(&mut out, axis, &gaussian_kernel(s));
        }
    }
    out
}

/// Sigma still to apply to reach `target` given the image's inherent blur.
pub(crate) fn sigma_diff(target: f64, image_sigma: f64) -> f64 {
    (target * target - image_sigma * image_sigma).max(0.0).sqrt()
}

/// Per-axis smoothing for both DoG scales, plus the normalization weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct DogSigmas {
    pub inner: [f64; 3],
    pub outer: [f64; 3],
    pub weight: f64,
}

impl DogSigmas {
    /// Derives the smoothing sigmas for an image with the given z stretch.
    ///
    /// The axial sigma is the lateral one divided by the stretch and is kept
    /// at or above twice the inherent image blur.
    pub(crate) fn new(sigma1: f64, sigma2: f64, image_sigma: f64, z_stretch: f64) -> Self {
        let k = sigma2 / sigma1;
        let sigma1_z = (2.0 * image_sigma).max(sigma1 / z_stretch);
        let sigma2_z = sigma1_z * k;
        let inner = [
            sigma_diff(sigma1, image_sigma),
            sigma_diff(sigma1, image_sigma),
            sigma_diff(sigma1_z, image_sigma),
        ];
        let outer = [
            sigma_diff(sigma2, image_sigma),
            sigma_diff(sigma2, image_sigma),
            sigma_diff(sigma2_z, image_sigma),
        ];
        Self {
            inner,
            outer,
            weight: 1.0 / (k - 1.0),
        }
    }
}

/// Computes `(G(inner) - G(outer)) * weight`; bright blobs become maxima.
pub(crate) fn difference_of_gaussian(vol: &Volume, sigmas: &DogSigmas) -> Volume {
    let g1 = gaussian_smooth(vol, sigmas.inner);
    let mut out = gaussian_smooth(vol, sigmas.outer);
    let w = sigmas.weight as f32;
    for (o, &a) in out.data_mut().iter_mut().zip(g1.data()) {
        *o = (a - *o) * w;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{difference_of_gaussian, gaussian_kernel, gaussian_smooth, DogSigmas};
    use crate::image::Volume;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 11);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
    }

    #[test]
    fn smoothing_preserves_constant_images() {
        let vol = Volume::new_2d(vec![2.0; 64], 8, 8).unwrap();
        let out = gaussian_smooth(&vol, [1.0, 1.0, 0.0]);
        assert!(out.data().iter().all(|v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn bright_blob_gives_positive_response() {
        let mut data = vec![0.0f32; 21 * 21];
        data[10 * 21 + 10] = 1.0;
        let vol = Volume::new_2d(data, 21, 21).unwrap();
        let sigmas = DogSigmas::new(2.0, 2.0 * 2f64.powf(0.25), 0.5, 1.0);
        let dog = difference_of_gaussian(&vol, &sigmas);
        assert!(dog.get(10, 10, 0).unwrap() > 0.0);
    }

    #[test]
    fn axial_sigma_respects_lower_bound() {
        let sigmas = DogSigmas::new(2.0, 2.5, 0.5, 10.0);
        // sigma1 / stretch = 0.2 is below 2 * image sigma
        assert!((sigmas.inner[2] - (1.0f64 - 0.25).sqrt()).abs() < 1e-12);
        assert!((sigmas.weight - 4.0).abs() < 1e-12);
    }
}
