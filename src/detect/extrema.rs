//! Strict local extrema of the DoG response.

use crate::detect::peak::{ExtremumKind, Peak};
use crate::image::Volume;
use crate::util::math::mirror_index;

/// Reads a voxel with mirrored boundary handling.
#[inline]
pub(crate) fn value_mirrored(vol: &Volume, x: i64, y: i64, z: i64) -> f32 {
    let [w, h, d] = vol.dims();
    let xi = mirror_index(x as isize, w);
    let yi = mirror_index(y as isize, h);
    let zi = mirror_index(z as isize, d);
    vol.data()[vol.index(xi, yi, zi)]
}

/// Offsets of the 8 (2D) or 26 (3D) neighbours.
pub(crate) fn neighbour_offsets(num_dimensions: usize) -> Vec<[i64; 3]> {
    let z_range: &[i64] = if num_dimensions == 3 { &[-1, 0, 1] } else { &[0] };
    let mut out = Vec::with_capacity(26);
    for &dz in z_range {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx != 0 || dy != 0 || dz != 0 {
                    out.push([dx, dy, dz]);
                }
            }
        }
    }
    out
}

/// Scans the DoG response for strict extrema with `|value| >= min_value`.
///
/// Ties with any neighbour disqualify a voxel, so flat regions produce nothing.
/// Output is in scan order (z, y, x).
pub(crate) fn find_extrema(
    dog: &Volume,
    find_max: bool,
    find_min: bool,
    min_value: f64,
) -> Vec<Peak> {
    let mut peaks = Vec::new();
    if !find_max && !find_min {
        return peaks;
    }
    let offsets = neighbour_offsets(dog.num_dimensions());
    let [w, h, d] = dog.dims();
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let v = dog.data()[dog.index(x, y, z)];
                if (v.abs() as f64) < min_value {
                    continue;
                }
                let (xi, yi, zi) = (x as i64, y as i64, z as i64);
                let mut is_max = find_max;
                let mut is_min = find_min;
                for o in &offsets {
                    let n = value_mirrored(dog, xi + o[0], yi + o[1], zi + o[2]);
                    is_max &= v > n;
                    is_min &= v < n;
                    if !is_max && !is_min {
                        break;
                    }
                }
                if is_max {
                    peaks.push(Peak::new([xi, yi, zi], v as f64, ExtremumKind::Maximum));
                } else if is_min {
                    peaks.push(Peak::new([xi, yi, zi], v as f64, ExtremumKind::Minimum));
                }
            }
        }
    }
    peaks
}
