//! Quadratic subpixel localization of DoG extrema.
//!
//! Fits a second order Taylor expansion around the integer position using
//! central differences and solves for the stationary point. When the solution
//! lies more than half a pixel away the peak is moved one pixel towards it and
//! the fit is repeated, up to `max_moves` times.

use crate::detect::extrema::value_mirrored;
use crate::detect::peak::Peak;
use crate::image::Volume;
use nalgebra::{Matrix3, Vector3};

/// Slack added to the half-pixel acceptance window.
const MAXIMA_TOLERANCE: f64 = 0.01;

#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadraticParams {
    pub max_moves: usize,
    pub allow_maxima_tolerance: bool,
}

fn sample(dog: &Volume, p: [i64; 3]) -> f64 {
    value_mirrored(dog, p[0], p[1], p[2]) as f64
}

fn shifted(p: [i64; 3], d: usize, by: i64) -> [i64; 3] {
    let mut q = p;
    q[d] += by;
    q
}

/// Gradient and Hessian at an integer position via central differences.
fn derivatives(dog: &Volume, p: [i64; 3], n: usize) -> (Vector3<f64>, Matrix3<f64>) {
    let mut g = Vector3::zeros();
    let mut h = Matrix3::identity();
    let c = sample(dog, p);
    for d in 0..n {
        let fp = sample(dog, shifted(p, d, 1));
        let fm = sample(dog, shifted(p, d, -1));
        g[d] = 0.5 * (fp - fm);
        h[(d, d)] = fp - 2.0 * c + fm;
        for e in (d + 1)..n {
            let pp = sample(dog, shifted(shifted(p, d, 1), e, 1));
            let pm = sample(dog, shifted(shifted(p, d, 1), e, -1));
            let mp = sample(dog, shifted(shifted(p, d, -1), e, 1));
            let mm = sample(dog, shifted(shifted(p, d, -1), e, -1));
            let v = 0.25 * (pp - pm - mp + mm);
            h[(d, e)] = v;
            h[(e, d)] = v;
        }
    }
    (g, h)
}

/// Localizes one peak in place.
pub(crate) fn localize_peak(dog: &Volume, peak: &mut Peak, params: QuadraticParams) {
    let n = dog.num_dimensions();
    let limit = if params.allow_maxima_tolerance {
        0.5 + MAXIMA_TOLERANCE
    } else {
        0.5
    };
    let sign = if peak.is_max() { 1.0 } else { -1.0 };
    let mut pos = peak.position;

    for moves in 0..=params.max_moves {
        let (g, h) = derivatives(dog, pos, n);
        let Some(offset) = h.lu().solve(&(-g)) else {
            peak.valid = false;
            return;
        };
        if offset.iter().any(|v| !v.is_finite()) {
            peak.valid = false;
            return;
        }

        let center = sample(dog, pos);
        let finish = |peak: &mut Peak, pos: [i64; 3], o: Vector3<f64>| {
            let o = o.map(|v| v.clamp(-limit, limit));
            peak.position = pos;
            peak.offset = [o[0], o[1], if n == 3 { o[2] } else { 0.0 }];
            peak.value = center + 0.5 * g.dot(&o);
        };

        if (0..n).all(|d| offset[d].abs() <= limit) {
            finish(peak, pos, offset);
            return;
        }
        if moves == params.max_moves {
            peak.valid = false;
            return;
        }

        let mut next = pos;
        for d in 0..n {
            if offset[d].abs() > limit {
                next[d] += offset[d].signum() as i64;
            }
        }
        if !dog.contains(next) {
            peak.valid = false;
            return;
        }
        // Stay on a sampled extremum when the fit points downhill.
        if sign * (sample(dog, next) - center) < 0.0 {
            finish(peak, pos, offset);
            return;
        }
        pos = next;
    }
}
