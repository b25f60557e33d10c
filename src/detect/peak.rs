//! Detected extrema and their deterministic ordering.

use std::cmp::Ordering;

/// Polarity of a difference-of-Gaussian extremum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtremumKind {
    /// Bright blob on a darker background.
    Maximum,
    /// Dark blob on a brighter background.
    Minimum,
}

/// Extremum of the DoG response at integer pixel position plus a subpixel offset.
///
/// For 2D images the z components of `position` and `offset` are zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    /// Integer pixel position `[x, y, z]`.
    pub position: [i64; 3],
    /// Subpixel offset added to `position`.
    pub offset: [f64; 3],
    /// Signed DoG response (interpolated after quadratic localization).
    pub value: f64,
    /// Maximum or minimum.
    pub kind: ExtremumKind,
    /// Cleared when subpixel localization failed.
    pub valid: bool,
}

impl Peak {
    pub(crate) fn new(position: [i64; 3], value: f64, kind: ExtremumKind) -> Self {
        Self {
            position,
            offset: [0.0; 3],
            value,
            kind,
            valid: true,
        }
    }

    /// Peak at a subpixel location, e.g. from an external detector.
    ///
    /// Negative values are treated as minima.
    pub fn from_location(location: [f64; 3], value: f64) -> Self {
        let position = location.map(|v| v.floor() as i64);
        let offset = [0, 1, 2].map(|d| location[d] - position[d] as f64);
        let kind = if value < 0.0 {
            ExtremumKind::Minimum
        } else {
            ExtremumKind::Maximum
        };
        Self {
            position,
            offset,
            value,
            kind,
            valid: true,
        }
    }

    /// Subpixel location `position + offset`.
    pub fn location(&self) -> [f64; 3] {
        [
            self.position[0] as f64 + self.offset[0],
            self.position[1] as f64 + self.offset[1],
            self.position[2] as f64 + self.offset[2],
        ]
    }

    /// Returns `true` for maxima.
    pub fn is_max(&self) -> bool {
        self.kind == ExtremumKind::Maximum
    }
}

/// Orders peaks by descending magnitude, then by position (z, y, x).
pub(crate) fn peak_cmp_desc(a: &Peak, b: &Peak) -> Ordering {
    b.value
        .abs()
        .total_cmp(&a.value.abs())
        .then_with(|| a.position[2].cmp(&b.position[2]))
        .then_with(|| a.position[1].cmp(&b.position[1]))
        .then_with(|| a.position[0].cmp(&b.position[0]))
}

/// Orders peaks by position only (z, y, x) for scan-order output.
pub(crate) fn peak_cmp_scan(a: &Peak, b: &Peak) -> Ordering {
    a.position[2]
        .cmp(&b.position[2])
        .then_with(|| a.position[1].cmp(&b.position[1]))
        .then_with(|| a.position[0].cmp(&b.position[0]))
}
