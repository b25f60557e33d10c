//! Scalar image volumes, intensity normalization and regions of interest.
//!
//! `Volume` owns a contiguous `f32` buffer laid out x-fastest, then y, then z.
//! 2D images are volumes with a depth of one; `num_dimensions` records whether
//! the data should be treated as a plane or a stack. Calibration stores the
//! physical size of one voxel along each axis.

use crate::util::{DescRegError, DescRegResult};

#[cfg(feature = "image-io")]
pub mod io;
pub mod roi;

pub use roi::Roi;

/// Owned 2D or 3D scalar image.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    data: Vec<f32>,
    dims: [usize; 3],
    num_dimensions: usize,
    calibration: [f64; 3],
}

impl Volume {
    /// Creates a 2D image from row-major data.
    pub fn new_2d(data: Vec<f32>, width: usize, height: usize) -> DescRegResult<Self> {
        Self::with_dims(data, [width, height, 1], 2)
    }

    /// Creates a 3D stack from x-fastest data.
    pub fn new_3d(data: Vec<f32>, width: usize, height: usize, depth: usize) -> DescRegResult<Self> {
        Self::with_dims(data, [width, height, depth], 3)
    }

    fn with_dims(data: Vec<f32>, dims: [usize; 3], num_dimensions: usize) -> DescRegResult<Self> {
        let [width, height, depth] = dims;
        if width == 0 || height == 0 || depth == 0 {
            return Err(DescRegError::InvalidDimensions {
                width,
                height,
                depth,
            });
        }
        let needed = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(depth))
            .ok_or(DescRegError::InvalidDimensions {
                width,
                height,
                depth,
            })?;
        if data.len() < needed {
            return Err(DescRegError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        let mut data = data;
        data.truncate(needed);
        Ok(Self {
            data,
            dims,
            num_dimensions,
            calibration: [1.0; 3],
        })
    }

    /// Sets the physical voxel size per axis.
    pub fn with_calibration(mut self, calibration: [f64; 3]) -> DescRegResult<Self> {
        if calibration.iter().any(|c| !c.is_finite() || *c <= 0.0) {
            return Err(DescRegError::InvalidInput("calibration must be positive"));
        }
        self.calibration = calibration;
        Ok(self)
    }

    /// Returns the image width in pixels.
    pub fn width(&self) -> usize {
        self.dims[0]
    }

    /// Returns the image height in pixels.
    pub fn height(&self) -> usize {
        self.dims[1]
    }

    /// Returns the number of slices (1 for 2D images).
    pub fn depth(&self) -> usize {
        self.dims[2]
    }

    /// Returns `[width, height, depth]`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Returns 2 for planes and 3 for stacks.
    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    /// Returns the physical voxel size per axis.
    pub fn calibration(&self) -> [f64; 3] {
        self.calibration
    }

    /// Ratio of axial to lateral voxel size; 1.0 for 2D images.
    pub fn z_stretch(&self) -> f64 {
        if self.num_dimensions == 3 {
            self.calibration[2] / self.calibration[0]
        } else {
            1.0
        }
    }

    /// Returns the backing slice.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Returns the voxel at `(x, y, z)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        self.data.get(self.index(x, y, z)).copied()
    }

    #[inline]
    pub(crate) fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    /// Returns `true` when the signed position lies inside the volume.
    pub(crate) fn contains(&self, position: [i64; 3]) -> bool {
        position
            .iter()
            .zip(self.dims)
            .all(|(&p, d)| p >= 0 && (p as usize) < d)
    }

    /// Minimum and maximum intensity.
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Returns a copy rescaled so that `min` maps to 0 and `max` to 1.
    ///
    /// A degenerate range yields an all-zero image.
    pub fn normalized(&self, min: f32, max: f32) -> Volume {
        let range = max - min;
        let mut out = self.clone();
        if !(range > 0.0) || !range.is_finite() {
            out.data.iter_mut().for_each(|v| *v = 0.0);
            return out;
        }
        let inv = 1.0 / range;
        for v in out.data.iter_mut() {
            *v = (*v - min) * inv;
        }
        out
    }
}

/// Intensity normalization applied before detection.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Normalization {
    /// Each image is scaled by its own min/max.
    #[default]
    PerImage,
    /// All images share the min/max of the whole series.
    Global,
    /// A caller supplied intensity range.
    Fixed { min: f32, max: f32 },
}

/// Normalizes every image of a series to `[0, 1]`.
pub fn normalize_series(images: &[Volume], mode: Normalization) -> Vec<Volume> {
    match mode {
        Normalization::PerImage => images
            .iter()
            .map(|img| {
                let (lo, hi) = img.min_max();
                img.normalized(lo, hi)
            })
            .collect(),
        Normalization::Global => {
            let (lo, hi) = images
                .iter()
                .map(Volume::min_max)
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (a, b)| {
                    (lo.min(a), hi.max(b))
                });
            images.iter().map(|img| img.normalized(lo, hi)).collect()
        }
        Normalization::Fixed { min, max } => {
            images.iter().map(|img| img.normalized(min, max)).collect()
        }
    }
}
