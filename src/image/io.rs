//! Convenience helpers for loading images via the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::image::Volume;
use crate::util::{DescRegError, DescRegResult};
use std::path::Path;

/// Creates a 2D volume from a 32-bit float grayscale buffer.
pub fn volume_from_luma32f(img: &image::ImageBuffer<image::Luma<f32>, Vec<f32>>) -> DescRegResult<Volume> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    Volume::new_2d(img.as_raw().clone(), width, height)
}

/// Creates a 2D volume from a dynamic image, converting to grayscale.
pub fn volume_from_dynamic_image(img: &image::DynamicImage) -> DescRegResult<Volume> {
    volume_from_luma32f(&img.to_luma32f())
}

/// Loads an image from disk as a grayscale 2D volume.
pub fn load_gray_volume<P: AsRef<Path>>(path: P) -> DescRegResult<Volume> {
    let img = image::open(path).map_err(|err| DescRegError::ImageIo {
        reason: err.to_string(),
    })?;
    volume_from_dynamic_image(&img)
}

/// Loads equally sized 2D slices and stacks them into a 3D volume.
pub fn load_gray_stack<P: AsRef<Path>>(paths: &[P]) -> DescRegResult<Volume> {
    let mut data = Vec::new();
    let mut plane: Option<(usize, usize)> = None;
    for path in paths {
        let slice = load_gray_volume(path)?;
        match plane {
            None => plane = Some((slice.width(), slice.height())),
            Some((w, h)) if w != slice.width() || h != slice.height() => {
                return Err(DescRegError::ImageIo {
                    reason: format!(
                        "slice size {}x{} differs from {}x{}",
                        slice.width(),
                        slice.height(),
                        w,
                        h
                    ),
                });
            }
            Some(_) => {}
        }
        data.extend_from_slice(slice.data());
    }
    let (width, height) = plane.ok_or(DescRegError::InvalidInput("stack has no slices"))?;
    Volume::new_3d(data, width, height, paths.len())
}
