use crate::detect::{brightest, detect_peaks, DetectConfig};
use crate::image::{normalize_series, Normalization, Volume};
use crate::model::Model;
use crate::point::Particle;
use crate::trace::trace_span;
use crate::util::{DescRegError, DescRegResult};

/// One translation per image moving its strongest detection onto that of the
/// first image.
///
/// Positions are stretch-corrected, like registration models. An image
/// without any detection fails the run.
pub fn track_brightest_peak(
    images: &[Volume],
    detect: &DetectConfig,
    normalization: Normalization,
) -> DescRegResult<Vec<Model>> {
    let _span = trace_span!("track_brightest_peak", images = images.len()).entered();
    let Some(first) = images.first() else {
        return Ok(Vec::new());
    };
    let num_dimensions = first.num_dimensions();
    let normalized = normalize_series(images, normalization);
    let mut reference = None;
    let mut models = Vec::with_capacity(images.len());
    for image in &normalized {
        if image.num_dimensions() != num_dimensions {
            return Err(DescRegError::InvalidInput("images differ in dimensionality"));
        }
        let detection = detect_peaks(image, detect)?;
        let peak = brightest(&detection.peaks)
            .ok_or(DescRegError::NotEnoughDataPoints { needed: 1, got: 0 })?;
        let position = Particle::new(0, peak, image.z_stretch(), num_dimensions).local();
        let origin = *reference.get_or_insert(position);
        models.push(Model::translation(num_dimensions, origin - position));
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::track_brightest_peak;
    use crate::detect::DetectConfig;
    use crate::image::{Normalization, Volume};
    use nalgebra::Point3;

    fn blob(cx: f64, cy: f64) -> Volume {
        let (w, h) = (48, 40);
        let mut data = vec![0.0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                data[y * w + x] = (-d2 / (2.0 * 2.0 * 2.0)).exp() as f32;
            }
        }
        Volume::new_2d(data, w, h).unwrap()
    }

    #[test]
    fn models_move_peaks_onto_the_first() {
        let images = [blob(20.0, 18.0), blob(25.0, 15.0)];
        let models =
            track_brightest_peak(&images, &DetectConfig::default(), Normalization::PerImage)
                .unwrap();
        assert_eq!(models.len(), 2);
        let moved = models[1].apply(&Point3::new(25.0, 15.0, 0.0));
        assert!((moved - Point3::new(20.0, 18.0, 0.0)).norm() < 0.3);
        let fixed = models[0].apply(&Point3::new(3.0, 4.0, 0.0));
        assert!((fixed - Point3::new(3.0, 4.0, 0.0)).norm() < 1e-12);
    }
}
