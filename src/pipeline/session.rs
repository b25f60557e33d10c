use crate::model::Model;
use crate::trace::trace_warn;
use crate::util::{DescRegError, DescRegResult};

/// Models of the last completed registration, kept for reapplication.
///
/// A session is created by the caller, filled by a registration run and passed
/// explicitly to later runs that want to reuse its models.
#[derive(Clone, Debug, Default)]
pub struct RegistrationSession {
    models: Vec<Model>,
    num_dimensions: usize,
}

impl RegistrationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored models.
    pub fn store(&mut self, models: &[Model], num_dimensions: usize) {
        self.models = models.to_vec();
        self.num_dimensions = num_dimensions;
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Copies of the stored models for a series of `num_images` images.
    ///
    /// Fails when fewer models than images are stored or when the data has
    /// fewer dimensions than the models. Extra models and higher-dimensional
    /// data are accepted with a warning.
    pub fn reapply(&self, num_images: usize, num_dimensions: usize) -> DescRegResult<Vec<Model>> {
        if self.models.is_empty() {
            return Err(DescRegError::InvalidInput("no models stored in the session"));
        }
        if self.models.len() < num_images {
            return Err(DescRegError::NotEnoughDataPoints {
                needed: num_images,
                got: self.models.len(),
            });
        }
        if self.models.len() > num_images {
            trace_warn!(
                "session holds {} models but the series has {} images",
                self.models.len(),
                num_images
            );
        }
        if num_dimensions < self.num_dimensions {
            return Err(DescRegError::UnsupportedDimensionality(num_dimensions));
        }
        if num_dimensions > self.num_dimensions {
            trace_warn!(
                "applying {}D models to {}D data",
                self.num_dimensions,
                num_dimensions
            );
        }
        Ok(self.models[..num_images].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::RegistrationSession;
    use crate::model::Model;
    use crate::util::DescRegError;
    use nalgebra::Vector3;

    fn session(n: usize) -> RegistrationSession {
        let models: Vec<Model> = (0..n)
            .map(|i| Model::translation(2, Vector3::new(i as f64, 0.0, 0.0)))
            .collect();
        let mut s = RegistrationSession::new();
        s.store(&models, 2);
        s
    }

    #[test]
    fn reapply_returns_copies() {
        let s = session(3);
        let models = s.reapply(3, 2).unwrap();
        assert_eq!(models, s.models());
        assert_eq!(s.reapply(2, 3).unwrap().len(), 2);
    }

    #[test]
    fn reapply_rejects_short_sessions_and_lower_dimensions() {
        let s = session(2);
        assert_eq!(
            s.reapply(3, 2),
            Err(DescRegError::NotEnoughDataPoints { needed: 3, got: 2 })
        );
        let mut s3 = RegistrationSession::new();
        s3.store(&[Model::translation(3, Vector3::zeros())], 3);
        assert_eq!(s3.reapply(1, 2), Err(DescRegError::UnsupportedDimensionality(2)));
        assert!(RegistrationSession::new().reapply(1, 2).is_err());
    }
}
