//! Regularized model: a weighted blend of two affine-family fits.

use crate::model::affine::AffineModel;
use crate::point::PointMatch;
use crate::util::DescRegResult;
use nalgebra::Point3;

/// `(1 - lambda) * primary + lambda * regularizer`, both fitted to the same data.
///
/// Points are mapped through the blended matrix, which is also what
/// [`InterpolatedModel::decompose`] returns.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedModel {
    primary: AffineModel,
    regularizer: AffineModel,
    lambda: f64,
    blended: AffineModel,
}

impl InterpolatedModel {
    pub(crate) fn new(primary: AffineModel, regularizer: AffineModel, lambda: f64) -> Self {
        let blended = primary.blend(&regularizer, lambda);
        Self {
            primary,
            regularizer,
            lambda,
            blended,
        }
    }

    pub fn primary(&self) -> &AffineModel {
        &self.primary
    }

    pub fn regularizer(&self) -> &AffineModel {
        &self.regularizer
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        self.blended.apply(p)
    }

    /// The plain affine equivalent of the blend.
    pub fn decompose(&self) -> AffineModel {
        self.blended.clone()
    }

    pub(crate) fn fit(&mut self, matches: &[PointMatch]) -> DescRegResult<()> {
        let mut primary = self.primary.clone();
        let mut regularizer = self.regularizer.clone();
        primary.fit(matches)?;
        regularizer.fit(matches)?;
        *self = Self::new(primary, regularizer, self.lambda);
        Ok(())
    }
}
