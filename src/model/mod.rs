//! Geometric transform models.
//!
//! [`Model`] is a closed set of transform variants sharing one capability set:
//! fit to correspondences, map points, invert, estimate bounds. Models are
//! values; callers clone before mutating so tiles and worker threads never
//! alias one another's parameters.

pub mod affine;
pub mod homography;
pub mod interpolated;

pub use affine::AffineModel;
pub use homography::HomographyModel;
pub use interpolated::InterpolatedModel;

use crate::point::{mean_residual, PointMatch};
use crate::util::{DescRegError, DescRegResult};
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Transform family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ModelKind {
    Translation,
    #[default]
    Rigid,
    Similarity,
    Affine,
    /// Planar only.
    Homography,
}

impl ModelKind {
    /// Minimum number of correspondences that determine the model.
    pub fn min_num_matches(self, num_dimensions: usize) -> usize {
        match (self, num_dimensions) {
            (ModelKind::Translation, _) => 1,
            (ModelKind::Rigid | ModelKind::Similarity, 3) => 3,
            (ModelKind::Rigid | ModelKind::Similarity, _) => 2,
            (ModelKind::Affine, 3) => 4,
            (ModelKind::Affine, _) => 3,
            (ModelKind::Homography, _) => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Translation => "translation",
            ModelKind::Rigid => "rigid",
            ModelKind::Similarity => "similarity",
            ModelKind::Affine => "affine",
            ModelKind::Homography => "homography",
        }
    }
}

/// Blend towards a lower-DOF model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Regularization {
    pub kind: ModelKind,
    pub lambda: f64,
}

/// Describes which model to instantiate for a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelSpec {
    pub kind: ModelKind,
    pub num_dimensions: usize,
    pub regularization: Option<Regularization>,
}

impl ModelSpec {
    pub fn new(kind: ModelKind, num_dimensions: usize) -> Self {
        Self {
            kind,
            num_dimensions,
            regularization: None,
        }
    }

    /// Adds a regularizer with blend weight `lambda`.
    pub fn regularized(mut self, kind: ModelKind, lambda: f64) -> Self {
        self.regularization = Some(Regularization { kind, lambda });
        self
    }

    /// Fresh identity instance.
    pub fn create(&self) -> DescRegResult<Model> {
        let primary = Model::identity(self.kind, self.num_dimensions)?;
        let Some(reg) = self.regularization else {
            return Ok(primary);
        };
        if !(0.0..=1.0).contains(&reg.lambda) {
            return Err(DescRegError::InvalidInput("lambda must lie in [0, 1]"));
        }
        let secondary = Model::identity(reg.kind, self.num_dimensions)?;
        match (primary, secondary) {
            (Model::Affine(a), Model::Affine(b)) => {
                Ok(Model::Interpolated(InterpolatedModel::new(a, b, reg.lambda)))
            }
            _ => Err(DescRegError::IncompatibleModel {
                reason: "homography cannot be regularized".to_string(),
            }),
        }
    }

    /// Minimum correspondences needed by the created model.
    pub fn min_num_matches(&self) -> usize {
        let base = self.kind.min_num_matches(self.num_dimensions);
        match self.regularization {
            Some(reg) => base.max(reg.kind.min_num_matches(self.num_dimensions)),
            None => base,
        }
    }
}

/// A fitted or identity transform.
#[derive(Clone, Debug, PartialEq)]
pub enum Model {
    Affine(AffineModel),
    Homography(HomographyModel),
    Interpolated(InterpolatedModel),
}

impl Model {
    /// Identity transform of the given kind.
    pub fn identity(kind: ModelKind, num_dimensions: usize) -> DescRegResult<Model> {
        if num_dimensions != 2 && num_dimensions != 3 {
            return Err(DescRegError::UnsupportedDimensionality(num_dimensions));
        }
        match kind {
            ModelKind::Homography if num_dimensions == 3 => Err(DescRegError::IncompatibleModel {
                reason: "homography is only available in 2D".to_string(),
            }),
            ModelKind::Homography => Ok(Model::Homography(HomographyModel::default())),
            _ => Ok(Model::Affine(AffineModel::identity(kind, num_dimensions))),
        }
    }

    /// Pure translation.
    pub fn translation(num_dimensions: usize, shift: Vector3<f64>) -> Model {
        Model::Affine(AffineModel::from_parts(
            ModelKind::Translation,
            num_dimensions,
            Matrix3::identity(),
            shift,
        ))
    }

    /// Kind of the primary model.
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Affine(m) => m.kind(),
            Model::Homography(_) => ModelKind::Homography,
            Model::Interpolated(m) => m.primary().kind(),
        }
    }

    pub fn num_dimensions(&self) -> usize {
        match self {
            Model::Affine(m) => m.num_dimensions(),
            Model::Homography(_) => 2,
            Model::Interpolated(m) => m.primary().num_dimensions(),
        }
    }

    pub fn is_regularized(&self) -> bool {
        matches!(self, Model::Interpolated(_))
    }

    pub fn min_num_matches(&self) -> usize {
        let n = self.num_dimensions();
        match self {
            Model::Interpolated(m) => m
                .primary()
                .kind()
                .min_num_matches(n)
                .max(m.regularizer().kind().min_num_matches(n)),
            _ => self.kind().min_num_matches(n),
        }
    }

    /// Least-squares fit mapping `a.local` onto `b.world`.
    ///
    /// On error the model is left unchanged.
    pub fn fit(&mut self, matches: &[PointMatch]) -> DescRegResult<()> {
        match self {
            Model::Affine(m) => {
                let mut next = m.clone();
                next.fit(matches)?;
                *m = next;
                Ok(())
            }
            Model::Homography(m) => m.fit(matches),
            Model::Interpolated(m) => m.fit(matches),
        }
    }

    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        match self {
            Model::Affine(m) => m.apply(p),
            Model::Homography(m) => m.apply(p),
            Model::Interpolated(m) => m.apply(p),
        }
    }

    /// Inverse transform; regularized models invert their blended form.
    pub fn inverse(&self) -> DescRegResult<Model> {
        match self {
            Model::Affine(m) => Ok(Model::Affine(m.inverse()?)),
            Model::Homography(m) => Ok(Model::Homography(m.inverse()?)),
            Model::Interpolated(m) => Ok(Model::Affine(m.decompose().inverse()?)),
        }
    }

    /// Mean distance between mapped A points and B world points.
    pub fn cost(&self, matches: &[PointMatch]) -> f64 {
        mean_residual(self, matches)
    }

    /// Plain model suitable for output: regularized models become affine.
    pub fn decomposed(&self) -> Model {
        match self {
            Model::Interpolated(m) => Model::Affine(m.decompose()),
            other => other.clone(),
        }
    }

    /// Model acting on raw voxel coordinates of an axially stretched stack.
    ///
    /// Equivalent to scaling z by `z_stretch` and then applying `self`.
    pub fn with_axial_scaling(&self, z_stretch: f64) -> Model {
        match self.decomposed() {
            Model::Affine(m) => Model::Affine(m.with_axial_scaling(z_stretch)),
            other => other,
        }
    }

    /// Axis-aligned bounding box of the transformed box `[min, max]`.
    pub fn estimate_bounds(&self, min: [f64; 3], max: [f64; 3]) -> ([f64; 3], [f64; 3]) {
        let n = self.num_dimensions();
        let corners = if n == 3 { 8 } else { 4 };
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for c in 0..corners {
            let pick = |d: usize| if c & (1 << d) == 0 { min[d] } else { max[d] };
            let z = if n == 3 { pick(2) } else { 0.0 };
            let q = self.apply(&Point3::new(pick(0), pick(1), z));
            for d in 0..3 {
                lo[d] = lo[d].min(q[d]);
                hi[d] = hi[d].max(q[d]);
            }
        }
        if n == 2 {
            lo[2] = 0.0;
            hi[2] = 0.0;
        }
        (lo, hi)
    }

    /// Homogeneous 4x4 matrix; planar models leave z untouched.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        match self.decomposed() {
            Model::Affine(m) => {
                let mut out = Matrix4::identity();
                out.fixed_view_mut::<3, 3>(0, 0).copy_from(m.linear());
                out.fixed_view_mut::<3, 1>(0, 3).copy_from(m.translation());
                out
            }
            Model::Homography(m) => {
                let h = m.matrix();
                let idx = [0usize, 1, 3];
                let mut out = Matrix4::identity();
                for (i, &r) in idx.iter().enumerate() {
                    for (j, &c) in idx.iter().enumerate() {
                        out[(r, c)] = h[(i, j)];
                    }
                }
                out
            }
            Model::Interpolated(_) => Matrix4::identity(),
        }
    }

    /// Reads back a matrix written by [`Model::to_homogeneous`].
    ///
    /// A last row of `[0, 0, 0, 1]` gives a general affine, anything else a
    /// planar homography.
    pub fn from_homogeneous(matrix: &Matrix4<f64>, num_dimensions: usize) -> DescRegResult<Model> {
        if !(2..=3).contains(&num_dimensions) {
            return Err(DescRegError::UnsupportedDimensionality(num_dimensions));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(DescRegError::IllDefinedData("matrix has non-finite entries"));
        }
        let last = matrix.row(3);
        if last[0] == 0.0 && last[1] == 0.0 && last[2] == 0.0 && last[3] == 1.0 {
            return Ok(Model::Affine(AffineModel::from_parts(
                ModelKind::Affine,
                num_dimensions,
                matrix.fixed_view::<3, 3>(0, 0).into_owned(),
                matrix.fixed_view::<3, 1>(0, 3).into_owned(),
            )));
        }
        if num_dimensions != 2 {
            return Err(DescRegError::IncompatibleModel {
                reason: "projective matrices are only supported in 2D".to_string(),
            });
        }
        let idx = [0usize, 1, 3];
        let h = Matrix3::from_fn(|i, j| matrix[(idx[i], idx[j])]);
        Ok(Model::Homography(HomographyModel::from_matrix(h)))
    }
}

#[cfg(test)]
mod tests {
    use super::{Model, ModelKind, ModelSpec};
    use crate::detect::{ExtremumKind, Peak};
    use crate::model::affine::planar_rotation;
    use crate::model::{AffineModel, HomographyModel};
    use crate::point::{Particle, PointMatch};
    use crate::util::DescRegError;
    use nalgebra::{Matrix3, Point3, Vector3};

    fn particle(id: usize, p: Point3<f64>) -> Particle {
        let peak = Peak {
            position: [0, 0, 0],
            offset: [p.x, p.y, 0.0],
            value: 1.0,
            kind: ExtremumKind::Maximum,
            valid: true,
        };
        Particle::new(id, peak, 1.0, 2)
    }

    #[test]
    fn min_matches_follow_degrees_of_freedom() {
        assert_eq!(ModelKind::Affine.min_num_matches(3), 4);
        assert_eq!(ModelKind::Rigid.min_num_matches(2), 2);
        assert_eq!(
            ModelSpec::new(ModelKind::Affine, 2)
                .regularized(ModelKind::Rigid, 0.1)
                .min_num_matches(),
            3
        );
    }

    #[test]
    fn homography_cannot_be_regularized_or_3d() {
        let err = ModelSpec::new(ModelKind::Homography, 2)
            .regularized(ModelKind::Rigid, 0.1)
            .create()
            .unwrap_err();
        assert!(matches!(err, DescRegError::IncompatibleModel { .. }));
        assert!(Model::identity(ModelKind::Homography, 3).is_err());
    }

    #[test]
    fn decomposed_regularized_model_maps_points_identically() {
        let truth = AffineModel::from_parts(
            ModelKind::Affine,
            2,
            planar_rotation(0.2, 1.1) + Matrix3::new(0.05, 0.0, 0.0, 0.0, -0.03, 0.0, 0.0, 0.0, 0.0),
            Vector3::new(4.0, -1.0, 0.0),
        );
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(20.0, 3.0, 0.0),
            Point3::new(5.0, 17.0, 0.0),
            Point3::new(-8.0, 9.0, 0.0),
        ];
        let matches: Vec<PointMatch> = pts
            .iter()
            .enumerate()
            .map(|(i, p)| PointMatch::new(particle(i, *p), particle(i, truth.apply(p))))
            .collect();
        let mut model = ModelSpec::new(ModelKind::Affine, 2)
            .regularized(ModelKind::Rigid, 0.1)
            .create()
            .unwrap();
        model.fit(&matches).unwrap();
        let plain = model.decomposed();
        assert!(!plain.is_regularized());
        assert_eq!(plain.kind(), ModelKind::Affine);
        for p in &pts {
            assert!((model.apply(p) - plain.apply(p)).norm() < 1e-12);
        }
    }

    #[test]
    fn bounds_of_a_translated_box() {
        let m = Model::translation(3, Vector3::new(1.0, 2.0, 3.0));
        let (lo, hi) = m.estimate_bounds([0.0; 3], [10.0, 20.0, 5.0]);
        assert_eq!(lo, [1.0, 2.0, 3.0]);
        assert_eq!(hi, [11.0, 22.0, 8.0]);
    }

    #[test]
    fn axial_scaling_acts_on_raw_voxels() {
        let m = Model::translation(3, Vector3::new(0.0, 0.0, 1.0));
        let raw = m.with_axial_scaling(4.0);
        let p = raw.apply(&Point3::new(1.0, 1.0, 2.0));
        assert_eq!(p, Point3::new(1.0, 1.0, 9.0));
    }

    #[test]
    fn homogeneous_matrices_read_back() {
        let rigid = Model::Affine(AffineModel::from_parts(
            ModelKind::Rigid,
            2,
            planar_rotation(0.3, 1.0),
            Vector3::new(4.0, -1.0, 0.0),
        ));
        let back = Model::from_homogeneous(&rigid.to_homogeneous(), 2).unwrap();
        assert_eq!(back.kind(), ModelKind::Affine);

        let projective = Model::Homography(HomographyModel::from_matrix(Matrix3::new(
            1.0, 0.1, 2.0, 0.0, 1.1, -1.0, 1e-3, 2e-3, 1.0,
        )));
        let back_h = Model::from_homogeneous(&projective.to_homogeneous(), 2).unwrap();
        assert_eq!(back_h.kind(), ModelKind::Homography);

        let p = Point3::new(12.0, 7.0, 0.0);
        assert!((back.apply(&p) - rigid.apply(&p)).norm() < 1e-12);
        assert!((back_h.apply(&p) - projective.apply(&p)).norm() < 1e-12);
        assert!(matches!(
            Model::from_homogeneous(&projective.to_homogeneous(), 3),
            Err(DescRegError::IncompatibleModel { .. })
        ));
        assert_eq!(
            Model::from_homogeneous(&rigid.to_homogeneous(), 4),
            Err(DescRegError::UnsupportedDimensionality(4))
        );
    }
}
