//! Linear-plus-translation models: translation, rigid, similarity and affine.
//!
//! All four kinds share one representation, `x' = L x + t`, with `L` a 3x3
//! matrix. For 2D models the z row and column of `L` are the identity and `t.z`
//! is zero. Fits minimize weighted squared distances between `a.local` mapped
//! through the model and `b.world`.

use crate::model::ModelKind;
use crate::point::PointMatch;
use crate::util::{DescRegError, DescRegResult};
use nalgebra::{Matrix3, Point3, Vector3};

/// Affine-family transform.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineModel {
    kind: ModelKind,
    num_dimensions: usize,
    linear: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl AffineModel {
    pub(crate) fn identity(kind: ModelKind, num_dimensions: usize) -> Self {
        Self {
            kind,
            num_dimensions,
            linear: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Builds a model from its parts; the caller is responsible for `kind`
    /// describing `linear` correctly.
    pub fn from_parts(
        kind: ModelKind,
        num_dimensions: usize,
        linear: Matrix3<f64>,
        translation: Vector3<f64>,
    ) -> Self {
        let mut model = Self {
            kind,
            num_dimensions,
            linear,
            translation,
        };
        model.enforce_planar();
        model
    }

    fn enforce_planar(&mut self) {
        if self.num_dimensions == 2 {
            for i in 0..2 {
                self.linear[(i, 2)] = 0.0;
                self.linear[(2, i)] = 0.0;
            }
            self.linear[(2, 2)] = 1.0;
            self.translation.z = 0.0;
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    pub fn linear(&self) -> &Matrix3<f64> {
        &self.linear
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.linear * p.coords + self.translation)
    }

    pub fn inverse(&self) -> DescRegResult<Self> {
        let inv = self
            .linear
            .try_inverse()
            .ok_or(DescRegError::NoninvertibleModel)?;
        Ok(Self {
            kind: self.kind,
            num_dimensions: self.num_dimensions,
            linear: inv,
            translation: -(inv * self.translation),
        })
    }

    /// `(1 - lambda) * self + lambda * other`, element-wise, as a plain affine.
    pub(crate) fn blend(&self, other: &AffineModel, lambda: f64) -> Self {
        Self::from_parts(
            ModelKind::Affine,
            self.num_dimensions,
            self.linear * (1.0 - lambda) + other.linear * lambda,
            self.translation * (1.0 - lambda) + other.translation * lambda,
        )
    }

    /// Returns the same mapping relabelled as a general affine.
    pub(crate) fn as_general(&self) -> Self {
        Self {
            kind: ModelKind::Affine,
            ..self.clone()
        }
    }

    /// Concatenates `diag(1, 1, z)` on the input side.
    pub(crate) fn with_axial_scaling(&self, z: f64) -> Self {
        if self.num_dimensions != 3 {
            return self.clone();
        }
        let scale = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, z));
        Self::from_parts(
            ModelKind::Affine,
            3,
            self.linear * scale,
            self.translation,
        )
    }

    /// Least-squares fit of this model's kind to `matches`.
    pub(crate) fn fit(&mut self, matches: &[PointMatch]) -> DescRegResult<()> {
        let needed = self.kind.min_num_matches(self.num_dimensions);
        if matches.len() < needed {
            return Err(DescRegError::NotEnoughDataPoints {
                needed,
                got: matches.len(),
            });
        }
        let n = self.num_dimensions;
        let (mut sp, mut sq, mut ws) = (Vector3::zeros(), Vector3::zeros(), 0.0);
        for m in matches {
            sp += m.a.local().coords * m.weight;
            sq += m.b.world().coords * m.weight;
            ws += m.weight;
        }
        if !(ws > 0.0) {
            return Err(DescRegError::IllDefinedData("weights must be positive"));
        }
        let cp = sp / ws;
        let cq = sq / ws;
        let centered: Vec<(Vector3<f64>, Vector3<f64>, f64)> = matches
            .iter()
            .map(|m| {
                let mut p = m.a.local().coords - cp;
                let mut q = m.b.world().coords - cq;
                if n == 2 {
                    p.z = 0.0;
                    q.z = 0.0;
                }
                (p, q, m.weight)
            })
            .collect();

        let linear = match self.kind {
            ModelKind::Translation => Matrix3::identity(),
            ModelKind::Rigid => fit_rotation(&centered, n)?,
            ModelKind::Similarity => fit_similarity(&centered, n)?,
            ModelKind::Affine => fit_affine(&centered, n)?,
            ModelKind::Homography => {
                return Err(DescRegError::IncompatibleModel {
                    reason: "homography is not an affine-family model".to_string(),
                })
            }
        };
        if linear.iter().any(|v| !v.is_finite()) {
            return Err(DescRegError::IllDefinedData("fit produced non-finite values"));
        }
        self.linear = linear;
        self.translation = cq - linear * cp;
        self.enforce_planar();
        Ok(())
    }
}

/// Weighted cross-covariance `sum w q p^T`.
fn cross_covariance(centered: &[(Vector3<f64>, Vector3<f64>, f64)]) -> Matrix3<f64> {
    centered
        .iter()
        .fold(Matrix3::zeros(), |acc, (p, q, w)| acc + q * p.transpose() * *w)
}

/// Best rotation mapping the `p` vectors onto the `q` vectors (no centering).
pub(crate) fn fit_rotation(
    centered: &[(Vector3<f64>, Vector3<f64>, f64)],
    num_dimensions: usize,
) -> DescRegResult<Matrix3<f64>> {
    if num_dimensions == 2 {
        let (sin, cos) = planar_moments(centered);
        if sin == 0.0 && cos == 0.0 {
            return Err(DescRegError::IllDefinedData("coincident points"));
        }
        let theta = sin.atan2(cos);
        return Ok(planar_rotation(theta, 1.0));
    }
    let (rotation, _) = umeyama(centered)?;
    Ok(rotation)
}

fn fit_similarity(
    centered: &[(Vector3<f64>, Vector3<f64>, f64)],
    num_dimensions: usize,
) -> DescRegResult<Matrix3<f64>> {
    let spread: f64 = centered.iter().map(|(p, _, w)| p.norm_squared() * w).sum();
    if !(spread > 0.0) {
        return Err(DescRegError::IllDefinedData("coincident points"));
    }
    if num_dimensions == 2 {
        let (sin, cos) = planar_moments(centered);
        let a = cos / spread;
        let b = sin / spread;
        return Ok(Matrix3::new(a, -b, 0.0, b, a, 0.0, 0.0, 0.0, 1.0));
    }
    let (rotation, trace) = umeyama(centered)?;
    Ok(rotation * (trace / spread))
}

fn fit_affine(
    centered: &[(Vector3<f64>, Vector3<f64>, f64)],
    num_dimensions: usize,
) -> DescRegResult<Matrix3<f64>> {
    let mut pp = centered
        .iter()
        .fold(Matrix3::zeros(), |acc, (p, _, w)| acc + p * p.transpose() * *w);
    let mut qp = cross_covariance(centered);
    if num_dimensions == 2 {
        pp[(2, 2)] = 1.0;
        qp[(2, 2)] = 1.0;
    }
    let inv = pp
        .try_inverse()
        .ok_or(DescRegError::IllDefinedData("points are collinear or coplanar"))?;
    Ok(qp * inv)
}

/// `(sum w (p x q)_z, sum w p.q)` over the x/y components.
fn planar_moments(centered: &[(Vector3<f64>, Vector3<f64>, f64)]) -> (f64, f64) {
    centered.iter().fold((0.0, 0.0), |(s, c), (p, q, w)| {
        (
            s + w * (p.x * q.y - p.y * q.x),
            c + w * (p.x * q.x + p.y * q.y),
        )
    })
}

pub(crate) fn planar_rotation(theta: f64, scale: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(
        scale * c,
        -scale * s,
        0.0,
        scale * s,
        scale * c,
        0.0,
        0.0,
        0.0,
        1.0,
    )
}

/// Proper rotation maximizing `trace(R^T H)` and the matching `trace(S D)`.
fn umeyama(centered: &[(Vector3<f64>, Vector3<f64>, f64)]) -> DescRegResult<(Matrix3<f64>, f64)> {
    let h = cross_covariance(centered);
    let svd = h.svd(true, true);
    let u = svd
        .u
        .ok_or(DescRegError::IllDefinedData("SVD failed to produce U"))?;
    let v_t = svd
        .v_t
        .ok_or(DescRegError::IllDefinedData("SVD failed to produce V"))?;
    let s = svd.singular_values;
    if s.iter().all(|v| *v == 0.0) {
        return Err(DescRegError::IllDefinedData("coincident points"));
    }
    let d = (u * v_t).determinant().signum();
    let mut diag = Vector3::new(1.0, 1.0, 1.0);
    if d < 0.0 {
        diag[s.imin()] = -1.0;
    }
    let rotation = u * Matrix3::from_diagonal(&diag) * v_t;
    let trace = s.dot(&diag);
    Ok((rotation, trace))
}
