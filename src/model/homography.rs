//! Planar homography estimated with the normalized direct linear transform.

use crate::point::PointMatch;
use crate::util::{DescRegError, DescRegResult};
use nalgebra::{Matrix3, Point3, SMatrix, SymmetricEigen, Vector3};

/// 2D projective transform `x' ~ H x`.
#[derive(Clone, Debug, PartialEq)]
pub struct HomographyModel {
    h: Matrix3<f64>,
}

impl Default for HomographyModel {
    fn default() -> Self {
        Self {
            h: Matrix3::identity(),
        }
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn normalization(points: &[(f64, f64)]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let (cx, cy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x / n, sy + y / n));
    let avg = points
        .iter()
        .map(|&(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if avg < 1e-10 {
        return Matrix3::identity();
    }
    let s = std::f64::consts::SQRT_2 / avg;
    Matrix3::new(s, 0.0, -cx * s, 0.0, s, -cy * s, 0.0, 0.0, 1.0)
}

fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let v = h * Vector3::new(x, y, 1.0);
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some((v.x / v.z, v.y / v.z))
}

impl HomographyModel {
    pub fn from_matrix(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.h
    }

    /// Points mapping to infinity are returned unchanged.
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        match project(&self.h, p.x, p.y) {
            Some((x, y)) => Point3::new(x, y, 0.0),
            None => *p,
        }
    }

    pub fn inverse(&self) -> DescRegResult<Self> {
        let inv = self
            .h
            .try_inverse()
            .ok_or(DescRegError::NoninvertibleModel)?;
        Ok(Self { h: inv })
    }

    pub(crate) fn fit(&mut self, matches: &[PointMatch]) -> DescRegResult<()> {
        if matches.len() < 4 {
            return Err(DescRegError::NotEnoughDataPoints {
                needed: 4,
                got: matches.len(),
            });
        }
        let src: Vec<(f64, f64)> = matches
            .iter()
            .map(|m| (m.a.local().x, m.a.local().y))
            .collect();
        let dst: Vec<(f64, f64)> = matches
            .iter()
            .map(|m| (m.b.world().x, m.b.world().y))
            .collect();
        let ts = normalization(&src);
        let td = normalization(&dst);

        // Normal equations of the DLT system A h = 0, rows scaled by sqrt(w).
        let mut ata = SMatrix::<f64, 9, 9>::zeros();
        for ((s, d), m) in src.iter().zip(&dst).zip(matches) {
            let (x, y) = project(&ts, s.0, s.1).unwrap_or(*s);
            let (xp, yp) = project(&td, d.0, d.1).unwrap_or(*d);
            let w = m.weight;
            let r1 = [-x, -y, -1.0, 0.0, 0.0, 0.0, x * xp, y * xp, xp];
            let r2 = [0.0, 0.0, 0.0, -x, -y, -1.0, x * yp, y * yp, yp];
            for j in 0..9 {
                for k in 0..9 {
                    ata[(j, k)] += w * (r1[j] * r1[k] + r2[j] * r2[k]);
                }
            }
        }
        let eig = SymmetricEigen::new(ata);
        let smallest = eig.eigenvalues.imin();
        let v = eig.eigenvectors.column(smallest);
        let hn = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);
        let td_inv = td
            .try_inverse()
            .ok_or(DescRegError::IllDefinedData("degenerate target points"))?;
        let h = td_inv * hn * ts;
        let scale = h[(2, 2)];
        if scale.abs() < 1e-10 || h.iter().any(|v| !v.is_finite()) {
            return Err(DescRegError::IllDefinedData("degenerate homography"));
        }
        let h = h / scale;
        if h.determinant().abs() < 1e-12 {
            return Err(DescRegError::IllDefinedData("singular homography"));
        }
        self.h = h;
        Ok(())
    }
}
