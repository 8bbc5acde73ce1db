/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use std::f64::consts::PI;

use crate::errors::{GeomResult, GeometryError};
use crate::math::{roots::quadratic_roots, Affine2, Matrix3, Vector2, Vector3};

/// Coefficients of the implicit quadratic form `A x² + B x y + C y² + D x + E y + F = 0`.
/// Canonically scaled so that the form is negative inside the ellipse.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuadCoeffs {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl QuadCoeffs {
    pub fn evaluate(&self, p: Vector2) -> f64 {
        (self.a * p[0] + self.b * p[1] + self.d) * p[0] + (self.c * p[1] + self.e) * p[1] + self.f
    }

    /// Symmetric homogeneous 3×3 matrix of the conic
    pub fn homogeneous(&self) -> Matrix3 {
        Matrix3::new(
            self.a,
            0.5 * self.b,
            0.5 * self.d,
            0.5 * self.b,
            self.c,
            0.5 * self.e,
            0.5 * self.d,
            0.5 * self.e,
            self.f,
        )
    }
}

/// A sky-plane ellipse carrying both the geometric parameterization (semi-axes,
/// centre, rotation) and the implicit quadratic form. Mutators keep the two
/// representations coherent; `area` is always `π a_p b_p`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ellipse {
    pub semi_major: f64,
    pub semi_minor: f64,
    pub center: Vector2,
    pub rotation: f64,
    pub area: f64,
    pub coeffs: QuadCoeffs,
}

impl Ellipse {
    pub fn new(
        semi_major: f64,
        semi_minor: f64,
        center: Vector2,
        rotation: f64,
    ) -> GeomResult<Self> {
        if semi_major <= 0.0 || semi_minor <= 0.0 {
            return Err(GeometryError::DegenerateEllipse {
                semi_major,
                semi_minor,
            });
        }
        let (sin_phi, cos_phi) = rotation.sin_cos();
        let (ia2, ib2) = (semi_major.powi(-2), semi_minor.powi(-2));
        // M = R(φ) diag(1/a², 1/b²) R(φ)ᵀ
        let m00 = cos_phi * cos_phi * ia2 + sin_phi * sin_phi * ib2;
        let m01 = sin_phi * cos_phi * (ia2 - ib2);
        let m11 = sin_phi * sin_phi * ia2 + cos_phi * cos_phi * ib2;
        let (cx, cy) = (center[0], center[1]);
        let coeffs = QuadCoeffs {
            a: m00,
            b: 2.0 * m01,
            c: m11,
            d: -2.0 * (m00 * cx + m01 * cy),
            e: -2.0 * (m01 * cx + m11 * cy),
            f: m00 * cx * cx + 2.0 * m01 * cx * cy + m11 * cy * cy - 1.0,
        };
        Ok(Self {
            semi_major,
            semi_minor,
            center,
            rotation,
            area: PI * semi_major * semi_minor,
            coeffs,
        })
    }

    pub fn circle(radius: f64, center: Vector2) -> GeomResult<Self> {
        Self::new(radius, radius, center, 0.0)
    }

    /// Recovers the geometric parameterization from an implicit quadratic form.
    /// The coefficients are re-canonicalized, so the two representations agree to
    /// machine precision afterwards.
    pub fn from_coeffs(raw: QuadCoeffs) -> GeomResult<Self> {
        let mut q = raw;
        // Positive-definite orientation
        if q.a + q.c < 0.0 {
            q = QuadCoeffs {
                a: -q.a,
                b: -q.b,
                c: -q.c,
                d: -q.d,
                e: -q.e,
                f: -q.f,
            };
        }
        let det = q.a * q.c - 0.25 * q.b * q.b;
        if det <= 0.0 {
            return Err(GeometryError::NotAnEllipse { discriminant: det });
        }
        // Centre solves 2M c = -(D, E)
        let cx = (0.25 * q.b * q.e - 0.5 * q.c * q.d) / det;
        let cy = (0.25 * q.b * q.d - 0.5 * q.a * q.e) / det;
        let f0 = q.f + 0.5 * (q.d * cx + q.e * cy);
        if f0 >= 0.0 {
            return Err(GeometryError::NotAnEllipse { discriminant: f0 });
        }
        let phi = 0.5 * q.b.atan2(q.a - q.c);
        let (sin_phi, cos_phi) = phi.sin_cos();
        let lam1 = (q.a * cos_phi * cos_phi + q.b * sin_phi * cos_phi + q.c * sin_phi * sin_phi)
            / (-f0);
        let lam2 = (q.a * sin_phi * sin_phi - q.b * sin_phi * cos_phi + q.c * cos_phi * cos_phi)
            / (-f0);
        if lam1 <= 0.0 || lam2 <= 0.0 {
            return Err(GeometryError::NotAnEllipse { discriminant: det });
        }
        let (r_phi, r_perp) = (lam1.sqrt().recip(), lam2.sqrt().recip());
        let (semi_major, semi_minor, mut rotation) = if r_phi >= r_perp {
            (r_phi, r_perp, phi)
        } else {
            (r_perp, r_phi, phi + 0.5 * PI)
        };
        rotation = rotation.rem_euclid(PI);
        Self::new(semi_major, semi_minor, Vector2::new(cx, cy), rotation)
    }

    /// Orthographic projection of a triaxial ellipsoid onto the plane of the sky,
    /// centred at the origin. `theta` is the sky position angle of the star's
    /// x-axis (towards the companion), `incl` the orbital inclination.
    ///
    /// Spheres skip the projection machinery: the silhouette is the canonical
    /// circle and the quadric partition below is numerically degenerate there.
    pub fn project_ellipsoid(semi_axes: [f64; 3], theta: f64, incl: f64) -> GeomResult<Self> {
        let [a, b, c] = semi_axes;
        if (a - b).abs() < 1e-12 * a && (a - c).abs() < 1e-12 * a {
            return Self::circle(a, Vector2::zeros());
        }
        let (sin_th, cos_th) = theta.sin_cos();
        let (sin_i, cos_i) = incl.sin_cos();
        let rot_z = Matrix3::new(cos_th, -sin_th, 0.0, sin_th, cos_th, 0.0, 0.0, 0.0, 1.0);
        let orb2sky = Matrix3::new(1.0, 0.0, 0.0, 0.0, cos_i, -sin_i, 0.0, sin_i, cos_i);
        let l = orb2sky * rot_z;
        let m_star = Matrix3::from_diagonal(&Vector3::new(
            a.powi(-2),
            b.powi(-2),
            c.powi(-2),
        ));
        let m_sky = l * m_star * l.transpose();

        // Silhouette along the w-axis: Schur complement of the (w,w) entry
        let m33 = m_sky[(2, 2)];
        let p = Vector2::new(m_sky[(0, 2)], m_sky[(1, 2)]);
        let b2_00 = m_sky[(0, 0)] - p[0] * p[0] / m33;
        let b2_01 = m_sky[(0, 1)] - p[0] * p[1] / m33;
        let b2_11 = m_sky[(1, 1)] - p[1] * p[1] / m33;
        Self::from_coeffs(QuadCoeffs {
            a: b2_00,
            b: 2.0 * b2_01,
            c: b2_11,
            d: 0.0,
            e: 0.0,
            f: -1.0,
        })
    }

    /// Moves the centre by `delta`, regenerating the quadratic form
    pub fn translated(&self, delta: Vector2) -> Self {
        // new() cannot fail here: the axes are unchanged
        Self::new(
            self.semi_major,
            self.semi_minor,
            self.center + delta,
            self.rotation,
        )
        .unwrap_or(*self)
    }

    /// Applies a 2×3 affine transform to both the centre and the quadratic form
    pub fn transformed(&self, t: &Affine2) -> GeomResult<Self> {
        let h_inv = t.inverse()?.homogeneous();
        let q = h_inv.transpose() * self.coeffs.homogeneous() * h_inv;
        Self::from_coeffs(QuadCoeffs {
            a: q[(0, 0)],
            b: 2.0 * q[(0, 1)],
            c: q[(1, 1)],
            d: 2.0 * q[(0, 2)],
            e: 2.0 * q[(1, 2)],
            f: q[(2, 2)],
        })
    }

    /// Parameter values where the line `origin + t · dir` crosses the ellipse,
    /// ascending; `None` when the roots are complex (no crossing).
    pub fn line_intersections(&self, origin: Vector2, dir: Vector2) -> Option<(f64, f64)> {
        let q = &self.coeffs;
        let qa = q.a * dir[0] * dir[0] + q.b * dir[0] * dir[1] + q.c * dir[1] * dir[1];
        let qb = 2.0 * q.a * origin[0] * dir[0]
            + q.b * (origin[0] * dir[1] + origin[1] * dir[0])
            + 2.0 * q.c * origin[1] * dir[1]
            + q.d * dir[0]
            + q.e * dir[1];
        let qc = q.evaluate(origin);
        quadratic_roots(qa, qb, qc)
    }

    /// Sign test of the implicit form: true strictly inside
    pub fn contains(&self, p: Vector2) -> bool {
        self.coeffs.evaluate(p) < 0.0
    }

    /// Point on the ellipse at parametric angle `psi` (principal-frame angle)
    pub fn point_at(&self, psi: f64) -> Vector2 {
        let (sin_phi, cos_phi) = self.rotation.sin_cos();
        let (x, y) = (self.semi_major * psi.cos(), self.semi_minor * psi.sin());
        self.center + Vector2::new(x * cos_phi - y * sin_phi, x * sin_phi + y * cos_phi)
    }

    /// Principal-frame parametric angle of a point (meaningful on the boundary)
    pub fn param_of(&self, p: Vector2) -> f64 {
        let (sin_phi, cos_phi) = self.rotation.sin_cos();
        let d = p - self.center;
        let x = d[0] * cos_phi + d[1] * sin_phi;
        let y = -d[0] * sin_phi + d[1] * cos_phi;
        (y / self.semi_minor).atan2(x / self.semi_major)
    }
}

#[cfg(test)]
mod ut_ellipse {
    use super::*;
    use approx::assert_relative_eq;

    fn coherent(e: &Ellipse) {
        // boundary points satisfy the implicit form
        for i in 0..16 {
            let p = e.point_at(2.0 * PI * i as f64 / 16.0);
            assert!(e.coeffs.evaluate(p).abs() < 1e-10, "at {p:?}");
        }
        assert_relative_eq!(e.area, PI * e.semi_major * e.semi_minor, epsilon = 1e-14);
    }

    #[test]
    fn representations_stay_coherent() {
        let e = Ellipse::new(2.0, 0.7, Vector2::new(1.5, -0.3), 0.6).unwrap();
        coherent(&e);
        let back = Ellipse::from_coeffs(e.coeffs).unwrap();
        assert_relative_eq!(back.semi_major, e.semi_major, epsilon = 1e-12);
        assert_relative_eq!(back.semi_minor, e.semi_minor, epsilon = 1e-12);
        assert!((back.center - e.center).norm() < 1e-12);
    }

    #[test]
    fn translation_regenerates_the_form() {
        let e = Ellipse::new(1.0, 0.5, Vector2::zeros(), 0.3).unwrap();
        let moved = e.translated(Vector2::new(2.0, -1.0));
        coherent(&moved);
        assert!((moved.center - Vector2::new(2.0, -1.0)).norm() < 1e-14);
    }

    #[test]
    fn affine_scaling_scales_axes() {
        let e = Ellipse::new(1.0, 0.5, Vector2::new(1.0, 0.0), 0.0).unwrap();
        let t = crate::math::Affine2::scaling(2.0);
        let s = e.transformed(&t).unwrap();
        coherent(&s);
        assert_relative_eq!(s.semi_major, 2.0, epsilon = 1e-12);
        assert_relative_eq!(s.semi_minor, 1.0, epsilon = 1e-12);
        assert!((s.center - Vector2::new(2.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn sphere_projects_to_circle() {
        let e = Ellipse::project_ellipsoid([0.1, 0.1, 0.1], 0.7, 1.2).unwrap();
        assert_relative_eq!(e.semi_major, 0.1, epsilon = 1e-14);
        assert_relative_eq!(e.semi_minor, 0.1, epsilon = 1e-14);
    }

    #[test]
    fn edge_on_conjunction_projects_b_and_c() {
        // i = 90°, star axis along the line of sight: silhouette axes are (B, C)
        let e = Ellipse::project_ellipsoid([0.32, 0.30, 0.28], 0.5 * PI, 0.5 * PI).unwrap();
        coherent(&e);
        assert_relative_eq!(e.semi_major, 0.30, epsilon = 1e-12);
        assert_relative_eq!(e.semi_minor, 0.28, epsilon = 1e-12);
    }

    #[test]
    fn quadrature_phase_projects_a_and_c() {
        // i = 90°, star axis in the sky plane: silhouette axes are (A, C)
        let e = Ellipse::project_ellipsoid([0.32, 0.30, 0.28], 0.0, 0.5 * PI).unwrap();
        assert_relative_eq!(e.semi_major, 0.32, epsilon = 1e-12);
        assert_relative_eq!(e.semi_minor, 0.28, epsilon = 1e-12);
    }

    #[test]
    fn line_intersections_of_circle() {
        let e = Ellipse::circle(1.0, Vector2::zeros()).unwrap();
        let (t1, t2) = e
            .line_intersections(Vector2::new(-2.0, 0.0), Vector2::new(1.0, 0.0))
            .unwrap();
        assert_relative_eq!(t1, 1.0, epsilon = 1e-12);
        assert_relative_eq!(t2, 3.0, epsilon = 1e-12);
        assert!(e
            .line_intersections(Vector2::new(-2.0, 1.5), Vector2::new(1.0, 0.0))
            .is_none());
    }

    #[test]
    fn containment_sign() {
        let e = Ellipse::new(2.0, 1.0, Vector2::new(0.5, 0.5), 0.25).unwrap();
        assert!(e.contains(e.center));
        assert!(!e.contains(e.center + Vector2::new(5.0, 0.0)));
    }
}
