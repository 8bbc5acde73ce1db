/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use crate::errors::{GeomResult, GeometryError};

// Vector2 is nalgebra's Vector2 with a 64-bit floating point representation.
pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix2 = nalgebra::Matrix2<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

pub mod quadrature;
pub mod roots;

use std::f64::consts::TAU;

/// Returns the provided angle bounded between 0 and 2π.
pub fn wrap_two_pi(angle_rad: f64) -> f64 {
    angle_rad.rem_euclid(TAU)
}

/// A two-dimensional affine transform `p ↦ L p + t` on sky-plane coordinates.
///
/// The partial-eclipse integrators use this to parameterize curvilinear regions:
/// the quadrature runs over chord-aligned coordinates and the brightness kernel
/// receives the transform to recover sky coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine2 {
    pub linear: Matrix2,
    pub translation: Vector2,
}

impl Affine2 {
    pub fn identity() -> Self {
        Self {
            linear: Matrix2::identity(),
            translation: Vector2::zeros(),
        }
    }

    /// Builds the transform from an orthonormal basis (columns) and an origin.
    pub fn from_basis(e1: Vector2, e2: Vector2, origin: Vector2) -> Self {
        Self {
            linear: Matrix2::from_columns(&[e1, e2]),
            translation: origin,
        }
    }

    /// Builds a pure rotation about the origin.
    pub fn rotation(angle_rad: f64) -> Self {
        let (s, c) = angle_rad.sin_cos();
        Self {
            linear: Matrix2::new(c, -s, s, c),
            translation: Vector2::zeros(),
        }
    }

    /// Builds a uniform scaling about the origin.
    pub fn scaling(factor: f64) -> Self {
        Self {
            linear: Matrix2::identity() * factor,
            translation: Vector2::zeros(),
        }
    }

    pub fn apply(&self, p: Vector2) -> Vector2 {
        self.linear * p + self.translation
    }

    /// Returns `self ∘ other`, the transform applying `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            linear: self.linear * other.linear,
            translation: self.linear * other.translation + self.translation,
        }
    }

    pub fn inverse(&self) -> GeomResult<Self> {
        let det = self.linear.determinant();
        let inv = self
            .linear
            .try_inverse()
            .ok_or(GeometryError::SingularTransform { det })?;
        Ok(Self {
            linear: inv,
            translation: -(inv * self.translation),
        })
    }

    /// Homogeneous 3×3 form, last row (0, 0, 1)
    pub fn homogeneous(&self) -> Matrix3 {
        let l = &self.linear;
        let t = &self.translation;
        Matrix3::new(
            l[(0, 0)],
            l[(0, 1)],
            t[0],
            l[(1, 0)],
            l[(1, 1)],
            t[1],
            0.0,
            0.0,
            1.0,
        )
    }
}

#[cfg(test)]
mod ut_affine {
    use super::*;

    #[test]
    fn compose_then_invert_is_identity() {
        let t = Affine2::rotation(0.7)
            .compose(&Affine2::scaling(2.5))
            .compose(&Affine2 {
                linear: Matrix2::identity(),
                translation: Vector2::new(1.0, -3.0),
            });
        let p = Vector2::new(0.3, -0.2);
        let q = t.inverse().unwrap().apply(t.apply(p));
        assert!((q - p).norm() < 1e-13);
    }

    #[test]
    fn wrap_stays_in_range() {
        assert!((wrap_two_pi(-0.1) - (TAU - 0.1)).abs() < 1e-15);
        assert!((wrap_two_pi(TAU + 0.25) - 0.25).abs() < 1e-14);
    }
}
