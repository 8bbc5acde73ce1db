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

use serde_derive::{Deserialize, Serialize};

use crate::constants::tolerances::VOLUME_REL_TOL;
use crate::errors::{MathError, ShapeError, ShapeResult};
use crate::math::{roots::bracketed_root, Vector3};

/// Fluid Love number of an n = 3/2 polytrope, from the apsidal motion constant
/// k₂ = 0.14327 of Brooker & Olle (1955): h_f = 1 + 2k₂.
pub const POLY1P5_LOVE: f64 = 1.28654;
/// Fluid Love number of an n = 3 polytrope (k₂ = 0.014425)
pub const POLY3P0_LOVE: f64 = 1.02885;

/// Shape model of one star. All models approximate the star as a triaxial
/// ellipsoid with semi-axes (A, B, C) in units of the orbital semi-major axis and
/// an offset D of the geometric centre from the mass centre along the line of
/// centres.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeModel {
    #[default]
    Sphere,
    /// Roche equipotential matched to the volume radius at periastron; the surface
    /// potential is then held fixed around an eccentric orbit, so the volume varies.
    Roche,
    /// Roche equipotential re-solved at every separation so the volume is conserved
    RocheV,
    /// Linear tidal + rotational response of a fluid body with Love number h_f
    Love,
    /// Love shape with the h_f of an n = 3/2 polytrope
    Poly1p5,
    /// Love shape with the h_f of an n = 3 polytrope
    Poly3p0,
}

/// Semi-axes (units of the semi-major axis) and centre offset of the approximating
/// ellipsoid. `potential` is populated for the Roche flavours so eccentric-orbit
/// updates can hold the surface potential fixed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StarShape {
    pub semi_axes: [f64; 3],
    pub offset: f64,
    pub potential: Option<f64>,
}

impl StarShape {
    pub fn sphere(radius: f64) -> Self {
        Self {
            semi_axes: [radius; 3],
            offset: 0.0,
            potential: None,
        }
    }

    pub fn volume(&self) -> f64 {
        4.0 / 3.0 * PI * self.semi_axes[0] * self.semi_axes[1] * self.semi_axes[2]
    }

    /// Local radius of the ellipsoid along the unit direction `n` (star frame, from
    /// the geometric centre)
    pub fn radius_towards(&self, n: Vector3) -> f64 {
        let [a, b, c] = self.semi_axes;
        1.0 / ((n[0] / a).powi(2) + (n[1] / b).powi(2) + (n[2] / c).powi(2)).sqrt()
    }
}

/// Dimensionless Roche potential at (x, y, z), lengths in units of the semi-major
/// axis, x towards the companion from the mass centre of the star under study.
/// `mass_ratio` is companion over self; `separation` the instantaneous separation;
/// `f_rot` the asynchronous rotation factor.
pub fn roche_potential(p: Vector3, mass_ratio: f64, separation: f64, f_rot: f64) -> f64 {
    let (x, y, z) = (p[0], p[1], p[2]);
    let rho = (x * x + y * y + z * z).sqrt();
    let rho_c = ((x - separation).powi(2) + y * y + z * z).sqrt();
    1.0 / rho + mass_ratio * (1.0 / rho_c - x / (separation * separation))
        + 0.5 * (1.0 + mass_ratio) * f_rot * f_rot * (x * x + y * y)
}

/// Gradient of [roche_potential]; the exact gravity-darkening mode uses its norm as
/// the local effective gravity.
pub fn roche_gradient(p: Vector3, mass_ratio: f64, separation: f64, f_rot: f64) -> Vector3 {
    let (x, y, z) = (p[0], p[1], p[2]);
    let rho3 = (x * x + y * y + z * z).sqrt().powi(3);
    let rho_c3 = ((x - separation).powi(2) + y * y + z * z).sqrt().powi(3);
    let cf = (1.0 + mass_ratio) * f_rot * f_rot;
    Vector3::new(
        -x / rho3
            + mass_ratio * (-(x - separation) / rho_c3 - 1.0 / (separation * separation))
            + cf * x,
        -y / rho3 - mass_ratio * y / rho_c3 + cf * y,
        -z / rho3 - mass_ratio * z / rho_c3,
    )
}

/// Distance of the first Lagrangian point from the centre of the star under study,
/// at unit separation. Sets the hard cap on the fractional radius.
pub fn l1_radius(mass_ratio: f64, f_rot: f64) -> ShapeResult<f64> {
    l1_at(mass_ratio, f_rot, 1.0)
}

/// L1 distance at an arbitrary separation; the spin term does not scale with the
/// separation, so this is not simply `d · l1_radius`
fn l1_at(mass_ratio: f64, f_rot: f64, d: f64) -> ShapeResult<f64> {
    let g = |x: f64| {
        -1.0 / (x * x)
            + mass_ratio * (1.0 / ((d - x) * (d - x)) - 1.0 / (d * d))
            + (1.0 + mass_ratio) * f_rot * f_rot * x
    };
    bracketed_root(g, 1e-6 * d, d * (1.0 - 1e-6), 1e-13, "locating the L1 point")
        .map_err(|source| ShapeError::ShapeMath { source })
}

/// One star's shape configuration. `mass_ratio` is companion mass over this star's
/// mass (the orchestrator inverts q for star 2).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShapeConfig {
    pub model: ShapeModel,
    /// Volume radius in units of the semi-major axis
    pub radius: f64,
    pub mass_ratio: f64,
    pub rotation_factor: f64,
    pub love_number: f64,
}

impl ShapeConfig {
    /// Solves the ellipsoid at the given separation such that its volume equals that
    /// of a sphere with the configured volume radius, to within `VOLUME_REL_TOL`.
    pub fn solve_at(&self, separation: f64) -> ShapeResult<StarShape> {
        if self.radius <= 0.0 {
            return Err(ShapeError::ShapeMath {
                source: MathError::DomainError {
                    value: self.radius,
                    msg: "fractional radius must be positive",
                },
            });
        }
        match self.model {
            ShapeModel::Sphere => Ok(StarShape::sphere(self.radius)),
            ShapeModel::Roche | ShapeModel::RocheV => self.solve_roche_volume(separation),
            ShapeModel::Love => self.solve_love(separation, self.love_number),
            ShapeModel::Poly1p5 => self.solve_love(separation, POLY1P5_LOVE),
            ShapeModel::Poly3p0 => self.solve_love(separation, POLY3P0_LOVE),
        }
    }

    /// Re-evaluates a previously solved shape at a new separation (eccentric orbits).
    /// `Roche` holds the surface potential found at the reference separation; every
    /// other model conserves the star volume.
    pub fn update(&self, prev: &StarShape, separation: f64) -> ShapeResult<StarShape> {
        match self.model {
            ShapeModel::Sphere => Ok(*prev),
            ShapeModel::Roche => {
                let pot = prev.potential.ok_or(ShapeError::NonConvergent {
                    action: "updating a Roche shape with no reference potential",
                })?;
                self.axes_at_potential(pot, separation)
            }
            _ => self.solve_at(separation),
        }
    }

    fn solve_love(&self, separation: f64, h_f: f64) -> ShapeResult<StarShape> {
        if !(0.0..=2.5).contains(&h_f) {
            return Err(ShapeError::LoveNumberOutOfRange { h_f });
        }
        let r = self.radius;
        let tide = self.mass_ratio * (r / separation).powi(3);
        let spin = self.rotation_factor.powi(2) * (1.0 + self.mass_ratio) * r.powi(3);
        let a = 1.0 + h_f * (tide + spin / 6.0);
        let b = 1.0 + h_f * (-0.5 * tide + spin / 6.0);
        let c = 1.0 + h_f * (-0.5 * tide - spin / 3.0);
        if b <= 0.0 || c <= 0.0 {
            return Err(ShapeError::NonConvergent {
                action: "solving the Love-number ellipsoid (distortion too large)",
            });
        }
        // Cube-root rescale pins the volume exactly
        let s = (a * b * c).powf(-1.0 / 3.0);
        Ok(StarShape {
            semi_axes: [r * s * a, r * s * b, r * s * c],
            offset: 0.0,
            potential: None,
        })
    }

    /// Semi-axes of the Roche equipotential at the given surface potential:
    /// sub-stellar and anti-stellar x-extents define A and the centre offset D, then
    /// B and C follow on the perpendicular axes through the centre.
    fn axes_at_potential(&self, pot: f64, separation: f64) -> ShapeResult<StarShape> {
        let q = self.mass_ratio;
        let f = self.rotation_factor;
        let d = separation;
        let on_axis = |x: f64| roche_potential(Vector3::new(x, 0.0, 0.0), q, d, f) - pot;

        let x_l1 = l1_at(q, f, d)?;
        if on_axis(x_l1 * (1.0 - 1e-9)) > 0.0 {
            return Err(ShapeError::NonConvergent {
                action: "surface potential below the L1 potential (lobe overflow)",
            });
        }
        let x_plus = bracketed_root(on_axis, 1e-8, x_l1 * (1.0 - 1e-9), 1e-14, "sub-stellar extent")
            .map_err(|source| ShapeError::ShapeMath { source })?;
        let x_minus = -bracketed_root(
            |s| roche_potential(Vector3::new(-s, 0.0, 0.0), q, d, f) - pot,
            1e-8,
            d,
            1e-14,
            "anti-stellar extent",
        )
        .map_err(|source| ShapeError::ShapeMath { source })?;

        let a = 0.5 * (x_plus - x_minus);
        let offset = 0.5 * (x_plus + x_minus);

        let b = bracketed_root(
            |y| roche_potential(Vector3::new(offset, y, 0.0), q, d, f) - pot,
            1e-8,
            1.5 * a,
            1e-14,
            "equatorial semi-axis",
        )
        .map_err(|source| ShapeError::ShapeMath { source })?;
        let c = bracketed_root(
            |z| roche_potential(Vector3::new(offset, 0.0, z), q, d, f) - pot,
            1e-8,
            1.5 * a,
            1e-14,
            "polar semi-axis",
        )
        .map_err(|source| ShapeError::ShapeMath { source })?;

        Ok(StarShape {
            semi_axes: [a, b, c],
            offset,
            potential: Some(pot),
        })
    }

    /// One-parameter search on the surface potential until the ellipsoid volume
    /// matches the volume radius. The volume is strictly decreasing in the
    /// potential, so a bisection between the L1 potential and a deep interior value
    /// always brackets the solution for radii inside the lobe.
    fn solve_roche_volume(&self, separation: f64) -> ShapeResult<StarShape> {
        let q = self.mass_ratio;
        let f = self.rotation_factor;
        let d = separation;
        let target = 4.0 / 3.0 * PI * self.radius.powi(3);

        let x_l1 = l1_at(q, f, d)?;
        if self.radius >= x_l1 {
            return Err(ShapeError::RadiusExceedsRocheLobe {
                radius: self.radius,
                limit: x_l1,
            });
        }
        let mut pot_lo = roche_potential(Vector3::new(x_l1 * (1.0 - 1e-6), 0.0, 0.0), q, d, f);
        let mut pot_hi = roche_potential(Vector3::new(self.radius * 0.05, 0.0, 0.0), q, d, f);

        let mut shape = None;
        for _ in 0..200 {
            let pot = 0.5 * (pot_lo + pot_hi);
            let trial = self.axes_at_potential(pot, d)?;
            let vol = trial.volume();
            if ((vol - target) / target).abs() < VOLUME_REL_TOL {
                shape = Some(trial);
                break;
            }
            if vol > target {
                // star too large: raise the potential
                pot_lo = pot;
            } else {
                pot_hi = pot;
            }
        }
        shape.ok_or(ShapeError::NonConvergent {
            action: "matching the ellipsoid volume to the volume radius",
        })
    }
}

#[cfg(test)]
mod ut_shape {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn l1_symmetric_twins() {
        // Equal masses, synchronous: L1 sits exactly halfway
        let x = l1_radius(1.0, 1.0).unwrap();
        assert_relative_eq!(x, 0.5, epsilon = 1e-10);
    }

    #[rstest]
    #[case(ShapeModel::RocheV, 0.2, 0.7)]
    #[case(ShapeModel::Roche, 0.15, 1.3)]
    #[case(ShapeModel::Love, 0.1, 1.0)]
    #[case(ShapeModel::Poly1p5, 0.25, 0.5)]
    fn volume_invariant(#[case] model: ShapeModel, #[case] radius: f64, #[case] q: f64) {
        let cfg = ShapeConfig {
            model,
            radius,
            mass_ratio: q,
            rotation_factor: 1.0,
            love_number: 1.5,
        };
        let shape = cfg.solve_at(1.0).unwrap();
        let target = 4.0 / 3.0 * PI * radius.powi(3);
        assert_relative_eq!(shape.volume(), target, max_relative = 2e-6);
    }

    #[test]
    fn small_star_is_nearly_spherical() {
        let cfg = ShapeConfig {
            model: ShapeModel::RocheV,
            radius: 0.01,
            mass_ratio: 1.0,
            rotation_factor: 1.0,
            love_number: 0.0,
        };
        let shape = cfg.solve_at(1.0).unwrap();
        for ax in shape.semi_axes {
            assert_relative_eq!(ax, 0.01, max_relative = 1e-4);
        }
        assert!(shape.offset.abs() < 1e-5);
    }

    #[test]
    fn roche_is_elongated_towards_companion() {
        let cfg = ShapeConfig {
            model: ShapeModel::RocheV,
            radius: 0.3,
            mass_ratio: 1.0,
            rotation_factor: 1.0,
            love_number: 0.0,
        };
        let shape = cfg.solve_at(1.0).unwrap();
        let [a, b, c] = shape.semi_axes;
        assert!(a > b && b > c, "axes {:?}", shape.semi_axes);
        assert!(shape.offset > 0.0);
    }

    #[test]
    fn love_zero_is_a_sphere() {
        let cfg = ShapeConfig {
            model: ShapeModel::Love,
            radius: 0.2,
            mass_ratio: 0.5,
            rotation_factor: 1.0,
            love_number: 0.0,
        };
        let shape = cfg.solve_at(1.0).unwrap();
        for ax in shape.semi_axes {
            assert_relative_eq!(ax, 0.2, epsilon = 1e-14);
        }
    }

    #[test]
    fn love_number_range_is_enforced() {
        let cfg = ShapeConfig {
            model: ShapeModel::Love,
            radius: 0.2,
            mass_ratio: 0.5,
            rotation_factor: 1.0,
            love_number: 2.6,
        };
        assert!(matches!(
            cfg.solve_at(1.0),
            Err(ShapeError::LoveNumberOutOfRange { .. })
        ));
    }

    #[test]
    fn fixed_potential_update_preserves_potential_not_volume() {
        let cfg = ShapeConfig {
            model: ShapeModel::Roche,
            radius: 0.25,
            mass_ratio: 1.0,
            rotation_factor: 1.0,
            love_number: 0.0,
        };
        let at_peri = cfg.solve_at(0.7).unwrap();
        let wider = cfg.update(&at_peri, 1.3).unwrap();
        assert_eq!(at_peri.potential, wider.potential);
        // weaker tide at wider separation: the star relaxes and shrinks
        assert!(wider.volume() < at_peri.volume());
    }
}
