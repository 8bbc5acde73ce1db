/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use serde_derive::{Deserialize, Serialize};

use crate::constants::SPEED_OF_LIGHT_KM_S;
use crate::math::{Affine2, Matrix3, Vector2, Vector3};
use crate::shape::{roche_gradient, StarShape};

/// Limb-darkening law of one star, normalized to unit intensity at the centre of
/// the disc (μ = 1).
///
/// `MuGrid` carries specific intensities tabulated on a uniform μ-grid, μ = 0 at
/// index 0 and μ = 1 at the last entry, interpolated linearly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum LimbDarkeningLaw {
    #[default]
    None,
    Linear(f64),
    Quadratic(f64, f64),
    SquareRoot(f64, f64),
    Logarithmic(f64, f64),
    /// I(μ) = 1 - c (1 - μ^α), the power-2 law of Maxted & Gill (2019)
    Power2(f64, f64),
    /// Four-parameter law of Claret (2000)
    Claret([f64; 4]),
    MuGrid(Vec<f64>),
}

impl LimbDarkeningLaw {
    /// Specific intensity at μ, with I(1) = 1
    pub fn intensity(&self, mu: f64) -> f64 {
        let mu = mu.clamp(0.0, 1.0);
        match self {
            Self::None => 1.0,
            Self::Linear(u) => 1.0 - u * (1.0 - mu),
            Self::Quadratic(u1, u2) => 1.0 - u1 * (1.0 - mu) - u2 * (1.0 - mu).powi(2),
            Self::SquareRoot(u1, u2) => 1.0 - u1 * (1.0 - mu) - u2 * (1.0 - mu.sqrt()),
            Self::Logarithmic(u1, u2) => {
                let log_term = if mu > 0.0 { mu * mu.ln() } else { 0.0 };
                1.0 - u1 * (1.0 - mu) - u2 * log_term
            }
            Self::Power2(c, alpha) => 1.0 - c * (1.0 - mu.powf(*alpha)),
            Self::Claret(a) => {
                let mut i = 1.0;
                for (k, ak) in a.iter().enumerate() {
                    i -= ak * (1.0 - mu.powf((k as f64 + 1.0) / 2.0));
                }
                i
            }
            Self::MuGrid(grid) => {
                if grid.len() < 2 {
                    return 1.0;
                }
                let last = *grid.last().unwrap();
                if last == 0.0 {
                    return 1.0;
                }
                let x = mu * (grid.len() - 1) as f64;
                let i = (x.floor() as usize).min(grid.len() - 2);
                let frac = x - i as f64;
                (grid[i] * (1.0 - frac) + grid[i + 1] * frac) / last
            }
        }
    }

    /// Reduction to an effective quadratic law by matching intensities at
    /// μ = 0, 1/2 and 1. The spot modulation kernel works in this reduced space.
    pub fn effective_quadratic(&self) -> (f64, f64) {
        match self {
            Self::None => (0.0, 0.0),
            Self::Linear(u) => (*u, 0.0),
            Self::Quadratic(u1, u2) => (*u1, *u2),
            _ => {
                let a = 1.0 - self.intensity(0.0);
                let b = 1.0 - self.intensity(0.5);
                let u1 = 4.0 * b - a;
                (u1, a - u1)
            }
        }
    }

    /// Disc-integrated intensity of the reduced quadratic law, per unit area
    /// relative to the central intensity: ∫ I(μ) dA / (π R²) for a sphere.
    pub fn quadratic_disc_mean(&self) -> f64 {
        let (u1, u2) = self.effective_quadratic();
        1.0 - u1 / 3.0 - u2 / 6.0
    }
}

/// Gravity darkening mode: the fast path evaluates the gradient of the ellipsoid
/// quadratic, the exact path the gradient of the Roche potential at the surface
/// point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GravityDarkening {
    Fast { beta: f64 },
    Exact { beta: f64, mass_ratio: f64, rotation_factor: f64 },
}

/// Irradiation ("heating") model parameters of one star. A non-positive exponent
/// disables the model at the boundary; the orchestrator then applies the simple
/// analytic reflection instead.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeatingPars {
    pub h0: f64,
    pub h1: f64,
    pub u_h: f64,
    /// Disc-mean flux of the companion relative to this star's central intensity
    pub companion_flux: f64,
    pub companion_radius: f64,
}

/// Parameter block of the surface-brightness kernel. Pure: all state needed to
/// evaluate a point travels in here, so the quadrature engine can treat the
/// integrand as a plain closure.
#[derive(Clone, Debug)]
pub struct BrightnessPars {
    pub surf_bright: f64,
    pub shape: StarShape,
    pub incl: f64,
    /// Sky position angle of the star's axis towards the companion
    pub theta: f64,
    pub separation: f64,
    pub ld: LimbDarkeningLaw,
    pub grav_dark: GravityDarkening,
    pub heating: Option<HeatingPars>,
    /// Projected spin-orbit misalignment
    pub lambda: f64,
    pub vsini_kms: f64,
    pub boost: f64,
    /// When set the kernel returns B·v_los instead of B
    pub rv_weight: bool,
    /// Rotation from the integration frame (principal axes of the projected
    /// ellipse) into sky coordinates; ignored when `region_transform` is set
    pub frame_rotation: f64,
    /// Affine map from a curvilinear integration parameterization to sky
    /// coordinates relative to the star centre; `None` outside the partial
    /// integrators
    pub region_transform: Option<Affine2>,
    m_sky: Matrix3,
    star_to_sky: Matrix3,
    g_pole: f64,
}

impl BrightnessPars {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        surf_bright: f64,
        shape: StarShape,
        incl: f64,
        theta: f64,
        separation: f64,
        ld: LimbDarkeningLaw,
        grav_dark: GravityDarkening,
        heating: Option<HeatingPars>,
        lambda: f64,
        vsini_kms: f64,
        boost: f64,
    ) -> Self {
        let [a, b, c] = shape.semi_axes;
        let (sin_th, cos_th) = theta.sin_cos();
        let (sin_i, cos_i) = incl.sin_cos();
        let rot_z = Matrix3::new(cos_th, -sin_th, 0.0, sin_th, cos_th, 0.0, 0.0, 0.0, 1.0);
        let orb2sky = Matrix3::new(1.0, 0.0, 0.0, 0.0, cos_i, -sin_i, 0.0, sin_i, cos_i);
        let star_to_sky = orb2sky * rot_z;
        let m_star =
            Matrix3::from_diagonal(&Vector3::new(a.powi(-2), b.powi(-2), c.powi(-2)));
        let m_sky = star_to_sky * m_star * star_to_sky.transpose();
        let g_pole = match grav_dark {
            GravityDarkening::Fast { .. } => 1.0 / c,
            GravityDarkening::Exact {
                mass_ratio,
                rotation_factor,
                ..
            } => roche_gradient(
                Vector3::new(shape.offset, 0.0, c),
                mass_ratio,
                separation,
                rotation_factor,
            )
            .norm(),
        };
        Self {
            surf_bright,
            shape,
            incl,
            theta,
            separation,
            ld,
            grav_dark,
            heating,
            lambda,
            vsini_kms,
            boost,
            rv_weight: false,
            frame_rotation: 0.0,
            region_transform: None,
            m_sky,
            star_to_sky,
            g_pole,
        }
    }

    /// Copy of this block evaluating B·v_los (flux-weighted radial velocity)
    pub fn rv_weighted(&self) -> Self {
        let mut out = self.clone();
        out.rv_weight = true;
        out
    }

    /// Copy of this block with the curvilinear region transform enabled
    pub fn with_region_transform(&self, t: Affine2) -> Self {
        let mut out = self.clone();
        out.region_transform = Some(t);
        out
    }

    /// Copy integrating in the principal frame of the projected ellipse
    pub fn in_principal_frame(&self, rotation: f64) -> Self {
        let mut out = self.clone();
        out.frame_rotation = rotation;
        out.region_transform = None;
        out
    }

    /// Local line-of-sight velocity (km/s) of the rotating photosphere at sky
    /// offsets (du, dv) from the star centre
    fn v_los(&self, du: f64, dv: f64) -> f64 {
        let (sin_l, cos_l) = self.lambda.sin_cos();
        self.vsini_kms * (du * cos_l + dv * sin_l) / self.shape.semi_axes[0]
    }

    /// Surface brightness at coordinates (s, t) relative to the star centre, in the
    /// integration frame selected by `region_transform` / `frame_rotation`.
    ///
    /// μ is clipped to [0, 1]; points that miss the ellipsoid (rounding at the very
    /// limb) contribute zero.
    pub fn evaluate(&self, s: f64, t: f64) -> f64 {
        let (du, dv) = match &self.region_transform {
            Some(tr) => {
                let p = tr.apply(Vector2::new(s, t));
                (p[0], p[1])
            }
            None => {
                let (sin_r, cos_r) = self.frame_rotation.sin_cos();
                (s * cos_r - t * sin_r, s * sin_r + t * cos_r)
            }
        };

        // Surface point below (du, dv): near root in w of the sky-frame quadric
        let m = &self.m_sky;
        let qa = m[(2, 2)];
        let qb = 2.0 * (m[(0, 2)] * du + m[(1, 2)] * dv);
        let qc = m[(0, 0)] * du * du + 2.0 * m[(0, 1)] * du * dv + m[(1, 1)] * dv * dv - 1.0;
        let disc = qb * qb - 4.0 * qa * qc;
        if disc < 0.0 {
            return 0.0;
        }
        let w = (-qb + disc.sqrt()) / (2.0 * qa);
        let x_sky = Vector3::new(du, dv, w);

        let normal_sky = m * x_sky;
        let mu = (normal_sky[2] / normal_sky.norm()).clamp(0.0, 1.0);

        let mut bright = self.surf_bright * self.ld.intensity(mu);

        // Gravity darkening relative to the pole
        let x_star = self.star_to_sky.transpose() * x_sky;
        bright *= match self.grav_dark {
            GravityDarkening::Fast { beta } => {
                let [a, b, c] = self.shape.semi_axes;
                let g = Vector3::new(
                    x_star[0] / (a * a),
                    x_star[1] / (b * b),
                    x_star[2] / (c * c),
                )
                .norm();
                (g / self.g_pole).powf(beta)
            }
            GravityDarkening::Exact {
                beta,
                mass_ratio,
                rotation_factor,
            } => {
                let x_roche = Vector3::new(
                    x_star[0] + self.shape.offset,
                    x_star[1],
                    x_star[2],
                );
                let g = roche_gradient(x_roche, mass_ratio, self.separation, rotation_factor)
                    .norm();
                (g / self.g_pole).powf(beta)
            }
        };

        // Irradiation by the companion
        if let Some(heat) = &self.heating {
            let to_comp = Vector3::new(
                self.separation - self.shape.offset - x_star[0],
                -x_star[1],
                -x_star[2],
            );
            let dist = to_comp.norm();
            let [a, b, c] = self.shape.semi_axes;
            let n_star = Vector3::new(
                x_star[0] / (a * a),
                x_star[1] / (b * b),
                x_star[2] / (c * c),
            )
            .normalize();
            let cos_gamma = (n_star.dot(&to_comp) / dist).max(0.0);
            bright *= 1.0
                + heat.h0
                    * heat.companion_flux
                    * (heat.companion_radius / dist).powi(2)
                    * cos_gamma.powf(heat.h1)
                    * (1.0 - heat.u_h * (1.0 - mu));
        }

        let v_los = self.v_los(du, dv);
        bright *= 1.0 - self.boost * v_los / SPEED_OF_LIGHT_KM_S;

        if self.rv_weight {
            bright * v_los
        } else {
            bright
        }
    }
}

#[cfg(test)]
mod ut_brightness {
    use super::*;
    use crate::math::quadrature::ellgauss;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sphere_pars(ld: LimbDarkeningLaw) -> BrightnessPars {
        BrightnessPars::new(
            1.0,
            StarShape::sphere(0.1),
            FRAC_PI_2,
            FRAC_PI_2,
            1.0,
            ld,
            GravityDarkening::Fast { beta: 0.0 },
            None,
            0.0,
            0.0,
            0.0,
        )
    }

    #[test]
    fn center_of_disc_is_unity() {
        let pars = sphere_pars(LimbDarkeningLaw::Linear(0.6));
        assert_relative_eq!(pars.evaluate(0.0, 0.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn limb_follows_the_law() {
        let pars = sphere_pars(LimbDarkeningLaw::Linear(0.6));
        // 99.99% of the radius out: μ ≈ 0
        let b = pars.evaluate(0.1 * (1.0 - 1e-8), 0.0);
        assert_relative_eq!(b, 0.4, epsilon = 1e-3);
    }

    #[test]
    fn linear_disc_flux_matches_closed_form() {
        // ∫ I dA = π R² (1 - u/3) for the linear law on a sphere
        let pars = sphere_pars(LimbDarkeningLaw::Linear(1.0));
        let flux = ellgauss(0.1, 0.1, 48, |s, t| pars.evaluate(s, t));
        let want = PI * 0.01 * (1.0 - 1.0 / 3.0);
        assert_relative_eq!(flux, want, max_relative = 1e-3);
    }

    #[test]
    fn uniform_mu_grid_matches_linear_unit_law() {
        let grid: Vec<f64> = (0..101).map(|i| i as f64 / 100.0).collect();
        let tab = sphere_pars(LimbDarkeningLaw::MuGrid(grid));
        let lin = sphere_pars(LimbDarkeningLaw::Linear(1.0));
        for i in 0..50 {
            let s = 0.1 * (i as f64) / 50.0;
            assert_relative_eq!(tab.evaluate(s, 0.01), lin.evaluate(s, 0.01), epsilon = 1e-10);
        }
    }

    #[test]
    fn effective_quadratic_reproduces_anchor_points() {
        let law = LimbDarkeningLaw::Power2(0.7, 0.6);
        let (u1, u2) = law.effective_quadratic();
        let quad = LimbDarkeningLaw::Quadratic(u1, u2);
        for mu in [0.0, 0.5, 1.0] {
            assert_relative_eq!(law.intensity(mu), quad.intensity(mu), epsilon = 1e-12);
        }
    }

    #[test]
    fn rv_weighting_is_antisymmetric() {
        let mut pars = sphere_pars(LimbDarkeningLaw::Linear(0.5));
        pars.vsini_kms = 50.0;
        let rvp = pars.rv_weighted();
        let plus = rvp.evaluate(0.05, 0.02);
        let minus = rvp.evaluate(-0.05, 0.02);
        assert_relative_eq!(plus, -minus, max_relative = 1e-9);
    }

    #[test]
    fn misses_outside_the_silhouette() {
        let pars = sphere_pars(LimbDarkeningLaw::None);
        assert_eq!(pars.evaluate(0.2, 0.0), 0.0);
    }
}
