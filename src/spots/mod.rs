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

use crate::constants::tolerances::SPOT_BETA_LIM;
use crate::errors::GeomResult;
use crate::geometry::{ell_ell_overlap, Ellipse};
use crate::integrate::{chord_region, transit_disc, RegionKernel};
use crate::math::{quadrature::gauss_legendre, Vector2, Vector3};

/// A circular spot on a spherical-star approximation of its host. Angles in
/// degrees at this boundary, radians internally. Longitude is measured from the
/// sub-companion meridian at the reference epoch, increasing in the direction of
/// rotation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Angular radius γ
    pub radius_deg: f64,
    /// Surface brightness of the spot relative to the unspotted photosphere
    /// (0 = perfectly dark, > 1 = bright facula)
    pub brightness: f64,
}

/// Visibility state of a spot at one observation (the integer tag of the
/// modulation kernel)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpotVisibility {
    Hidden = 0,
    /// Straddling the limb, centre on the far side
    LimbCentreHidden = 1,
    /// Straddling the limb, centre on the near side
    LimbCentreVisible = 2,
    Full = 3,
}

impl SpotVisibility {
    pub fn is_visible(self) -> bool {
        self != Self::Hidden
    }

    fn of(beta: f64, gamma: f64) -> Self {
        if beta <= -gamma {
            Self::Hidden
        } else if beta < 0.0 {
            Self::LimbCentreHidden
        } else if beta < gamma {
            Self::LimbCentreVisible
        } else {
            Self::Full
        }
    }
}

/// Per-observation spot modulation result
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpotModulation {
    /// Multiplicative flux modulation factor of the host star
    pub df: f64,
    pub visibility: SpotVisibility,
    /// Apparent-disc azimuth of the spot centre
    pub alpha: f64,
    /// Apparent-disc latitude of the spot centre (π/2 at the sub-observer point,
    /// negative behind the limb)
    pub beta: f64,
}

/// Observation-frame context for the spot kernel: the sky position angle of the
/// host star's companion-facing axis, the inclination, the accumulated rotational
/// phase of the stellar surface relative to that axis, and the host limb-darkening
/// law reduced to an effective quadratic.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpotContext {
    pub theta: f64,
    pub incl: f64,
    pub rot_phase: f64,
    pub ld_quad: (f64, f64),
}

impl SpotContext {
    /// Spot centre direction in the star frame (x towards the companion)
    pub fn direction(&self, spot: &Spot) -> Vector3 {
        let lat = spot.latitude_deg.to_radians();
        let az = spot.longitude_deg.to_radians() + self.rot_phase;
        Vector3::new(lat.cos() * az.cos(), lat.cos() * az.sin(), lat.sin())
    }

    /// Sky basis vectors (u, v, w) expressed in the star frame
    fn basis(&self) -> (Vector3, Vector3, Vector3) {
        let (sin_th, cos_th) = self.theta.sin_cos();
        let (sin_i, cos_i) = self.incl.sin_cos();
        let u = Vector3::new(cos_th, -sin_th, 0.0);
        let v = Vector3::new(cos_i * sin_th, cos_i * cos_th, -sin_i);
        let w = Vector3::new(sin_i * sin_th, sin_i * cos_th, cos_i);
        (u, v, w)
    }

    /// Apparent-disc coordinates (α, β) of a star-frame direction
    pub fn apparent(&self, n: Vector3) -> (f64, f64) {
        let (u, v, w) = self.basis();
        let beta = n.dot(&w).clamp(-1.0, 1.0).asin();
        let alpha = n.dot(&v).atan2(n.dot(&u));
        (alpha, beta)
    }

    /// Flux modulation factor and visibility tag of one spot. The deficit is the
    /// limb-darkened, foreshortened intensity missing over the visible part of the
    /// spot cap, relative to the full-disc flux of the reduced quadratic law.
    pub fn modulation(&self, spot: &Spot) -> SpotModulation {
        let gamma = spot.radius_deg.to_radians();
        let (alpha, beta) = self.apparent(self.direction(spot));
        let visibility = SpotVisibility::of(beta, gamma);
        let (u1, u2) = self.ld_quad;
        let disc_mean = 1.0 - u1 / 3.0 - u2 / 6.0;
        let cap = cap_flux(beta, gamma, u1, u2);
        let df = 1.0 - (1.0 - spot.brightness) * cap / (std::f64::consts::PI * disc_mean);
        SpotModulation {
            df,
            visibility,
            alpha,
            beta,
        }
    }

    /// Fraction of the visible spot hidden by the companion. `comp` must already be
    /// reduced to the unit-sphere frame of the host (host centre at the origin, sky
    /// lengths divided by the local stellar radius at the spot).
    ///
    /// Apparent latitudes within ±SPOT_BETA_LIM of the limb run the geometry twice
    /// at the two bracketing latitudes and interpolate: the projected spot ellipse
    /// degenerates at β = 0 and the cap construction is unstable there.
    pub fn eclipsed_fraction(
        &self,
        spot: &Spot,
        comp: &Ellipse,
        n_grid: usize,
        n_min: usize,
    ) -> GeomResult<f64> {
        let gamma = spot.radius_deg.to_radians();
        let (alpha, beta) = self.apparent(self.direction(spot));
        if beta.abs() < SPOT_BETA_LIM {
            let hi = self.run_fraction(alpha, SPOT_BETA_LIM, gamma, comp, n_grid, n_min)?;
            let lo = self.run_fraction(alpha, -SPOT_BETA_LIM, gamma, comp, n_grid, n_min)?;
            let wt = match SpotVisibility::of(beta, gamma) {
                SpotVisibility::Hidden => (beta + gamma) / (SPOT_BETA_LIM + gamma),
                _ => 0.5 + beta / (2.0 * SPOT_BETA_LIM),
            }
            .clamp(0.0, 1.0);
            Ok(wt * hi + (1.0 - wt) * lo)
        } else {
            self.run_fraction(alpha, beta, gamma, comp, n_grid, n_min)
        }
    }

    /// Single-latitude evaluation of the eclipsed fraction, dispatching on the four
    /// limb cases
    fn run_fraction(
        &self,
        alpha: f64,
        beta: f64,
        gamma: f64,
        comp: &Ellipse,
        n_grid: usize,
        n_min: usize,
    ) -> GeomResult<f64> {
        match SpotVisibility::of(beta, gamma) {
            SpotVisibility::Hidden => {
                // constant fallback: is the limb point nearest the spot eclipsed?
                let limb = Vector2::new(alpha.cos(), alpha.sin());
                Ok(if comp.contains(limb) { 1.0 } else { 0.0 })
            }
            SpotVisibility::Full => {
                let spot_ell = project_spot(alpha, beta, gamma)?;
                let (overlap, _) = ell_ell_overlap(&spot_ell, comp);
                Ok((overlap / spot_ell.area).clamp(0.0, 1.0))
            }
            centre => {
                let spot_ell = project_spot(alpha, beta, gamma)?;
                let (t1, t2) = limb_tangent_points(alpha, beta, gamma);
                let mid = 0.5 * (t1 + t2);
                let outward = if mid.norm() > 0.0 {
                    mid
                } else {
                    Vector2::new(alpha.cos(), alpha.sin())
                };
                let circle = Ellipse::circle(1.0, Vector2::zeros())?;
                let kernel = RegionKernel::Indicator(comp);
                let circ_cap = chord_region(&circle, t1, t2, outward, &kernel, n_grid, n_min)?;
                let ell_cap = chord_region(&spot_ell, t1, t2, outward, &kernel, n_grid, n_min)?;
                let sliver_flux = (circ_cap.flux - ell_cap.flux).max(0.0);
                let sliver_area = (circ_cap.area - ell_cap.area).max(0.0);
                let (flux, area) = if centre == SpotVisibility::LimbCentreVisible {
                    // large side: the whole projected spot plus the limb sliver
                    let whole = transit_disc(&spot_ell, &spot_ell, &kernel, n_grid);
                    (whole.flux + sliver_flux, whole.area + sliver_area)
                } else {
                    (sliver_flux, sliver_area)
                };
                if area <= 0.0 {
                    return Ok(0.0);
                }
                Ok((flux / area).clamp(0.0, 1.0))
            }
        }
    }
}

/// Projection of the spot boundary circle onto the apparent disc of a unit-radius
/// host: an ellipse with tangential semi-axis sin γ and radial semi-axis
/// sin γ |sin β|, centred at radius cos γ cos β along azimuth α. The ellipse is
/// internally tangent to the limb circle whenever the spot straddles the limb.
pub fn project_spot(alpha: f64, beta: f64, gamma: f64) -> GeomResult<Ellipse> {
    let (sin_a, cos_a) = alpha.sin_cos();
    let radial = gamma.cos() * beta.cos();
    Ellipse::new(
        gamma.sin(),
        gamma.sin() * beta.sin().abs(),
        Vector2::new(radial * cos_a, radial * sin_a),
        alpha + std::f64::consts::FRAC_PI_2,
    )
}

/// Sky positions of the two points where the spot boundary crosses the limb
/// (defined for |β| < γ), at exactly unit radius
fn limb_tangent_points(alpha: f64, beta: f64, gamma: f64) -> (Vector2, Vector2) {
    // boundary point at parametric angle ψ has line-of-sight component
    // cos γ sin β + sin γ cos β cos ψ, zero at the limb crossings
    let cos_psi = (-(gamma.cos() / gamma.sin()) * (beta.sin() / beta.cos())).clamp(-1.0, 1.0);
    let sin_psi = (1.0 - cos_psi * cos_psi).sqrt();
    let (sin_a, cos_a) = alpha.sin_cos();
    // sky-plane basis at the spot centre: radial (towards the disc centre) and
    // tangential unit vectors; e1 projects radially with length sin β, e2 is fully
    // tangential
    let radial = Vector2::new(cos_a, sin_a);
    let tangential = Vector2::new(-sin_a, cos_a);
    let centre = radial * (gamma.cos() * beta.cos());
    let de1 = -radial * beta.sin();
    let p1 = centre + (de1 * cos_psi + tangential * sin_psi) * gamma.sin();
    let p2 = centre + (de1 * cos_psi - tangential * sin_psi) * gamma.sin();
    (p1, p2)
}

/// Limb-darkened, foreshortened flux of the spot cap: the part of the cap on the
/// visible hemisphere, integrated with the reduced quadratic law. Depends only on
/// the apparent latitude of the cap centre.
fn cap_flux(beta: f64, gamma: f64, u1: f64, u2: f64) -> f64 {
    if beta <= -gamma {
        return 0.0;
    }
    let (sig_nodes, sig_weights) = gauss_legendre(32);
    let (psi_nodes, psi_weights) = gauss_legendre(64);
    let (sin_b, cos_b) = beta.sin_cos();
    let mut total = 0.0;
    for (xs, ws) in sig_nodes.iter().zip(sig_weights.iter()) {
        let sigma = 0.5 * gamma * (xs + 1.0);
        let (sin_s, cos_s) = sigma.sin_cos();
        let mut ring = 0.0;
        for (xp, wp) in psi_nodes.iter().zip(psi_weights.iter()) {
            let psi = std::f64::consts::PI * (xp + 1.0);
            let mu = cos_s * sin_b + sin_s * cos_b * psi.cos();
            if mu <= 0.0 {
                continue;
            }
            let ld = 1.0 - u1 * (1.0 - mu) - u2 * (1.0 - mu) * (1.0 - mu);
            ring += wp * ld * mu;
        }
        total += ws * ring * sin_s;
    }
    // Jacobians of the two affine node maps
    total * 0.5 * gamma * std::f64::consts::PI
}

/// True when any two spots on the same star overlap (great-circle separation of
/// the centres below the sum of the angular radii). Overlapping spots modulate
/// additively, which can go non-physical; the orchestrator raises a warning bit.
pub fn any_overlapping(spots: &[Spot]) -> bool {
    for (i, a) in spots.iter().enumerate() {
        for b in spots.iter().skip(i + 1) {
            let (la, lb) = (a.latitude_deg.to_radians(), b.latitude_deg.to_radians());
            let dlon = (a.longitude_deg - b.longitude_deg).to_radians();
            let cos_sep = la.sin() * lb.sin() + la.cos() * lb.cos() * dlon.cos();
            let sep = cos_sep.clamp(-1.0, 1.0).acos();
            if sep < (a.radius_deg + b.radius_deg).to_radians() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod ut_spots {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn facing_context() -> SpotContext {
        // conjunction at i = 90°: the sub-companion point faces the observer
        SpotContext {
            theta: FRAC_PI_2,
            incl: FRAC_PI_2,
            rot_phase: 0.0,
            ld_quad: (0.0, 0.0),
        }
    }

    #[test]
    fn sub_observer_spot_dip_is_projected_area() {
        let ctx = facing_context();
        let spot = Spot {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            radius_deg: 5.0,
            brightness: 0.0,
        };
        let m = ctx.modulation(&spot);
        assert_eq!(m.visibility, SpotVisibility::Full);
        assert_relative_eq!(m.beta, FRAC_PI_2, epsilon = 1e-12);
        // uniform disc: the dip is exactly sin²γ (cap flux π sin²γ over disc flux π)
        let gamma = 5.0_f64.to_radians();
        assert_relative_eq!(1.0 - m.df, gamma.sin().powi(2), max_relative = 1e-5);
    }

    #[test]
    fn far_side_spot_does_not_modulate() {
        let ctx = facing_context();
        let spot = Spot {
            latitude_deg: 0.0,
            longitude_deg: 180.0,
            radius_deg: 10.0,
            brightness: 0.0,
        };
        let m = ctx.modulation(&spot);
        assert_eq!(m.visibility, SpotVisibility::Hidden);
        assert_relative_eq!(m.df, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn limb_spot_visibility_tags() {
        let ctx = facing_context();
        // 15° spot centred 5° behind the limb, then 5° in front of it
        let behind = Spot {
            latitude_deg: 0.0,
            longitude_deg: 95.0,
            radius_deg: 15.0,
            brightness: 0.5,
        };
        let front = Spot {
            latitude_deg: 0.0,
            longitude_deg: 85.0,
            radius_deg: 15.0,
            brightness: 0.5,
        };
        assert_eq!(
            ctx.modulation(&behind).visibility,
            SpotVisibility::LimbCentreHidden
        );
        assert_eq!(
            ctx.modulation(&front).visibility,
            SpotVisibility::LimbCentreVisible
        );
    }

    #[test]
    fn bright_spot_raises_flux() {
        let ctx = facing_context();
        let spot = Spot {
            latitude_deg: 10.0,
            longitude_deg: 0.0,
            radius_deg: 8.0,
            brightness: 1.5,
        };
        assert!(ctx.modulation(&spot).df > 1.0);
    }

    #[test]
    fn projected_spot_is_tangent_to_the_limb() {
        // straddling spot: the projected ellipse and the tangent points all lie
        // inside / on the unit circle
        let (alpha, beta, gamma) = (0.3, 0.1, 0.25);
        let (t1, t2) = limb_tangent_points(alpha, beta, gamma);
        assert_relative_eq!(t1.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(t2.norm(), 1.0, epsilon = 1e-12);
        let ell = project_spot(alpha, beta, gamma).unwrap();
        // the tangent points sit on the projected spot boundary too
        assert!(ell.coeffs.evaluate(t1).abs() < 1e-9);
        assert!(ell.coeffs.evaluate(t2).abs() < 1e-9);
    }

    #[test]
    fn fully_eclipsed_visible_spot() {
        let ctx = facing_context();
        let spot = Spot {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            radius_deg: 5.0,
            brightness: 0.0,
        };
        // companion covering the whole host disc
        let comp = Ellipse::circle(3.0, Vector2::zeros()).unwrap();
        let frac = ctx.eclipsed_fraction(&spot, &comp, 24, 4).unwrap();
        assert_relative_eq!(frac, 1.0, epsilon = 1e-9);
        // companion far away from the host
        let far = Ellipse::circle(0.5, Vector2::new(10.0, 0.0)).unwrap();
        let frac = ctx.eclipsed_fraction(&spot, &far, 24, 4).unwrap();
        assert_eq!(frac, 0.0);
    }

    #[test]
    fn half_eclipsed_spot_fraction() {
        let ctx = facing_context();
        let spot = Spot {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            radius_deg: 5.0,
            brightness: 0.0,
        };
        // companion edge slicing the spot through its centre
        let comp = Ellipse::circle(5.0, Vector2::new(-5.0, 0.0)).unwrap();
        let frac = ctx.eclipsed_fraction(&spot, &comp, 32, 4).unwrap();
        assert_relative_eq!(frac, 0.5, max_relative = 0.02);
    }

    #[test]
    fn near_limb_interpolation_is_bounded() {
        let ctx = facing_context();
        // spot centred almost exactly on the limb
        let spot = Spot {
            latitude_deg: 0.0,
            longitude_deg: 90.0,
            radius_deg: 12.0,
            brightness: 0.0,
        };
        let comp = Ellipse::circle(0.8, Vector2::new(0.4, 0.0)).unwrap();
        let frac = ctx.eclipsed_fraction(&spot, &comp, 24, 4).unwrap();
        assert!((0.0..=1.0).contains(&frac));
    }

    #[test]
    fn overlap_warning_detection() {
        let a = Spot {
            latitude_deg: 10.0,
            longitude_deg: 20.0,
            radius_deg: 15.0,
            brightness: 0.5,
        };
        let b = Spot {
            latitude_deg: 20.0,
            longitude_deg: 30.0,
            radius_deg: 10.0,
            brightness: 0.5,
        };
        let c = Spot {
            latitude_deg: -60.0,
            longitude_deg: 200.0,
            radius_deg: 5.0,
            brightness: 0.5,
        };
        assert!(any_overlapping(&[a, b]));
        assert!(!any_overlapping(&[a, c]));
        assert!(!any_overlapping(&[a]));
    }

    #[test]
    fn cap_flux_of_full_hemisphere() {
        // γ = 90°, centre at the sub-observer point: the whole visible hemisphere,
        // uniform law: ∫ μ dΩ = π
        let flux = cap_flux(FRAC_PI_2, FRAC_PI_2, 0.0, 0.0);
        assert_relative_eq!(flux, PI, max_relative = 1e-6);
    }
}
