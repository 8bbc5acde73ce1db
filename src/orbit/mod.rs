/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use std::f64::consts::{PI, TAU};

use log::warn;

use crate::constants::tolerances::{KEPLER_MAX_ITER, KEPLER_TOL};
use crate::constants::SUN_RADIUS_LIGHT_DAYS;
use crate::errors::{MathError, MathResult};
use crate::math::{wrap_two_pi, Vector3};

/// Solves Kepler's equation `M = E - e sin E` for the eccentric anomaly.
///
/// Newton iteration safeguarded by the bracket [0, 2π): `E - e sin E - M` is
/// strictly increasing for e < 1, so any step that escapes the bracket is
/// replaced by a bisection step. This keeps the solver from diverging for
/// eccentricities close to one.
pub fn eccentric_anomaly(mean_anom: f64, ecc: f64) -> MathResult<f64> {
    if !(0.0..1.0).contains(&ecc) {
        return Err(MathError::DomainError {
            value: ecc,
            msg: "eccentricity outside [0, 1) in Kepler solver",
        });
    }
    let m = wrap_two_pi(mean_anom);
    let mut lo = 0.0_f64;
    let mut hi = TAU;
    let mut e_anom = if ecc < 0.8 { m + ecc * m.sin() } else { PI };
    for _ in 0..KEPLER_MAX_ITER {
        let f = e_anom - ecc * e_anom.sin() - m;
        if f > 0.0 {
            hi = e_anom;
        } else {
            lo = e_anom;
        }
        let fp = 1.0 - ecc * e_anom.cos();
        let mut next = e_anom - f / fp;
        if !(lo..=hi).contains(&next) {
            next = 0.5 * (lo + hi);
        }
        if (next - e_anom).abs() < KEPLER_TOL {
            return Ok(next);
        }
        e_anom = next;
    }
    Err(MathError::MaxIterationsReached {
        iter: KEPLER_MAX_ITER,
        action: "solving Kepler's equation",
    })
}

/// Mean anomaly from the eccentric anomaly (the trivial direction of Kepler's equation)
pub fn mean_from_eccentric(ecc_anom: f64, ecc: f64) -> f64 {
    ecc_anom - ecc * ecc_anom.sin()
}

/// True anomaly from the eccentric anomaly, via the half-angle atan2 form (no
/// singularity at E = π).
pub fn true_from_eccentric(ecc_anom: f64, ecc: f64) -> f64 {
    2.0 * ((1.0 + ecc).sqrt() * (0.5 * ecc_anom).sin())
        .atan2((1.0 - ecc).sqrt() * (0.5 * ecc_anom).cos())
}

pub fn eccentric_from_true(true_anom: f64, ecc: f64) -> f64 {
    2.0 * ((1.0 - ecc).sqrt() * (0.5 * true_anom).sin())
        .atan2((1.0 + ecc).sqrt() * (0.5 * true_anom).cos())
}

/// Orbit state at one anomaly: separation in units of the semi-major axis plus the
/// true anomaly and its cosine/sine.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Propagated {
    pub mean_anom: f64,
    pub ecc_anom: f64,
    pub separation: f64,
    pub true_anom: f64,
    pub cos_nu: f64,
    pub sin_nu: f64,
}

/// Composes the mean anomaly at time `t`, the Kepler solution, and the conic equation.
pub fn propagate(t: f64, t_peri: f64, period: f64, ecc: f64) -> MathResult<Propagated> {
    let mean_anom = TAU * ((t - t_peri) / period).rem_euclid(1.0);
    let ecc_anom = eccentric_anomaly(mean_anom, ecc)?;
    let true_anom = true_from_eccentric(ecc_anom, ecc);
    Ok(Propagated {
        mean_anom,
        ecc_anom,
        separation: 1.0 - ecc * ecc_anom.cos(),
        true_anom,
        cos_nu: true_anom.cos(),
        sin_nu: true_anom.sin(),
    })
}

/// Returns the periastron time immediately before `t_ecl` by inverting the eclipse
/// condition: the true anomaly at mid-eclipse minimizes the projected separation
/// `r²·(cos²(ν+ω) + sin²(ν+ω)cos²i)`. Newton iteration on the derivative, started
/// from the conjunction with star 1 in front (ν + ω = 3π/2).
pub fn periastron_time(
    t_ecl: f64,
    ecc: f64,
    omega: f64,
    incl: f64,
    p_sid: f64,
) -> MathResult<f64> {
    let sin2_i = incl.sin().powi(2);
    let p = 1.0 - ecc * ecc;
    let dy = |nu: f64| -> f64 {
        let theta = nu + omega;
        let r = p / (1.0 + ecc * nu.cos());
        let r_nu = r * ecc * nu.sin() / (1.0 + ecc * nu.cos());
        let a = theta.cos().powi(2) + theta.sin().powi(2) * (1.0 - sin2_i);
        2.0 * r * r_nu * a - r * r * (2.0 * theta).sin() * sin2_i
    };
    let mut nu = 1.5 * PI - omega;
    let h = 1e-6;
    let mut converged = false;
    for _ in 0..50 {
        let g = dy(nu);
        let gp = (dy(nu + h) - dy(nu - h)) / (2.0 * h);
        if gp.abs() < f64::EPSILON {
            break;
        }
        let step = g / gp;
        nu -= step;
        if step.abs() < 1e-13 {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(MathError::MaxIterationsReached {
            iter: 50,
            action: "inverting the eclipse condition for the periastron time",
        });
    }
    let ecc_anom = eccentric_from_true(nu, ecc);
    let mean_anom = wrap_two_pi(mean_from_eccentric(ecc_anom, ecc));
    Ok(t_ecl - mean_anom / TAU * p_sid)
}

/// The per-observation orbit state consumed by the eclipse orchestrator.
///
/// Positions are relative to the centre of mass, in units of the semi-major axis,
/// with `u, v` in the plane of the sky and `w` towards the observer. Index 0 is
/// star 1. The per-star anomalies and separations are evaluated at each star's
/// retarded time when light-travel corrections are active.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrbitState {
    pub base: Propagated,
    pub omega: [f64; 2],
    pub incl: f64,
    pub pos: [Vector3; 2],
    pub true_anom: [f64; 2],
    pub separation: [f64; 2],
}

/// Keplerian propagation model with apsidal motion, secular inclination drift and
/// light-travel-time retardation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrbitModel {
    pub t_zero: f64,
    pub period: f64,
    pub p_sid: f64,
    pub ecc: f64,
    pub omega_0: f64,
    pub omega_dot: f64,
    pub incl_0: f64,
    pub incl_dot: f64,
    pub t_peri: f64,
    /// Light crossing time of the semi-major axis in days; zero disables retardation
    pub a_lite: f64,
    pub mass_ratio: f64,
}

impl OrbitModel {
    /// Builds the model from boundary parameters (all angles in radians, rates per
    /// the conventions of the parameter block: `omega_dot` radians per sidereal
    /// period, `incl_dot` radians per day).
    ///
    /// When the semi-major axis is positive, the light-travel-time correction to
    /// `t_zero` is evaluated once from the closed form of Borkovits et al. (2015)
    /// and subtracted before the periastron time is derived.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        t_zero: f64,
        period: f64,
        ecc: f64,
        omega_0: f64,
        incl_0: f64,
        omega_dot: f64,
        incl_dot: f64,
        mass_ratio: f64,
        a_rsun: f64,
    ) -> MathResult<Self> {
        if period <= 0.0 {
            return Err(MathError::DomainError {
                value: period,
                msg: "anomalistic period must be positive",
            });
        }
        let p_sid = period * (1.0 - omega_dot / TAU);
        let a_lite = if a_rsun > 0.0 {
            a_rsun * SUN_RADIUS_LIGHT_DAYS
        } else {
            0.0
        };
        let t_zero_eff = if a_lite > 0.0 {
            let r_conj = (1.0 - ecc * ecc) / (1.0 - ecc * omega_0.sin());
            let dt0 = a_lite * r_conj * incl_0.sin() * (1.0 - mass_ratio) / (1.0 + mass_ratio);
            t_zero - dt0
        } else {
            t_zero
        };
        let t_peri = periastron_time(t_zero_eff, ecc, omega_0, incl_0, p_sid)?;
        Ok(Self {
            t_zero: t_zero_eff,
            period,
            p_sid,
            ecc,
            omega_0,
            omega_dot,
            incl_0,
            incl_dot,
            t_peri,
            a_lite,
            mass_ratio,
        })
    }

    pub fn omega_at(&self, t: f64) -> f64 {
        self.omega_0 + (t - self.t_zero) * self.omega_dot / self.p_sid
    }

    pub fn incl_at(&self, t: f64) -> f64 {
        self.incl_0 + (t - self.t_zero) * self.incl_dot
    }

    /// Propagates to time `t` (days): base two-body solution, then one retarded
    /// re-propagation per star feeding that star's sky position.
    pub fn state_at(&self, t: f64) -> MathResult<OrbitState> {
        let base = propagate(t, self.t_peri, self.period, self.ecc)?;
        let omega_1 = self.omega_at(t);
        let incl = self.incl_at(t);
        let q = self.mass_ratio;
        let mass_factor = [-q / (1.0 + q), 1.0 / (1.0 + q)];

        let mut pos = [Vector3::zeros(); 2];
        let mut true_anom = [base.true_anom; 2];
        let mut separation = [base.separation; 2];

        for k in 0..2 {
            let (prop_k, omega_k) = if self.a_lite != 0.0 {
                let theta = base.true_anom + omega_1;
                let w_k = mass_factor[k] * base.separation * theta.sin() * incl.sin();
                let t_k = t + self.a_lite * w_k;
                (propagate(t_k, self.t_peri, self.period, self.ecc)?, self.omega_at(t_k))
            } else {
                (base, omega_1)
            };
            let theta_k = prop_k.true_anom + omega_k;
            let (sin_th, cos_th) = theta_k.sin_cos();
            pos[k] = mass_factor[k]
                * prop_k.separation
                * Vector3::new(cos_th, sin_th * incl.cos(), sin_th * incl.sin());
            true_anom[k] = prop_k.true_anom;
            separation[k] = prop_k.separation;
        }

        if !pos[0].iter().chain(pos[1].iter()).all(|v| v.is_finite()) {
            warn!("non-finite sky position at t={t}");
            return Err(MathError::DomainError {
                value: t,
                msg: "non-finite sky position",
            });
        }

        Ok(OrbitState {
            base,
            omega: [omega_1, omega_1 + PI],
            incl,
            pos,
            true_anom,
            separation,
        })
    }
}
