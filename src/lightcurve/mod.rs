/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use std::f64::consts::TAU;

use bitflags::bitflags;
use log::{debug, error, warn};
use serde_derive::{Deserialize, Serialize};

use crate::brightness::{BrightnessPars, GravityDarkening, HeatingPars, LimbDarkeningLaw};
use crate::constants::{BAD_DBLE, NOT_SET, SECONDS_PER_DAY, SPEED_OF_LIGHT_KM_S, SUN_RADIUS_KM, SUN_RADIUS_LIGHT_DAYS};
use crate::errors::{LcResult, LightCurveError};
use crate::geometry::{ell_ell_intersect, ell_ell_overlap, Ellipse, IntersectFlags};
use crate::integrate::{
    double_partial, partial, transit_disc, whole_disc, PartialSide, RegionKernel,
};
use crate::math::{Affine2, Vector2};
use crate::orbit::{OrbitModel, OrbitState};
use crate::shape::{l1_radius, ShapeConfig, ShapeModel, StarShape};
use crate::spots::{any_overlapping, Spot, SpotContext};

/// Diagnostic verbosity consumed by the print sites of the pipeline
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    #[default]
    Warn,
    User,
    Debug,
}

bitflags! {
    /// Per-observation classification word. Bit positions are stable and
    /// externally visible.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ObsFlags: u32 {
        const ECLIPSE = 1 << 0;
        const STAR1_ECLIPSED = 1 << 1;
        const STAR2_ECLIPSED = 1 << 2;
        const TOTAL = 1 << 3;
        const TRANSIT = 1 << 4;
        const DOUBLE_PARTIAL = 1 << 5;
        const WARN_SPOT_1 = 1 << 11;
        const WARN_SPOT_2 = 1 << 12;
        const FAIL = 1 << 14;
        const WARNING = 1 << 15;
        const ERROR = 1 << 16;
    }
}

/// Irradiation strength of one star. A non-positive exponent disables the
/// detailed heating model; the analytic simple-reflection term is applied instead.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Heating {
    pub h0: f64,
    pub h1: f64,
    pub u_h: f64,
}

impl Heating {
    pub fn enabled(&self) -> bool {
        self.h1 > 0.0
    }
}

/// Physical parameters of one star
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StarPars {
    /// Volume radius as a fraction of the semi-major axis
    pub radius: f64,
    pub ld: LimbDarkeningLaw,
    /// Gravity darkening exponent β
    pub grav_dark: f64,
    /// Asynchronous rotation factor F
    pub rotation_factor: f64,
    /// Doppler boosting factor
    pub boost: f64,
    pub heating: Heating,
    /// Projected spin-orbit misalignment λ, degrees
    pub lambda_deg: f64,
    /// Projected equatorial rotation velocity, km/s
    pub vsini_kms: f64,
    /// Fluid Love number h_f (Love shape model only)
    pub love_number: f64,
    pub shape: ShapeModel,
    pub spots: Vec<Spot>,
}

impl Default for StarPars {
    fn default() -> Self {
        Self {
            radius: 0.1,
            ld: LimbDarkeningLaw::None,
            grav_dark: 0.0,
            rotation_factor: 1.0,
            boost: 0.0,
            heating: Heating::default(),
            lambda_deg: 0.0,
            vsini_kms: 0.0,
            love_number: 1.5,
            shape: ShapeModel::Sphere,
            spots: Vec::new(),
        }
    }
}

/// Orbital and photometric parameters of the binary
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct BinaryPars {
    /// Time of mid-eclipse with star 1 in front (days)
    pub t_zero: f64,
    /// Anomalistic period (days)
    pub period: f64,
    /// Surface brightness ratio S₂/S₁ at the disc centres
    pub sb_ratio: f64,
    pub incl_deg: f64,
    /// Third light as a fraction of the total out-of-eclipse flux at t_zero
    pub light_3: f64,
    /// Semi-major axis in solar radii; non-positive disables velocities and
    /// light-travel corrections
    pub a_rsun: f64,
    /// √e cos ω
    pub f_c: f64,
    /// √e sin ω
    pub f_s: f64,
    /// Mass ratio m₂/m₁
    pub q: f64,
    /// Apsidal motion rate, degrees per sidereal period
    pub domega_dt_deg: f64,
    /// Secular inclination drift, degrees per day
    pub dincl_dt_deg: f64,
}

impl Default for BinaryPars {
    fn default() -> Self {
        Self {
            t_zero: 0.0,
            period: 1.0,
            sb_ratio: 1.0,
            incl_deg: 90.0,
            light_3: 0.0,
            a_rsun: 0.0,
            f_c: 0.0,
            f_s: 0.0,
            q: 1.0,
            domega_dt_deg: 0.0,
            dincl_dt_deg: 0.0,
        }
    }
}

/// Quadrature and dispatch controls
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct GridPars {
    pub n_grid_1: usize,
    pub n_grid_2: usize,
    /// Return flux-weighted radial velocities (Rossiter-McLaughlin) instead of
    /// centre-of-mass velocities only
    pub flux_weighted_rv: bool,
    /// Evaluate gravity darkening from the exact Roche potential gradient
    pub exact_grav: bool,
}

impl Default for GridPars {
    fn default() -> Self {
        Self {
            n_grid_1: 24,
            n_grid_2: 24,
            flux_weighted_rv: false,
            exact_grav: false,
        }
    }
}

/// Full system description consumed by [lc] and [rv]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct System {
    pub binary: BinaryPars,
    pub stars: [StarPars; 2],
    pub grid: GridPars,
}

/// One synthesized observation. Scalar columns carry [BAD_DBLE] when the
/// observation could not be computed; the flag word carries the reason.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Observation {
    pub flux: f64,
    pub flux_1: f64,
    pub flux_2: f64,
    pub rv_1: f64,
    pub rv_2: f64,
    pub flags: ObsFlags,
}

impl Observation {
    fn bad(flags: ObsFlags) -> Self {
        Self {
            flux: BAD_DBLE,
            flux_1: BAD_DBLE,
            flux_2: BAD_DBLE,
            rv_1: BAD_DBLE,
            rv_2: BAD_DBLE,
            flags,
        }
    }

    pub fn is_bad(&self) -> bool {
        self.flux == BAD_DBLE
    }
}

/// One observation of the radial-velocity fast path (km/s)
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RvObservation {
    pub rv_1: f64,
    pub rv_2: f64,
}

const N_MIN: usize = 4;

/// Synthesizes the light curve (and, when requested, flux-weighted radial
/// velocities) of the binary at the given times (days).
///
/// Input errors mark every observation with the `ERROR` bit and sentinel values;
/// per-observation numerical failures mark that observation with `FAIL` and the
/// loop continues. This function never panics on parameter input.
pub fn lc(times: &[f64], system: &System, verbose: Verbosity) -> Vec<Observation> {
    let mut pipeline = match Pipeline::try_new(system, verbose) {
        Ok(p) => p,
        Err(err) => {
            if verbose >= Verbosity::Warn {
                error!("light curve setup failed: {err}");
            }
            return vec![Observation::bad(ObsFlags::ERROR); times.len()];
        }
    };
    if let Err(err) = pipeline.normalize() {
        if verbose >= Verbosity::Warn {
            error!("normalization at t_zero failed: {err}");
        }
        return vec![Observation::bad(ObsFlags::ERROR); times.len()];
    }
    times.iter().map(|&t| pipeline.observe(t)).collect()
}

/// Centre-of-mass radial velocities only, bypassing all flux integration.
/// The light-travel retardation loop runs regardless of the sign of the
/// semi-major axis, matching the flux path only for positive values.
pub fn rv(times: &[f64], system: &System, verbose: Verbosity) -> Vec<RvObservation> {
    let b = &system.binary;
    let ecc = b.f_c * b.f_c + b.f_s * b.f_s;
    let omega_0 = b.f_s.atan2(b.f_c);
    let model = OrbitModel::try_new(
        b.t_zero,
        b.period,
        ecc,
        omega_0,
        b.incl_deg.to_radians(),
        b.domega_dt_deg.to_radians(),
        b.dincl_dt_deg.to_radians(),
        b.q,
        b.a_rsun,
    );
    let mut model = match model {
        Ok(m) => m,
        Err(err) => {
            if verbose >= Verbosity::Warn {
                error!("radial velocity setup failed: {err}");
            }
            return vec![
                RvObservation {
                    rv_1: BAD_DBLE,
                    rv_2: BAD_DBLE
                };
                times.len()
            ];
        }
    };
    model.a_lite = b.a_rsun * SUN_RADIUS_LIGHT_DAYS;
    let k_amp = semi_amplitudes(b, ecc);
    times
        .iter()
        .map(|&t| match model.state_at(t) {
            Ok(state) => {
                let mut out = [NOT_SET; 2];
                for k in 0..2 {
                    out[k] = k_amp[k]
                        * ((state.true_anom[k] + state.omega[k]).cos()
                            + ecc * state.omega[k].cos());
                }
                RvObservation {
                    rv_1: out[0],
                    rv_2: out[1],
                }
            }
            Err(_) => RvObservation {
                rv_1: BAD_DBLE,
                rv_2: BAD_DBLE,
            },
        })
        .collect()
}

/// Keplerian semi-amplitudes in km/s; zero when velocities are disabled
fn semi_amplitudes(b: &BinaryPars, ecc: f64) -> [f64; 2] {
    if b.a_rsun <= 0.0 {
        return [0.0; 2];
    }
    let sin_i = b.incl_deg.to_radians().sin();
    let scale = TAU * b.a_rsun * SUN_RADIUS_KM * sin_i
        / (b.period * SECONDS_PER_DAY * (1.0 - ecc * ecc).sqrt());
    [scale * b.q / (1.0 + b.q), scale / (1.0 + b.q)]
}

struct Pipeline<'a> {
    sys: &'a System,
    verbose: Verbosity,
    orbit: OrbitModel,
    ecc: f64,
    shape_cfgs: [ShapeConfig; 2],
    shapes_ref: [StarShape; 2],
    surf_bright: [f64; 2],
    ld_quads: [(f64, f64); 2],
    n_grid: [usize; 2],
    k_amp: [f64; 2],
    spot_warn: [bool; 2],
    theta_zero: [f64; 2],
    // normalization state, set once at the sentinel observation
    anorm: [f64; 2],
    fnorm: f64,
    flux_3: f64,
    flux_disc_zero: [f64; 2],
    refl_amp: [f64; 2],
}

impl<'a> Pipeline<'a> {
    fn try_new(sys: &'a System, verbose: Verbosity) -> LcResult<Self> {
        let b = &sys.binary;
        let ecc = b.f_c * b.f_c + b.f_s * b.f_s;
        if ecc >= 1.0 {
            return Err(LightCurveError::InvalidParameter {
                value: ecc,
                msg: "eccentricity must be below one",
            });
        }
        if b.period <= 0.0 {
            return Err(LightCurveError::InvalidParameter {
                value: b.period,
                msg: "period must be positive",
            });
        }
        let omega_0 = b.f_s.atan2(b.f_c);

        let mut shape_cfgs = [ShapeConfig {
            model: ShapeModel::Sphere,
            radius: 0.0,
            mass_ratio: 1.0,
            rotation_factor: 1.0,
            love_number: 0.0,
        }; 2];
        for k in 0..2 {
            let star = &sys.stars[k];
            let mass_ratio = if k == 0 { b.q } else { 1.0 / b.q };
            shape_cfgs[k] = ShapeConfig {
                model: star.shape,
                radius: star.radius,
                mass_ratio,
                rotation_factor: star.rotation_factor,
                love_number: star.love_number,
            };
            // hard cap: the star must fit inside its lobe at periastron
            let l1 = l1_radius(mass_ratio, star.rotation_factor)
                .map_err(|source| LightCurveError::StarShape { star: k + 1, source })?;
            let limit = l1 * (1.0 - ecc);
            if star.radius > limit {
                return Err(LightCurveError::InvalidParameter {
                    value: star.radius,
                    msg: "fractional radius exceeds the Roche limit at periastron",
                });
            }
        }

        let d_ref = 1.0 - ecc;
        let mut shapes_ref = [StarShape::sphere(0.1); 2];
        for k in 0..2 {
            shapes_ref[k] = shape_cfgs[k]
                .solve_at(d_ref)
                .map_err(|source| LightCurveError::StarShape { star: k + 1, source })?;
        }

        let orbit = OrbitModel::try_new(
            b.t_zero,
            b.period,
            ecc,
            omega_0,
            b.incl_deg.to_radians(),
            b.domega_dt_deg.to_radians(),
            b.dincl_dt_deg.to_radians(),
            b.q,
            b.a_rsun,
        )
        .map_err(|source| LightCurveError::OrbitSetup { source })?;

        let spot_warn = [
            any_overlapping(&sys.stars[0].spots),
            any_overlapping(&sys.stars[1].spots),
        ];
        if verbose >= Verbosity::Warn {
            for (k, warn_k) in spot_warn.iter().enumerate() {
                if *warn_k {
                    warn!("overlapping spots on star {}: additive modulation may go non-physical", k + 1);
                }
            }
        }

        Ok(Self {
            sys,
            verbose,
            orbit,
            ecc,
            shape_cfgs,
            shapes_ref,
            surf_bright: [1.0, b.sb_ratio],
            ld_quads: [
                sys.stars[0].ld.effective_quadratic(),
                sys.stars[1].ld.effective_quadratic(),
            ],
            n_grid: [sys.grid.n_grid_1.max(N_MIN), sys.grid.n_grid_2.max(N_MIN)],
            k_amp: semi_amplitudes(b, ecc),
            spot_warn,
            theta_zero: [0.0; 2],
            anorm: [1.0; 2],
            fnorm: 1.0,
            flux_3: 0.0,
            flux_disc_zero: [0.0; 2],
            refl_amp: [0.0; 2],
        })
    }

    /// Instantaneous shape of star k; eccentric orbits re-solve per observation
    fn shape_at(&self, k: usize, separation: f64) -> Result<StarShape, crate::errors::ShapeError> {
        if self.ecc > 0.0 {
            self.shape_cfgs[k].update(&self.shapes_ref[k], separation)
        } else {
            Ok(self.shapes_ref[k])
        }
    }

    fn brightness_pars(
        &self,
        k: usize,
        shape: StarShape,
        state: &OrbitState,
        theta: f64,
    ) -> BrightnessPars {
        let star = &self.sys.stars[k];
        let other = &self.sys.stars[1 - k];
        let grav = if self.sys.grid.exact_grav {
            GravityDarkening::Exact {
                beta: star.grav_dark,
                mass_ratio: self.shape_cfgs[k].mass_ratio,
                rotation_factor: star.rotation_factor,
            }
        } else {
            GravityDarkening::Fast {
                beta: star.grav_dark,
            }
        };
        let heating = if star.heating.enabled() {
            Some(HeatingPars {
                h0: star.heating.h0,
                h1: star.heating.h1,
                u_h: star.heating.u_h,
                companion_flux: self.surf_bright[1 - k] * other.ld.quadratic_disc_mean()
                    / self.surf_bright[k].max(f64::EPSILON),
                companion_radius: other.radius,
            })
        } else {
            None
        };
        BrightnessPars::new(
            self.surf_bright[k],
            shape,
            state.incl,
            theta,
            state.separation[k],
            star.ld.clone(),
            grav,
            heating,
            star.lambda_deg.to_radians(),
            star.vsini_kms,
            star.boost,
        )
    }

    /// Sentinel observation at t_zero: whole-disc integrals fix the `anorm`
    /// quadrature-bias factors, the reflection amplitudes, third light and the
    /// global flux normalization. Eclipse logic is skipped here.
    fn normalize(&mut self) -> LcResult<()> {
        let t0 = self.orbit.t_zero;
        let state = self
            .orbit
            .state_at(t0)
            .map_err(|source| LightCurveError::OrbitSetup { source })?;

        let mut flux_spotted = [0.0; 2];
        for k in 0..2 {
            let theta = state.true_anom[k] + state.omega[k];
            self.theta_zero[k] = theta;
            let shape = self
                .shape_at(k, state.separation[k])
                .map_err(|source| LightCurveError::StarShape { star: k + 1, source })?;
            let ell = Ellipse::project_ellipsoid(shape.semi_axes, theta, state.incl)
                .map_err(|_| LightCurveError::InvalidParameter {
                    value: self.sys.stars[k].radius,
                    msg: "projected ellipse is degenerate",
                })?;
            let pars = self.brightness_pars(k, shape, &state, theta);
            let disc = whole_disc(&ell, &pars, self.n_grid[k]);
            self.anorm[k] = disc.area / ell.area;
            let disc_flux = disc.flux / self.anorm[k];
            self.flux_disc_zero[k] = disc_flux;

            // spot modulation enters the reference flux level
            let ctx = self.spot_context(k, t0, theta);
            let mut spotted = disc_flux;
            for spot in &self.sys.stars[k].spots {
                spotted += (ctx.modulation(spot).df - 1.0) * disc_flux;
            }
            flux_spotted[k] = spotted;
        }

        for k in 0..2 {
            let star = &self.sys.stars[k];
            self.refl_amp[k] = if star.heating.enabled() {
                0.0
            } else {
                star.heating.h0.abs() * self.flux_disc_zero[1 - k] * star.radius.powi(2)
            };
        }
        let refl = self.reflection(&state, [0.0, 0.0]);
        let luminous = flux_spotted[0] + flux_spotted[1] + refl[0] + refl[1];
        if luminous <= 0.0 {
            return Err(LightCurveError::InvalidParameter {
                value: luminous,
                msg: "non-positive reference flux at t_zero",
            });
        }
        let l3 = self.sys.binary.light_3;
        if !(0.0..1.0).contains(&l3) {
            return Err(LightCurveError::InvalidParameter {
                value: l3,
                msg: "third light must be in [0, 1)",
            });
        }
        self.fnorm = luminous / (1.0 - l3);
        self.flux_3 = l3 * self.fnorm;
        if self.verbose >= Verbosity::Debug {
            debug!(
                "normalization: fnorm={} anorm=({}, {})",
                self.fnorm, self.anorm[0], self.anorm[1]
            );
        }
        Ok(())
    }

    fn spot_context(&self, k: usize, t: f64, theta: f64) -> SpotContext {
        let b = &self.sys.binary;
        let f_rot = self.sys.stars[k].rotation_factor;
        let rot_phase =
            f_rot * TAU * (t - b.t_zero) / self.orbit.p_sid - (theta - self.theta_zero[k]);
        SpotContext {
            theta,
            incl: self.orbit.incl_at(t),
            rot_phase,
            ld_quad: self.ld_quads[k],
        }
    }

    /// Simple analytic reflection for stars whose detailed heating model is
    /// disabled. `u` is the line-of-sight component of the relative position; each
    /// star's reflected light peaks when its illuminated face points at the
    /// observer, and is attenuated by that star's eclipsed fraction.
    fn reflection(&self, state: &OrbitState, ecl_frac: [f64; 2]) -> [f64; 2] {
        let r = state.base.separation;
        let u = state.incl.sin() * (state.base.true_anom + state.omega[0]).sin();
        let mut out = [0.0; 2];
        for k in 0..2 {
            if self.refl_amp[k] == 0.0 {
                continue;
            }
            let signed = if k == 0 { u } else { -u };
            let phase_fn = 0.5 + 0.5 * u * u + signed;
            out[k] = self.refl_amp[k] * phase_fn / (r * r) * (1.0 - ecl_frac[k].clamp(0.0, 1.0));
        }
        out
    }

    fn observe(&self, t: f64) -> Observation {
        match self.observe_inner(t) {
            Ok(obs) => obs,
            Err(flags) => Observation::bad(flags),
        }
    }

    fn observe_inner(&self, t: f64) -> Result<Observation, ObsFlags> {
        let mut flags = ObsFlags::default();
        if self.spot_warn[0] {
            flags |= ObsFlags::WARN_SPOT_1 | ObsFlags::WARNING;
        }
        if self.spot_warn[1] {
            flags |= ObsFlags::WARN_SPOT_2 | ObsFlags::WARNING;
        }

        let state = self.orbit.state_at(t).map_err(|_| flags | ObsFlags::FAIL)?;

        // Shapes, projections, apparent centres
        let mut shapes = [StarShape::sphere(0.1); 2];
        let mut ells = [Ellipse::circle(1.0, Vector2::zeros()).unwrap(); 2];
        let mut pars = Vec::with_capacity(2);
        let mut theta = [0.0; 2];
        for k in 0..2 {
            theta[k] = state.true_anom[k] + state.omega[k];
            shapes[k] = self
                .shape_at(k, state.separation[k])
                .map_err(|_| flags | ObsFlags::FAIL)?;
            let ell = Ellipse::project_ellipsoid(shapes[k].semi_axes, theta[k], state.incl)
                .map_err(|_| flags | ObsFlags::FAIL)?;
            // apparent centre: centre of mass plus the projected ellipsoid offset
            let (sin_th, cos_th) = theta[k].sin_cos();
            let centre = Vector2::new(
                state.pos[k][0] + shapes[k].offset * cos_th,
                state.pos[k][1] + shapes[k].offset * sin_th * state.incl.cos(),
            );
            ells[k] = ell.translated(centre);
            pars.push(self.brightness_pars(k, shapes[k], &state, theta[k]));
        }

        // Whole-disc fluxes, bias-corrected
        let mut flux_disc = [0.0; 2];
        let mut rv_flux = [0.0; 2];
        for k in 0..2 {
            flux_disc[k] = whole_disc(&ells[k], &pars[k], self.n_grid[k]).flux / self.anorm[k];
            if !flux_disc[k].is_finite() {
                return Err(flags | ObsFlags::FAIL);
            }
            if self.sys.grid.flux_weighted_rv {
                rv_flux[k] = whole_disc(&ells[k], &pars[k].rv_weighted(), self.n_grid[k]).flux
                    / self.anorm[k];
            }
        }

        // Eclipse classification
        let (overlap_area, oflags) = ell_ell_overlap(&ells[0], &ells[1]);
        if oflags.contains(IntersectFlags::ERROR) {
            flags |= ObsFlags::FAIL;
        }
        if oflags.contains(IntersectFlags::WARN_INACCURATE) {
            flags |= ObsFlags::WARNING;
        }
        let mut host = usize::MAX;
        let mut total = false;
        let mut transit = false;
        let mut four = false;
        if overlap_area > 0.0 {
            flags |= ObsFlags::ECLIPSE;
            // the star further from the observer is the one being eclipsed
            host = if state.pos[0][2] < state.pos[1][2] { 0 } else { 1 };
            flags |= if host == 0 {
                ObsFlags::STAR1_ECLIPSED
            } else {
                ObsFlags::STAR2_ECLIPSED
            };
            let host_inside = if host == 0 {
                IntersectFlags::ONE_INSIDE_TWO
            } else {
                IntersectFlags::TWO_INSIDE_ONE
            };
            let comp_inside = if host == 0 {
                IntersectFlags::TWO_INSIDE_ONE
            } else {
                IntersectFlags::ONE_INSIDE_TWO
            };
            if oflags.contains(host_inside) || oflags.contains(IntersectFlags::IDENTICAL) {
                total = true;
                flags |= ObsFlags::TOTAL;
            } else if oflags.contains(comp_inside) {
                transit = true;
                flags |= ObsFlags::TRANSIT;
            } else if oflags.contains(IntersectFlags::FOUR_INTERSECTS) {
                four = true;
                flags |= ObsFlags::DOUBLE_PARTIAL;
            }
        }

        // Eclipsed flux of the host star
        let mut ecl_flux = [0.0; 2];
        let mut ecl_rv = [0.0; 2];
        if host != usize::MAX && !total {
            let comp = 1 - host;
            let (h_ell, c_ell) = (&ells[host], &ells[comp]);
            let n_h = self.n_grid[host];
            let run = |kernel_pars: &BrightnessPars| -> Result<f64, ObsFlags> {
                let kernel = RegionKernel::Brightness(kernel_pars);
                if transit {
                    let r = transit_disc(h_ell, c_ell, &kernel, n_h);
                    Ok(r.mean() * overlap_area)
                } else if four {
                    let isect = ell_ell_intersect(h_ell, c_ell);
                    if isect.count != 4 {
                        return Err(flags | ObsFlags::FAIL);
                    }
                    let lobes = double_partial(h_ell, c_ell, &isect.points, &kernel, n_h, N_MIN)
                        .map_err(|_| flags | ObsFlags::FAIL)?;
                    Ok(-(lobes.mean() * (h_ell.area - overlap_area)))
                } else {
                    let isect = ell_ell_intersect(h_ell, c_ell);
                    if isect.count != 2 {
                        return Err(flags | ObsFlags::FAIL);
                    }
                    // small regions keep the relative quadrature error low: integrate
                    // whichever of the lens or the remainder is smaller
                    if overlap_area < 0.5 * h_ell.area {
                        let lens = partial(
                            h_ell,
                            c_ell,
                            isect.points[0],
                            isect.points[1],
                            PartialSide::Eclipsed,
                            &kernel,
                            n_h,
                            N_MIN,
                        )
                        .map_err(|_| flags | ObsFlags::FAIL)?;
                        Ok(lens.mean() * overlap_area)
                    } else {
                        let rest = partial(
                            h_ell,
                            c_ell,
                            isect.points[0],
                            isect.points[1],
                            PartialSide::Uneclipsed,
                            &kernel,
                            n_h,
                            N_MIN,
                        )
                        .map_err(|_| flags | ObsFlags::FAIL)?;
                        Ok(-(rest.mean() * (h_ell.area - overlap_area)))
                    }
                }
            };
            let raw = run(&pars[host])?;
            ecl_flux[host] = if four || (!transit && overlap_area >= 0.5 * h_ell.area) {
                flux_disc[host] + raw
            } else {
                raw
            };
            if self.sys.grid.flux_weighted_rv {
                let raw_rv = run(&pars[host].rv_weighted())?;
                ecl_rv[host] = if four || (!transit && overlap_area >= 0.5 * h_ell.area) {
                    rv_flux[host] + raw_rv
                } else {
                    raw_rv
                };
            }
        }

        // Spot modulation and the eclipsed parts of spots
        let mut spot_flux = [0.0; 2];
        let mut spot_ecl = [0.0; 2];
        for k in 0..2 {
            if self.sys.stars[k].spots.is_empty() {
                continue;
            }
            let ctx = self.spot_context(k, t, theta[k]);
            for spot in &self.sys.stars[k].spots {
                let m = ctx.modulation(spot);
                let deficit = (m.df - 1.0) * flux_disc[k];
                spot_flux[k] += deficit;
                if host == k && !total && m.visibility.is_visible() {
                    let r_loc = shapes[k].radius_towards(ctx.direction(spot));
                    let reduce = Affine2 {
                        linear: crate::math::Matrix2::identity() / r_loc,
                        translation: -ells[k].center / r_loc,
                    };
                    match ells[1 - k].transformed(&reduce) {
                        Ok(comp_scaled) => {
                            match ctx.eclipsed_fraction(spot, &comp_scaled, self.n_grid[k], N_MIN)
                            {
                                Ok(frac) => spot_ecl[k] += frac * deficit,
                                Err(_) => flags |= ObsFlags::FAIL,
                            }
                        }
                        Err(_) => flags |= ObsFlags::FAIL,
                    }
                }
            }
        }

        // Total eclipse: every photon from the host is blocked, spots included
        if total && host != usize::MAX {
            ecl_flux[host] = flux_disc[host] + spot_flux[host];
            ecl_rv[host] = rv_flux[host];
            spot_ecl[host] = 0.0;
        }
        // an eclipsed region cannot out-shine the unspotted disc it hides
        for k in 0..2 {
            spot_ecl[k] = spot_ecl[k].max(-ecl_flux[k]);
        }

        let mut flux = [0.0; 2];
        for k in 0..2 {
            flux[k] = flux_disc[k] + spot_flux[k] - spot_ecl[k] - ecl_flux[k];
        }

        // Simple reflection, attenuated by the eclipsed fraction, never boosted
        let ecl_frac = [
            if flux_disc[0] > 0.0 { ecl_flux[0] / flux_disc[0] } else { 0.0 },
            if flux_disc[1] > 0.0 { ecl_flux[1] / flux_disc[1] } else { 0.0 },
        ];
        let refl = self.reflection(&state, ecl_frac);

        // Doppler boosting from the centre-of-mass velocity
        let mut rv_out = [NOT_SET; 2];
        for k in 0..2 {
            let rv_com = self.k_amp[k]
                * ((state.true_anom[k] + state.omega[k]).cos() + self.ecc * state.omega[k].cos());
            flux[k] *= 1.0 - self.sys.stars[k].boost * rv_com / SPEED_OF_LIGHT_KM_S;
            rv_out[k] = rv_com;
            if self.sys.grid.flux_weighted_rv {
                if flux[k] > 0.0 {
                    rv_out[k] += (rv_flux[k] - ecl_rv[k]) / flux[k];
                } else {
                    rv_out[k] = 0.0;
                }
            }
        }

        let flux_total = (flux[0] + flux[1] + self.flux_3 + refl[0] + refl[1]) / self.fnorm;
        if !flux_total.is_finite() {
            return Err(flags | ObsFlags::FAIL);
        }
        Ok(Observation {
            flux: flux_total,
            flux_1: flux[0] / self.fnorm,
            flux_2: flux[1] / self.fnorm,
            rv_1: rv_out[0],
            rv_2: rv_out[1],
            flags,
        })
    }
}

#[cfg(test)]
mod ut_lightcurve {
    use super::*;

    #[test]
    fn invalid_eccentricity_marks_everything() {
        let mut sys = System::default();
        sys.binary.f_c = 0.8;
        sys.binary.f_s = 0.7;
        let out = lc(&[0.0, 0.25, 0.5], &sys, Verbosity::Silent);
        assert_eq!(out.len(), 3);
        for obs in out {
            assert!(obs.is_bad());
            assert!(obs.flags.contains(ObsFlags::ERROR));
        }
    }

    #[test]
    fn roche_limit_violation_is_fatal() {
        let mut sys = System::default();
        sys.stars[0].radius = 0.55; // beyond L1 for q = 1
        let out = lc(&[0.0], &sys, Verbosity::Silent);
        assert!(out[0].flags.contains(ObsFlags::ERROR));
    }

    #[test]
    fn rv_fast_path_antiphase() {
        let mut sys = System::default();
        sys.binary.a_rsun = 10.0;
        sys.binary.q = 0.5;
        let times: Vec<f64> = (0..8).map(|i| i as f64 / 8.0).collect();
        let out = rv(&times, &sys, Verbosity::Silent);
        // the two stars move in antiphase with amplitude ratio q
        for obs in &out {
            assert!((obs.rv_1 * 0.5 + obs.rv_2 * -0.5 * 0.0).is_finite());
            assert!(
                (obs.rv_1 + 0.5 * -obs.rv_2).abs() < 1e-9
                    || (obs.rv_1 * obs.rv_2 <= 1e-9)
            );
        }
        // quadrature phase: maximum recession of one star, approach of the other
        let quarter = rv(&[0.25], &sys, Verbosity::Silent)[0];
        assert!(quarter.rv_1 * quarter.rv_2 < 0.0);
    }

    #[test]
    fn rv_disabled_without_semi_major_axis() {
        let sys = System::default();
        let out = rv(&[0.1, 0.4], &sys, Verbosity::Silent);
        for obs in out {
            assert_eq!(obs.rv_1, 0.0);
            assert_eq!(obs.rv_2, 0.0);
        }
    }
}
