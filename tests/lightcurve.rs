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

use approx::assert_relative_eq;

use umbra::prelude::*;

fn base_system() -> System {
    let mut sys = System::default();
    sys.binary.period = 1.0;
    sys.binary.incl_deg = 90.0;
    sys.binary.sb_ratio = 0.5;
    sys.stars[0].radius = 0.1;
    sys.stars[1].radius = 0.1;
    sys
}

#[test]
fn kepler_round_trip_property() {
    for ecc in [0.0, 0.3, 0.7, 0.94] {
        for i in 0..32 {
            let m = TAU * i as f64 / 32.0;
            let e_anom = umbra::orbit::eccentric_anomaly(m, ecc).unwrap();
            let back = umbra::orbit::mean_from_eccentric(e_anom, ecc).rem_euclid(TAU);
            let delta = (back - m).abs().min(TAU - (back - m).abs());
            assert!(delta < 1e-10, "ecc={ecc} m={m}");
        }
    }
}

#[test]
fn circular_twin_geometry() {
    let sys = base_system();
    let out = lc(&[0.0, 0.25, 0.5, 0.75], &sys, Verbosity::Silent);

    // out of eclipse the normalization pins the total flux to one
    assert_relative_eq!(out[1].flux, 1.0, epsilon = 1e-9);
    assert_relative_eq!(out[3].flux, 1.0, epsilon = 1e-9);

    // star 1 in front at t_zero: the fainter-surface star 2 is eclipsed
    assert!(out[0].flags.contains(ObsFlags::ECLIPSE));
    assert!(out[0].flags.contains(ObsFlags::STAR2_ECLIPSED));
    assert!(out[2].flags.contains(ObsFlags::STAR1_ECLIPSED));

    // equal radii, surface brightness ratio 1/2: expected depths are analytic
    assert_relative_eq!(out[0].flux, 1.0 / 1.5, max_relative = 2e-3);
    assert_relative_eq!(out[2].flux, 0.5 / 1.5, max_relative = 2e-3);
    // the deeper eclipse hides the brighter surface
    assert!(out[2].flux < out[0].flux);
}

#[test]
fn eclipse_window_classification_is_consistent() {
    let sys = base_system();
    let near_t0: Vec<f64> = vec![-0.02, -0.01, 0.0, 0.01, 0.02];
    for obs in lc(&near_t0, &sys, Verbosity::Silent) {
        assert!(obs.flags.contains(ObsFlags::ECLIPSE));
        assert!(obs.flags.contains(ObsFlags::STAR2_ECLIPSED));
        assert!(!obs.flags.contains(ObsFlags::STAR1_ECLIPSED));
    }
    let near_half: Vec<f64> = vec![0.48, 0.5, 0.52];
    for obs in lc(&near_half, &sys, Verbosity::Silent) {
        assert!(obs.flags.contains(ObsFlags::STAR1_ECLIPSED));
    }
}

#[test]
fn small_star_occulted_is_total() {
    let mut sys = base_system();
    sys.stars[0].radius = 0.2;
    sys.stars[1].radius = 0.05;
    let out = lc(&[0.0, 0.25], &sys, Verbosity::Silent);
    let flags = out[0].flags;
    assert!(flags.contains(ObsFlags::ECLIPSE));
    assert!(flags.contains(ObsFlags::STAR2_ECLIPSED));
    assert!(flags.contains(ObsFlags::TOTAL));
    // during occultation only star 1 remains
    let f1 = std::f64::consts::PI * 0.2 * 0.2;
    let f2 = 0.5 * std::f64::consts::PI * 0.05 * 0.05;
    assert_relative_eq!(out[0].flux, f1 / (f1 + f2), max_relative = 1e-3);
    assert_relative_eq!(out[1].flux, 1.0, epsilon = 1e-9);
}

#[test]
fn small_star_in_front_is_a_transit() {
    let mut sys = base_system();
    sys.stars[0].radius = 0.05;
    sys.stars[1].radius = 0.2;
    let out = lc(&[0.0], &sys, Verbosity::Silent);
    let flags = out[0].flags;
    assert!(flags.contains(ObsFlags::ECLIPSE));
    assert!(flags.contains(ObsFlags::STAR2_ECLIPSED));
    assert!(flags.contains(ObsFlags::TRANSIT));
    assert!(!flags.contains(ObsFlags::TOTAL));
    assert!(out[0].flux < 1.0);
}

#[test]
fn totality_plateau_conserves_flux() {
    let mut sys = base_system();
    sys.stars[0].radius = 0.2;
    sys.stars[1].radius = 0.05;
    // inner contact at |sin 2πφ| = 0.15: the plateau spans |φ| < 0.024
    let times = [-0.02, -0.01, 0.0, 0.01, 0.02];
    let out = lc(&times, &sys, Verbosity::Silent);
    for obs in &out {
        assert!(obs.flags.contains(ObsFlags::TOTAL));
        assert_relative_eq!(obs.flux, out[2].flux, epsilon = 1e-9);
    }
}

#[test]
fn third_light_identity_at_t_zero() {
    let mut sys = base_system();
    sys.binary.incl_deg = 60.0; // no eclipses at all
    sys.binary.light_3 = 0.3;
    let out = lc(&[0.0, 0.3], &sys, Verbosity::Silent);
    for obs in &out {
        assert!(!obs.flags.contains(ObsFlags::ECLIPSE));
        assert_relative_eq!(obs.flux, 1.0, epsilon = 1e-9);
        let flux_3 = obs.flux - obs.flux_1 - obs.flux_2;
        assert_relative_eq!(flux_3, 0.3, epsilon = 1e-9);
    }
}

#[test]
fn apsidal_motion_drifts_the_eclipse() {
    let mut sys = base_system();
    sys.stars[0].radius = 0.05;
    sys.stars[1].radius = 0.05;
    sys.binary.f_c = 0.3_f64.sqrt(); // e = 0.3, ω₀ = 0
    sys.binary.domega_dt_deg = 1.0;

    // locate the flux minimum of the primary eclipse following the given cycle
    let minimum = |cycle: f64| -> f64 {
        let window: Vec<f64> = (0..600)
            .map(|i| cycle + 0.8 + 0.3 * i as f64 / 600.0)
            .collect();
        let out = lc(&window, &sys, Verbosity::Silent);
        let mut best = (f64::INFINITY, 0.0);
        for (t, obs) in window.iter().zip(out.iter()) {
            if obs.flux < best.0 {
                best = (obs.flux, *t);
            }
        }
        assert!(best.0 < 1.0 - 1e-4, "no eclipse found near cycle {cycle}");
        best.1 - cycle
    };

    let first = minimum(0.0);
    let late = minimum(20.0);
    // 20° of apsidal advance moves the eclipse by tens of millidays
    assert!(
        (late - first).abs() > 5e-3,
        "no apsidal drift: {first} vs {late}"
    );
}

#[test]
fn four_intersection_double_partial() {
    let mut sys = base_system();
    sys.binary.sb_ratio = 1.0;
    sys.stars[0].radius = 0.3;
    sys.stars[0].shape = ShapeModel::Love;
    sys.stars[0].love_number = 2.5;
    sys.stars[1].radius = 0.287;
    let out = lc(&[0.0, 0.25], &sys, Verbosity::Silent);
    let flags = out[0].flags;
    assert!(flags.contains(ObsFlags::ECLIPSE), "flags {flags:?}");
    assert!(flags.contains(ObsFlags::STAR2_ECLIPSED));
    assert!(flags.contains(ObsFlags::DOUBLE_PARTIAL), "flags {flags:?}");
    // strictly between the no-eclipse and fully-occulted extremes
    let if_total = 1.0 - out[1].flux_2;
    assert!(out[0].flux < 1.0 - 1e-3);
    assert!(out[0].flux > if_total + 1e-3);
}

#[test]
fn tabulated_limb_darkening_matches_linear() {
    let mut tab = base_system();
    let grid: Vec<f64> = (0..101).map(|i| i as f64 / 100.0).collect();
    tab.stars[0].ld = LimbDarkeningLaw::MuGrid(grid);
    tab.stars[1].ld = LimbDarkeningLaw::Linear(1.0);
    let mut lin = base_system();
    lin.stars[0].ld = LimbDarkeningLaw::Linear(1.0);
    lin.stars[1].ld = LimbDarkeningLaw::Linear(1.0);

    let times: Vec<f64> = (0..40).map(|i| i as f64 / 40.0).collect();
    let out_tab = lc(&times, &tab, Verbosity::Silent);
    let out_lin = lc(&times, &lin, Verbosity::Silent);
    for (a, b) in out_tab.iter().zip(out_lin.iter()) {
        assert_relative_eq!(a.flux, b.flux, epsilon = 1e-7);
    }
}

#[test]
fn light_time_symmetry_for_twins() {
    let mut sys = base_system();
    sys.binary.a_rsun = 200.0;
    sys.binary.q = 1.0;
    for delta in [0.005, 0.01, 0.02] {
        let out = lc(&[-delta, delta], &sys, Verbosity::Silent);
        assert_relative_eq!(out[0].flux, out[1].flux, epsilon = 1e-6);
    }
}

#[test]
fn sub_observer_spot_dip_matches_projected_area() {
    let mut spotted = base_system();
    spotted.binary.incl_deg = 60.0; // keep the spot test eclipse-free
    spotted.binary.sb_ratio = 1.0;
    // the sub-observer point at t_zero sits at latitude 30°, longitude 180°
    spotted.stars[0].spots.push(Spot {
        latitude_deg: 30.0,
        longitude_deg: 180.0,
        radius_deg: 10.0,
        brightness: 0.0,
    });
    let out = lc(&[0.0, 0.5], &spotted, Verbosity::Silent);
    // normalization absorbs the spot at t_zero
    assert_relative_eq!(out[0].flux, 1.0, epsilon = 1e-6);
    // half a cycle later the spot has rotated out of view: the flux ratio is the
    // analytic dip of a dark spot of angular radius γ at the disc centre
    let gamma = 10.0_f64.to_radians();
    let want = 2.0 / (2.0 - gamma.sin().powi(2));
    assert_relative_eq!(out[1].flux, want, max_relative = 1e-4);
}

#[test]
fn spots_on_a_totally_eclipsed_star_leave_no_trace() {
    let mut sys = base_system();
    sys.stars[0].radius = 0.2;
    sys.stars[1].radius = 0.05;
    // facing the observer at t_zero (star 2's sub-observer meridian)
    sys.stars[1].spots.push(Spot {
        latitude_deg: 0.0,
        longitude_deg: 0.0,
        radius_deg: 20.0,
        brightness: 0.3,
    });
    // all light of star 2 (spots included) is blocked during totality
    let out = lc(&[-0.005, 0.0, 0.005], &sys, Verbosity::Silent);
    for obs in &out {
        assert!(obs.flags.contains(ObsFlags::TOTAL));
        assert_relative_eq!(obs.flux, out[1].flux, epsilon = 1e-6);
        assert!(obs.flux_2.abs() < 1e-9);
    }
}

#[test]
fn rossiter_mclaughlin_anomaly_is_antisymmetric() {
    let mut sys = base_system();
    sys.binary.a_rsun = 5.0;
    sys.grid.flux_weighted_rv = true;
    sys.stars[1].vsini_kms = 100.0;
    sys.stars[1].ld = LimbDarkeningLaw::Linear(0.6);

    // out of eclipse the rotational flux-weighting cancels by symmetry
    let quiet = lc(&[0.25], &sys, Verbosity::Silent)[0];
    let k2 = quiet.rv_2.abs();
    assert!(k2 > 10.0, "orbital motion expected, got {k2}");

    // in partial phases the hidden hemisphere biases the velocity
    let out = lc(&[-0.02, 0.02], &sys, Verbosity::Silent);
    let kepler = |t: f64| {
        // remove the orbital contribution measured with weighting disabled
        let mut plain = sys.clone();
        plain.grid.flux_weighted_rv = false;
        lc(&[t], &plain, Verbosity::Silent)[0].rv_2
    };
    let anom_pre = out[0].rv_2 - kepler(-0.02);
    let anom_post = out[1].rv_2 - kepler(0.02);
    assert!(anom_pre.abs() > 1.0, "no anomaly: {anom_pre}");
    assert!(
        (anom_pre + anom_post).abs() < 0.2 * anom_pre.abs() + 0.5,
        "anomaly not antisymmetric: {anom_pre} vs {anom_post}"
    );
}

#[test]
fn doppler_boosting_skews_the_quadratures() {
    let mut sys = base_system();
    sys.binary.a_rsun = 10.0;
    sys.stars[0].boost = 5.0;
    let out = lc(&[0.25, 0.75], &sys, Verbosity::Silent);
    // star 1 recedes at first quadrature: boosting dims it there
    assert!(out[1].flux > out[0].flux);
    assert!(out[0].rv_1 > 0.0);
    assert!(out[1].rv_1 < 0.0);
}

#[test]
fn heating_brightens_the_far_conjunction() {
    let mut sys = base_system();
    sys.binary.incl_deg = 60.0; // no eclipses
    sys.stars[1].heating = umbra::lightcurve::Heating {
        h0: 1.0,
        h1: 1.0,
        u_h: 0.0,
    };
    let out = lc(&[0.0, 0.5], &sys, Verbosity::Silent);
    // the heated face of star 2 points at star 1: visible near t_zero, hidden
    // half a cycle later
    assert!(out[0].flux > out[1].flux);
}

#[test]
fn simple_reflection_modulates_out_of_eclipse() {
    let mut sys = base_system();
    sys.binary.incl_deg = 60.0;
    // disabled heating exponent with a reflection amplitude
    sys.stars[0].heating = umbra::lightcurve::Heating {
        h0: 0.5,
        h1: 0.0,
        u_h: 0.0,
    };
    let out = lc(&[0.0, 0.25, 0.5], &sys, Verbosity::Silent);
    assert_relative_eq!(out[0].flux, 1.0, epsilon = 1e-9);
    // reflection off star 1 peaks when star 1 is behind (t_zero + P/2)
    assert!(out[2].flux > out[1].flux);
}

#[test]
fn rv_fast_path_matches_amplitude_ratio() {
    let mut sys = base_system();
    sys.binary.a_rsun = 10.0;
    sys.binary.q = 0.5;
    let out = rv(&[0.25], &sys, Verbosity::Silent)[0];
    // antiphase motion with amplitude ratio 1/q
    assert!(out.rv_1 > 0.0);
    assert_relative_eq!(out.rv_2 / out.rv_1, -2.0, max_relative = 1e-2);
}
