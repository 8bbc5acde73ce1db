/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

/// Speed of light in kilometers per second (km/s)
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// Nominal solar radius in kilometers (IAU 2015 Resolution B3)
pub const SUN_RADIUS_KM: f64 = 695_700.0;

/// Number of SI seconds per day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Light travel time across one nominal solar radius, in days
pub const SUN_RADIUS_LIGHT_DAYS: f64 = SUN_RADIUS_KM / (SPEED_OF_LIGHT_KM_S * SECONDS_PER_DAY);

/// Sentinel filling the scalar output columns of an observation that could not be computed.
/// The flag word of such an observation carries the reason.
pub const BAD_DBLE: f64 = -1.0e20;

/// Internal sentinel for a velocity that has not been computed (yet)
pub const NOT_SET: f64 = -9.9e20;

pub mod tolerances {
    /// Convergence tolerance on the eccentric anomaly, in radians
    pub const KEPLER_TOL: f64 = 1e-12;

    /// Iteration cap of the Kepler solver
    pub const KEPLER_MAX_ITER: usize = 60;

    /// Relative tolerance on the volume of the ellipsoid approximating a star
    pub const VOLUME_REL_TOL: f64 = 1e-6;

    /// An ellipse-ellipse overlap below this fraction of the smaller ellipse area
    /// is reported as no overlap at all.
    pub const OVERLAP_ATOL: f64 = 1e-5;

    /// Convergence tolerance of the two-dimensional Newton polish on an
    /// ellipse-ellipse intersection point, relative to the ellipse scale.
    pub const POLISH_TOL: f64 = 1e-12;

    /// Iteration cap of the intersection root polish
    pub const POLISH_MAX_ITER: usize = 25;

    /// Apparent spot latitudes below this value (radians) trigger the two-run
    /// interpolation of the spot eclipse geometry, which is unstable at the limb.
    pub const SPOT_BETA_LIM: f64 = 1e-2;

    /// Two quartic roots closer than this (relative to the coefficient scale)
    /// are merged into a single root.
    pub const ROOT_MERGE_TOL: f64 = 1e-7;
}
