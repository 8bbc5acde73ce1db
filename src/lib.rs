#![doc = include_str!("../README.md")]
/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

extern crate log;

pub mod brightness;
pub mod constants;
pub mod errors;
pub mod geometry;
pub mod integrate;
pub mod lightcurve;
pub mod math;
pub mod orbit;
pub mod shape;
pub mod spots;

pub mod prelude {
    pub use crate::brightness::LimbDarkeningLaw;
    pub use crate::errors::{GeometryError, LightCurveError, MathError, ShapeError};
    pub use crate::lightcurve::{
        lc, rv, BinaryPars, GridPars, ObsFlags, Observation, RvObservation, StarPars, System,
        Verbosity,
    };
    pub use crate::shape::ShapeModel;
    pub use crate::spots::Spot;
}

/// Asserts that two floating point values agree to within an absolute tolerance of 1e-10.
#[macro_export]
macro_rules! f64_eq {
    ($x:expr, $val:expr, $msg:expr) => {
        f64_eq_tol!($x, $val, 1e-10, $msg)
    };
}

#[macro_export]
macro_rules! f64_eq_tol {
    ($x:expr, $val:expr, $tol:expr, $msg:expr) => {
        assert!(
            ($x - $val).abs() < $tol,
            "{}: {:.2e}\tgot: {}\twant: {}",
            $msg,
            ($x - $val).abs(),
            $x,
            $val
        )
    };
}
