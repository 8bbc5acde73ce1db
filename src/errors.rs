/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use snafu::prelude::*;

#[derive(Copy, Clone, PartialEq, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MathError {
    #[snafu(display("prevented a division by zero when {action}"))]
    DivisionByZero { action: &'static str },
    #[snafu(display("{msg}: {value}"))]
    DomainError { value: f64, msg: &'static str },
    #[snafu(display("max iterations reached ({iter}) when {action}"))]
    MaxIterationsReached { iter: usize, action: &'static str },
    #[snafu(display("bracketing failed when {action}"))]
    BracketingFailure { action: &'static str },
}

pub type MathResult<T> = Result<T, MathError>;

#[derive(Copy, Clone, PartialEq, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GeometryError {
    #[snafu(display("{source} encountered in a geometric computation"))]
    GeomMath { source: MathError },
    #[snafu(display("ellipse semi-axes must be strictly positive, got ({semi_major}, {semi_minor})"))]
    DegenerateEllipse { semi_major: f64, semi_minor: f64 },
    #[snafu(display("quadratic form is not an ellipse (discriminant {discriminant})"))]
    NotAnEllipse { discriminant: f64 },
    #[snafu(display("affine transform is singular (determinant {det})"))]
    SingularTransform { det: f64 },
    #[snafu(display("root polish diverged near ({x}, {y})"))]
    RootPolishDiverged { x: f64, y: f64 },
}

pub type GeomResult<T> = Result<T, GeometryError>;

#[derive(Copy, Clone, PartialEq, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ShapeError {
    #[snafu(display("{source} encountered while solving a star shape"))]
    ShapeMath { source: MathError },
    #[snafu(display("radius {radius} exceeds the Roche limit {limit} (units of the semi-major axis)"))]
    RadiusExceedsRocheLobe { radius: f64, limit: f64 },
    #[snafu(display("fluid Love number {h_f} outside the physical range [0, 5/2]"))]
    LoveNumberOutOfRange { h_f: f64 },
    #[snafu(display("star shape solution did not converge when {action}"))]
    NonConvergent { action: &'static str },
}

pub type ShapeResult<T> = Result<T, ShapeError>;

/// Top-level error of the synthesis pipeline. Only setup-time validation surfaces this
/// type; in-loop failures are demoted to per-observation flag bits.
#[derive(Copy, Clone, PartialEq, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LightCurveError {
    #[snafu(display("star {star} shape setup failed: {source}"))]
    StarShape { star: usize, source: ShapeError },
    #[snafu(display("orbit setup failed: {source}"))]
    OrbitSetup { source: MathError },
    #[snafu(display("{msg}: {value}"))]
    InvalidParameter { value: f64, msg: &'static str },
}

pub type LcResult<T> = Result<T, LightCurveError>;
