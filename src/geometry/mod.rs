/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

pub mod ellipse;
pub mod intersect;

pub use ellipse::{Ellipse, QuadCoeffs};
pub use intersect::{ell_ell_intersect, ell_ell_overlap, Intersection, IntersectFlags};
