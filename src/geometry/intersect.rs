/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use bitflags::bitflags;
use log::trace;

use crate::constants::tolerances::{OVERLAP_ATOL, POLISH_MAX_ITER, POLISH_TOL};
use crate::math::{roots, wrap_two_pi, Vector2};

use super::ellipse::Ellipse;

bitflags! {
    /// Outcome of an ellipse-ellipse intersection or overlap computation
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct IntersectFlags: u16 {
        const TWO_INTERSECTS = 1 << 0;
        const FOUR_INTERSECTS = 1 << 1;
        const ONE_INSIDE_TWO = 1 << 2;
        const TWO_INSIDE_ONE = 1 << 3;
        const IDENTICAL = 1 << 4;
        const NO_OVERLAP = 1 << 5;
        const WARN_INACCURATE = 1 << 6;
        const ERROR = 1 << 7;
    }
}

/// Real intersections of two ellipses plus the topology flags. Only the first
/// `count` entries of `points` are meaningful.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Intersection {
    pub count: usize,
    pub points: [Vector2; 4],
    pub flags: IntersectFlags,
}

/// Finds the real intersections of two ellipses by eliminating y between the two
/// implicit quadratics (Bézout resultant, a quartic in x) and polishing each
/// surviving candidate with a two-dimensional Newton iteration.
///
/// A failed polish sets `ERROR` but still reports the unpolished point: the caller
/// decides whether to fail the observation.
pub fn ell_ell_intersect(e1: &Ellipse, e2: &Ellipse) -> Intersection {
    let mut flags = IntersectFlags::default();

    // Identical conics: the canonical coefficient scaling makes this a direct compare
    let (c1, c2) = (&e1.coeffs, &e2.coeffs);
    let ident_tol = 1e-9;
    if (c1.a - c2.a).abs() < ident_tol
        && (c1.b - c2.b).abs() < ident_tol
        && (c1.c - c2.c).abs() < ident_tol
        && (c1.d - c2.d).abs() < ident_tol
        && (c1.e - c2.e).abs() < ident_tol
        && (c1.f - c2.f).abs() < ident_tol
    {
        return Intersection {
            count: 0,
            points: [Vector2::zeros(); 4],
            flags: IntersectFlags::IDENTICAL,
        };
    }

    // Both conics as quadratics in y: c y² + (b x + e) y + (a x² + d x + f)
    // Bézout resultant of the pair, a quartic in x:
    //   (p₂q₀ - p₀q₂)² - (p₂q₁ - p₁q₂)(p₁q₀ - p₀q₁)
    let u = [
        c1.c * c2.f - c1.f * c2.c,
        c1.c * c2.d - c1.d * c2.c,
        c1.c * c2.a - c1.a * c2.c,
    ]; // p₂q₀ - p₀q₂, ascending in x
    let v = [
        c1.c * c2.e - c1.e * c2.c,
        c1.c * c2.b - c1.b * c2.c,
    ]; // p₂q₁ - p₁q₂
    let w = [
        c1.e * c2.f - c1.f * c2.e,
        c1.e * c2.d - c1.d * c2.e + c1.b * c2.f - c1.f * c2.b,
        c1.e * c2.a - c1.a * c2.e + c1.b * c2.d - c1.d * c2.b,
        c1.b * c2.a - c1.a * c2.b,
    ]; // p₁q₀ - p₀q₁

    let mut quartic = [0.0_f64; 5];
    for (i, ui) in u.iter().enumerate() {
        for (j, uj) in u.iter().enumerate() {
            quartic[i + j] += ui * uj;
        }
    }
    for (i, vi) in v.iter().enumerate() {
        for (j, wj) in w.iter().enumerate() {
            quartic[i + j] -= vi * wj;
        }
    }

    let scale = e1.semi_major.max(e2.semi_major);
    let mut pts: Vec<Vector2> = Vec::with_capacity(4);
    match roots::quartic_real_roots(quartic) {
        Ok((xs, n)) => {
            for &x in xs.iter().take(n) {
                for y in y_candidates(c1, x) {
                    let p0 = Vector2::new(x, y);
                    // candidate must lie close to the second conic before polishing
                    if !p0[0].is_finite()
                        || !p0[1].is_finite()
                        || c2.evaluate(p0).abs() > 1e-2
                    {
                        continue;
                    }
                    match polish(e1, e2, p0, scale) {
                        Ok(p) => push_unique(&mut pts, p, 1e-6 * scale),
                        // a candidate the polish cannot land is only a failure when
                        // it sat on both conics to begin with
                        Err(_) if residual(e1, e2, p0) < 1e-3 => {
                            flags |= IntersectFlags::ERROR;
                            push_unique(&mut pts, p0, 1e-6 * scale);
                        }
                        Err(_) => {}
                    }
                }
            }
        }
        Err(_) => {
            flags |= IntersectFlags::ERROR;
        }
    }

    // A tangency can surface as an odd count: drop the worst residual and warn
    if pts.len() % 2 == 1 {
        flags |= IntersectFlags::WARN_INACCURATE;
        let worst = pts
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                residual(e1, e2, **a)
                    .partial_cmp(&residual(e1, e2, **b))
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap();
        pts.remove(worst);
    }
    pts.truncate(4);

    match pts.len() {
        2 => flags |= IntersectFlags::TWO_INTERSECTS,
        4 => flags |= IntersectFlags::FOUR_INTERSECTS,
        0 => {
            // No boundary crossing: containment is decided by the centres
            if e2.contains(e1.center) {
                flags |= IntersectFlags::ONE_INSIDE_TWO;
            } else if e1.contains(e2.center) {
                flags |= IntersectFlags::TWO_INSIDE_ONE;
            } else {
                flags |= IntersectFlags::NO_OVERLAP;
            }
        }
        n => {
            trace!("unexpected intersection count {n}");
            flags |= IntersectFlags::WARN_INACCURATE;
        }
    }

    let mut points = [Vector2::zeros(); 4];
    for (slot, p) in points.iter_mut().zip(pts.iter()) {
        *slot = *p;
    }
    Intersection {
        count: pts.len(),
        points,
        flags,
    }
}

fn y_candidates(c: &super::ellipse::QuadCoeffs, x: f64) -> Vec<f64> {
    let qa = c.c;
    let qb = c.b * x + c.e;
    let qc = (c.a * x + c.d) * x + c.f;
    match roots::quadratic_roots(qa, qb, qc) {
        Some((y1, y2)) => {
            if (y1 - y2).abs() > 0.0 {
                vec![y1, y2]
            } else {
                vec![y1]
            }
        }
        // grazing in y: take the vertex of the parabola
        None => vec![-qb / (2.0 * qa)],
    }
}

fn residual(e1: &Ellipse, e2: &Ellipse, p: Vector2) -> f64 {
    e1.coeffs.evaluate(p).abs() + e2.coeffs.evaluate(p).abs()
}

fn polish(e1: &Ellipse, e2: &Ellipse, start: Vector2, scale: f64) -> Result<Vector2, ()> {
    let mut p = start;
    for _ in 0..POLISH_MAX_ITER {
        let f1 = e1.coeffs.evaluate(p);
        let f2 = e2.coeffs.evaluate(p);
        if f1.abs() + f2.abs() < POLISH_TOL.max(1e-13) {
            return Ok(p);
        }
        let (c1, c2) = (&e1.coeffs, &e2.coeffs);
        let j11 = 2.0 * c1.a * p[0] + c1.b * p[1] + c1.d;
        let j12 = c1.b * p[0] + 2.0 * c1.c * p[1] + c1.e;
        let j21 = 2.0 * c2.a * p[0] + c2.b * p[1] + c2.d;
        let j22 = c2.b * p[0] + 2.0 * c2.c * p[1] + c2.e;
        let det = j11 * j22 - j12 * j21;
        if det.abs() < 1e-300 {
            return Err(());
        }
        let dx = (f1 * j22 - f2 * j12) / det;
        let dy = (f2 * j11 - f1 * j21) / det;
        p[0] -= dx;
        p[1] -= dy;
        if dx.abs() + dy.abs() > 10.0 * scale {
            return Err(());
        }
        if dx.abs() + dy.abs() < 1e-15 * scale {
            return Ok(p);
        }
    }
    // settled close enough without hitting the tolerance: accept if on both curves
    if residual(e1, e2, p) < 1e-8 {
        Ok(p)
    } else {
        Err(())
    }
}

fn push_unique(pts: &mut Vec<Vector2>, p: Vector2, tol: f64) {
    if pts.iter().all(|q| (q - p).norm() > tol) {
        pts.push(p);
    }
}

/// Area of the overlap of two ellipses: the convex region bounded by alternating
/// elliptical arcs between the intersection points, or the full smaller ellipse in
/// the containment cases. Any overlap below `OVERLAP_ATOL` relative to the smaller
/// ellipse reports as `NO_OVERLAP` with zero area.
pub fn ell_ell_overlap(e1: &Ellipse, e2: &Ellipse) -> (f64, IntersectFlags) {
    let isect = ell_ell_intersect(e1, e2);
    let mut flags = isect.flags;

    let raw = if flags.contains(IntersectFlags::IDENTICAL) {
        e1.area
    } else if isect.count == 0 {
        if flags.contains(IntersectFlags::ONE_INSIDE_TWO) {
            e1.area
        } else if flags.contains(IntersectFlags::TWO_INSIDE_ONE) {
            e2.area
        } else {
            0.0
        }
    } else {
        arcs_area(e1, e2, &isect.points[..isect.count], &mut flags)
    };

    if raw < OVERLAP_ATOL * e1.area.min(e2.area) {
        (0.0, flags | IntersectFlags::NO_OVERLAP)
    } else {
        (raw, flags)
    }
}

/// Shoelace polygon of the intersection points (sorted counter-clockwise about
/// their centroid) plus, per edge, the segment of whichever ellipse's arc between
/// the two points lies inside the other ellipse.
fn arcs_area(e1: &Ellipse, e2: &Ellipse, pts: &[Vector2], flags: &mut IntersectFlags) -> f64 {
    let mut sorted: Vec<Vector2> = pts.to_vec();
    let centroid =
        sorted.iter().fold(Vector2::zeros(), |acc, p| acc + p) / sorted.len() as f64;
    sorted.sort_by(|a, b| {
        let aa = (a[1] - centroid[1]).atan2(a[0] - centroid[0]);
        let ab = (b[1] - centroid[1]).atan2(b[0] - centroid[0]);
        aa.partial_cmp(&ab).unwrap()
    });

    let n = sorted.len();
    let mut area = 0.0;
    // polygon part (zero for the two-point lens)
    for i in 0..n {
        let p = sorted[i];
        let q = sorted[(i + 1) % n];
        area += 0.5 * (p[0] * q[1] - q[0] * p[1]);
    }
    // arc segments
    for i in 0..n {
        let p = sorted[i];
        let q = sorted[(i + 1) % n];
        if let Some(seg) = segment_inside(e1, p, q, e2) {
            area += seg;
        } else if let Some(seg) = segment_inside(e2, p, q, e1) {
            area += seg;
        } else {
            // both arc midpoints classified outside: grazing geometry
            *flags |= IntersectFlags::WARN_INACCURATE;
        }
    }
    area.max(0.0)
}

/// Segment between the counter-clockwise arc of `on` from `p` to `q` and the chord,
/// provided that arc lies inside `other`
fn segment_inside(on: &Ellipse, p: Vector2, q: Vector2, other: &Ellipse) -> Option<f64> {
    let psi_p = on.param_of(p);
    let psi_q = on.param_of(q);
    let sweep = wrap_two_pi(psi_q - psi_p);
    if sweep == 0.0 {
        return Some(0.0);
    }
    let mid = on.point_at(psi_p + 0.5 * sweep);
    if other.contains(mid) {
        Some(0.5 * on.semi_major * on.semi_minor * (sweep - sweep.sin()))
    } else {
        None
    }
}
