/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use log::{trace, warn};

use crate::brightness::BrightnessPars;
use crate::errors::{GeomResult, GeometryError};
use crate::geometry::ellipse::QuadCoeffs;
use crate::geometry::Ellipse;
use crate::math::quadrature::{ellgauss, gauss2d};
use crate::math::{roots::quadratic_roots, Affine2, Matrix2, Vector2};

/// Integrand of a region integral: the surface-brightness kernel, the indicator of
/// a third ellipse (used by the spot eclipse sub-engine), or the unit function.
pub enum RegionKernel<'a> {
    Brightness(&'a BrightnessPars),
    Indicator(&'a Ellipse),
    Unit,
}

/// Which part of the host disc a partial integration covers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartialSide {
    /// The lens covered by the companion
    Eclipsed,
    /// The host disc minus the lens
    Uneclipsed,
}

/// A region integral and the matching numerical area. Multiplying the mean by an
/// analytic area cancels the first-order quadrature bias shared by both integrals.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RegionFlux {
    pub flux: f64,
    pub area: f64,
}

impl RegionFlux {
    /// Area-weighted average of the integrand over the region
    pub fn mean(&self) -> f64 {
        if self.area > 0.0 {
            self.flux / self.area
        } else {
            0.0
        }
    }

    /// Diagnostic pass before the result reaches the orchestrator: a negative
    /// area or a non-finite flux points at a degenerate region construction
    fn checked(self, what: &str) -> Self {
        if self.area < 0.0 || !self.flux.is_finite() {
            warn!(
                "{what} integral is degenerate: area={}, flux={}",
                self.area, self.flux
            );
        }
        self
    }
}

/// Whole-disc integral of the kernel over a projected ellipse, in its principal
/// frame. Returns the flux and the numerical area whose ratio to `e.area` is the
/// `anorm` bias correction.
pub fn whole_disc(e: &Ellipse, pars: &BrightnessPars, n_grid: usize) -> RegionFlux {
    let p = pars.in_principal_frame(e.rotation);
    RegionFlux {
        flux: ellgauss(e.semi_major, e.semi_minor, n_grid, |s, t| p.evaluate(s, t)),
        area: ellgauss(e.semi_major, e.semi_minor, n_grid, |_, _| 1.0),
    }
}

/// Host brightness integrated over the whole companion disc: the transit case,
/// where the eclipsed region is exactly the companion silhouette. The integration
/// runs in the companion's principal frame with the coordinate transform into
/// host-centred sky coordinates enabled.
pub fn transit_disc(
    host: &Ellipse,
    comp: &Ellipse,
    kernel: &RegionKernel,
    n_grid: usize,
) -> RegionFlux {
    let (sin_r, cos_r) = comp.rotation.sin_cos();
    let linear = Matrix2::new(cos_r, -sin_r, sin_r, cos_r);
    let eval = prepare(kernel, linear, comp.center, host.center);
    RegionFlux {
        flux: ellgauss(comp.semi_major, comp.semi_minor, n_grid, |s, t| eval(s, t)),
        area: ellgauss(comp.semi_major, comp.semi_minor, n_grid, |_, _| 1.0),
    }
}

/// Two-intersection partial eclipse integrator.
///
/// Axes: g along the chord through the two intersection points, f perpendicular,
/// origin at the chord midpoint, f positive towards the host apex that lies inside
/// the companion. The curvilinear regions are bounded in g by the conic sections
/// re-expressed in chord coordinates.
///
/// `Eclipsed` covers the lens in two sub-regions joined at the chord (host side
/// and companion side); `Uneclipsed` covers the host disc minus the lens in three
/// sub-regions (far cap, and the two strips between the conics). The integration
/// grid shrinks with the f-extent of each sub-region, never below `n_min`.
pub fn partial(
    host: &Ellipse,
    comp: &Ellipse,
    p1: Vector2,
    p2: Vector2,
    side: PartialSide,
    kernel: &RegionKernel,
    n_grid: usize,
    n_min: usize,
) -> GeomResult<RegionFlux> {
    let chord = p2 - p1;
    let len = chord.norm();
    if len < 1e-14 * host.semi_major {
        return Ok(RegionFlux::default());
    }
    let mid = 0.5 * (p1 + p2);
    let mut g_hat = chord / len;
    let mut f_hat = Vector2::new(g_hat[1], -g_hat[0]);

    // Orient f towards the host apex interior to the companion
    {
        let frame = chord_frame(host, comp, f_hat, g_hat, mid)?;
        let (fh_lo, fh_hi) = frame.host_f_roots()?;
        let apex_hi_inside = comp.contains(mid + f_hat * fh_hi);
        let apex_lo_inside = comp.contains(mid + f_hat * fh_lo);
        let f_a = match (apex_hi_inside, apex_lo_inside) {
            (true, false) => fh_hi,
            (false, true) => fh_lo,
            // grazing: fall back to the apex closer to the chord
            _ => {
                if fh_hi.abs() < fh_lo.abs() {
                    fh_hi
                } else {
                    fh_lo
                }
            }
        };
        if f_a < 0.0 {
            f_hat = -f_hat;
            g_hat = -g_hat;
        }
    }

    let frame = chord_frame(host, comp, f_hat, g_hat, mid)?;
    let (fh_lo, fh_hi) = frame.host_f_roots()?;
    let (fc_lo, _) = frame.comp_f_roots()?;
    // host apex inside companion now at positive f, companion apex at negative f
    let f_a = fh_hi;
    let f_b = fc_lo.max(fh_lo);
    let f_far = fh_lo;

    let eval = prepare(kernel, frame.linear, mid, host.center);
    let host_q = frame.host_c.coeffs;
    let comp_q = frame.comp_c.coeffs;

    let scale = host.semi_major;
    let mut out = RegionFlux::default();
    match side {
        PartialSide::Eclipsed => {
            // host-arc side of the lens
            out.accumulate(
                &eval,
                &host_q,
                None,
                0.0,
                f_a,
                grid_for(n_grid, n_min, f_a.abs(), scale),
                n_min,
            );
            // companion-arc side
            out.accumulate(
                &eval,
                &comp_q,
                None,
                f_b,
                0.0,
                grid_for(n_grid, n_min, f_b.abs(), scale),
                n_min,
            );
        }
        PartialSide::Uneclipsed => {
            // far cap of the host, beyond the companion apex
            out.accumulate(
                &eval,
                &host_q,
                None,
                f_far,
                f_b,
                grid_for(n_grid, n_min, (f_b - f_far).abs(), scale),
                n_min,
            );
            // strips between the companion and host boundaries
            let n_strip = grid_for(n_grid, n_min, f_b.abs(), scale);
            out.accumulate(&eval, &host_q, Some((&comp_q, StripSide::Low)), f_b, 0.0, n_strip, n_min);
            out.accumulate(&eval, &host_q, Some((&comp_q, StripSide::High)), f_b, 0.0, n_strip, n_min);
        }
    }
    Ok(out.checked("partial eclipse region"))
}

/// Four-intersection integrator: the host disc minus the companion splits into two
/// lens-shaped lobes, each bounded by one chord of the cyclically sorted
/// intersection points. A chord bounds a host lobe when, probing radially outwards
/// through the chord midpoint, the companion boundary is hit before the host
/// boundary. Each qualifying lobe is integrated like a partial region and
/// accumulated; the result covers the *uneclipsed* part of the host.
pub fn double_partial(
    host: &Ellipse,
    comp: &Ellipse,
    points: &[Vector2; 4],
    kernel: &RegionKernel,
    n_grid: usize,
    n_min: usize,
) -> GeomResult<RegionFlux> {
    let mut sorted = *points;
    let centroid = (sorted[0] + sorted[1] + sorted[2] + sorted[3]) / 4.0;
    sorted.sort_by(|a, b| {
        let aa = (a[1] - centroid[1]).atan2(a[0] - centroid[0]);
        let ab = (b[1] - centroid[1]).atan2(b[0] - centroid[0]);
        aa.partial_cmp(&ab).unwrap()
    });

    let scale = host.semi_major;
    let mut out = RegionFlux::default();
    for i in 0..4 {
        let p = sorted[i];
        let q = sorted[(i + 1) % 4];
        let chord = q - p;
        let len = chord.norm();
        if len < 1e-14 * scale {
            continue;
        }
        let mid = 0.5 * (p + q);
        let g_hat = chord / len;
        let mut f_hat = Vector2::new(g_hat[1], -g_hat[0]);
        if f_hat.dot(&(mid - centroid)) < 0.0 {
            f_hat = -f_hat;
        }
        let frame = chord_frame(host, comp, f_hat, g_hat, mid)?;
        let (_, fh_plus) = frame.host_f_roots()?;
        let (_, fc_plus) = frame.comp_f_roots()?;
        if fh_plus <= 0.0 || fc_plus <= 0.0 || fh_plus <= fc_plus {
            // the lobe beyond this chord belongs to the companion
            continue;
        }
        let eval = prepare(kernel, frame.linear, mid, host.center);
        let host_q = frame.host_c.coeffs;
        let comp_q = frame.comp_c.coeffs;
        let n_strip = grid_for(n_grid, n_min, fc_plus, scale);
        out.accumulate(&eval, &host_q, Some((&comp_q, StripSide::Low)), 0.0, fc_plus, n_strip, n_min);
        out.accumulate(&eval, &host_q, Some((&comp_q, StripSide::High)), 0.0, fc_plus, n_strip, n_min);
        out.accumulate(
            &eval,
            &host_q,
            None,
            fc_plus,
            fh_plus,
            grid_for(n_grid, n_min, fh_plus - fc_plus, scale),
            n_min,
        );
    }
    Ok(out.checked("double-partial lobe"))
}

/// Integral over the part of `bounding` beyond the chord (p1, p2), on the side of
/// `outward`. The spot eclipse sub-engine composes limb caps out of these: circle
/// cap minus spot-ellipse cap.
pub fn chord_region(
    bounding: &Ellipse,
    p1: Vector2,
    p2: Vector2,
    outward: Vector2,
    kernel: &RegionKernel,
    n_grid: usize,
    n_min: usize,
) -> GeomResult<RegionFlux> {
    let chord = p2 - p1;
    let len = chord.norm();
    if len < 1e-14 * bounding.semi_major {
        return Ok(RegionFlux::default());
    }
    let mid = 0.5 * (p1 + p2);
    let g_hat = chord / len;
    let mut f_hat = Vector2::new(g_hat[1], -g_hat[0]);
    if f_hat.dot(&outward) < 0.0 {
        f_hat = -f_hat;
    }
    let linear = Matrix2::from_columns(&[f_hat, g_hat]);
    let to_sky = Affine2 {
        linear,
        translation: mid,
    };
    let bound_c = bounding.transformed(&to_sky.inverse()?)?;
    let (_, f_apex) = f_axis_roots(&bound_c)?;
    if f_apex <= 0.0 {
        return Ok(RegionFlux::default());
    }
    let eval = prepare(kernel, linear, mid, bounding.center);
    let q = bound_c.coeffs;
    let mut out = RegionFlux::default();
    out.accumulate(
        &eval,
        &q,
        None,
        0.0,
        f_apex,
        grid_for(n_grid, n_min, f_apex, bounding.semi_major),
        n_min,
    );
    Ok(out.checked("chord cap"))
}

#[derive(Copy, Clone)]
enum StripSide {
    Low,
    High,
}

impl RegionFlux {
    /// Adds the integral over `f ∈ (x_lo, x_hi)` with g bounded by the host conic,
    /// or, for a strip, between the companion conic and the host conic on one side.
    #[allow(clippy::too_many_arguments)]
    fn accumulate(
        &mut self,
        eval: &dyn Fn(f64, f64) -> f64,
        host_q: &QuadCoeffs,
        strip: Option<(&QuadCoeffs, StripSide)>,
        x_lo: f64,
        x_hi: f64,
        n_x: usize,
        n_min: usize,
    ) {
        if x_hi <= x_lo {
            return;
        }
        let (g_lo, g_hi): (Box<dyn FnMut(f64) -> f64>, Box<dyn FnMut(f64) -> f64>) = match strip
        {
            None => (
                Box::new(|f| g_roots(host_q, f).0),
                Box::new(|f| g_roots(host_q, f).1),
            ),
            Some((comp_q, StripSide::Low)) => (
                Box::new(|f| g_roots(host_q, f).0),
                Box::new(|f| g_roots(comp_q, f).0),
            ),
            Some((comp_q, StripSide::High)) => (
                Box::new(|f| g_roots(comp_q, f).1),
                Box::new(|f| g_roots(host_q, f).1),
            ),
        };
        self.flux += gauss2d(n_x, |f, g| eval(f, g), x_lo, x_hi, g_lo, g_hi, n_min, n_x);
        let (a_lo, a_hi): (Box<dyn FnMut(f64) -> f64>, Box<dyn FnMut(f64) -> f64>) = match strip
        {
            None => (
                Box::new(|f| g_roots(host_q, f).0),
                Box::new(|f| g_roots(host_q, f).1),
            ),
            Some((comp_q, StripSide::Low)) => (
                Box::new(|f| g_roots(host_q, f).0),
                Box::new(|f| g_roots(comp_q, f).0),
            ),
            Some((comp_q, StripSide::High)) => (
                Box::new(|f| g_roots(comp_q, f).1),
                Box::new(|f| g_roots(host_q, f).1),
            ),
        };
        self.area += gauss2d(n_x, |_, _| 1.0, x_lo, x_hi, a_lo, a_hi, n_min, n_x);
    }
}

/// Both conics re-expressed in the chord coordinate frame
struct ChordFrame {
    linear: Matrix2,
    host_c: Ellipse,
    comp_c: Ellipse,
}

impl ChordFrame {
    fn host_f_roots(&self) -> GeomResult<(f64, f64)> {
        f_axis_roots(&self.host_c)
    }

    fn comp_f_roots(&self) -> GeomResult<(f64, f64)> {
        f_axis_roots(&self.comp_c)
    }
}

fn chord_frame(
    host: &Ellipse,
    comp: &Ellipse,
    f_hat: Vector2,
    g_hat: Vector2,
    mid: Vector2,
) -> GeomResult<ChordFrame> {
    let linear = Matrix2::from_columns(&[f_hat, g_hat]);
    let to_sky = Affine2 {
        linear,
        translation: mid,
    };
    let inv = to_sky.inverse()?;
    Ok(ChordFrame {
        linear,
        host_c: host.transformed(&inv)?,
        comp_c: comp.transformed(&inv)?,
    })
}

/// Crossings of the f-axis (g = 0) with a conic in chord coordinates, ascending.
/// The chord midpoint lies inside both conics, so two real roots must exist.
fn f_axis_roots(e: &Ellipse) -> GeomResult<(f64, f64)> {
    e.line_intersections(Vector2::zeros(), Vector2::new(1.0, 0.0))
        .ok_or(GeometryError::RootPolishDiverged { x: 0.0, y: 0.0 })
}

/// g-extent of a conic at abscissa f: the two roots of its quadratic in g, or the
/// tangent value twice when the discriminant dips below zero at the region edge
fn g_roots(q: &QuadCoeffs, f: f64) -> (f64, f64) {
    let qa = q.c;
    let qb = q.b * f + q.e;
    let qc = (q.a * f + q.d) * f + q.f;
    match quadratic_roots(qa, qb, qc) {
        Some(r) => r,
        None => {
            let v = -qb / (2.0 * qa);
            (v, v)
        }
    }
}

fn grid_for(n_grid: usize, n_min: usize, extent: f64, scale: f64) -> usize {
    let wanted = (n_grid as f64 * (extent / scale).min(1.0)).ceil() as usize;
    if wanted < n_min {
        trace!("sub-region grid held at the {n_min}-node floor (extent {extent:.3e})");
    }
    wanted.clamp(n_min, n_grid)
}

fn prepare<'a>(
    kernel: &'a RegionKernel,
    linear: Matrix2,
    mid: Vector2,
    host_center: Vector2,
) -> Box<dyn Fn(f64, f64) -> f64 + 'a> {
    match kernel {
        RegionKernel::Brightness(pars) => {
            let p = pars.with_region_transform(Affine2 {
                linear,
                translation: mid - host_center,
            });
            Box::new(move |f, g| p.evaluate(f, g))
        }
        RegionKernel::Indicator(other) => {
            let t = Affine2 {
                linear,
                translation: mid,
            };
            Box::new(move |f, g| {
                if other.contains(t.apply(Vector2::new(f, g))) {
                    1.0
                } else {
                    0.0
                }
            })
        }
        RegionKernel::Unit => Box::new(|_, _| 1.0),
    }
}

#[cfg(test)]
mod ut_integrate {
    use super::*;
    use crate::geometry::{ell_ell_intersect, ell_ell_overlap};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn lens_area_matches_overlap() {
        let a = Ellipse::circle(1.0, Vector2::zeros()).unwrap();
        let b = Ellipse::circle(1.0, Vector2::new(1.0, 0.0)).unwrap();
        let isect = ell_ell_intersect(&a, &b);
        assert_eq!(isect.count, 2);
        let region = partial(
            &a,
            &b,
            isect.points[0],
            isect.points[1],
            PartialSide::Eclipsed,
            &RegionKernel::Unit,
            24,
            4,
        )
        .unwrap();
        let (analytic, _) = ell_ell_overlap(&a, &b);
        assert_relative_eq!(region.area, analytic, max_relative = 1e-3);
        assert_relative_eq!(region.flux, region.area, epsilon = 1e-12);
    }

    #[test]
    fn eclipsed_plus_uneclipsed_covers_the_disc() {
        let a = Ellipse::new(1.2, 0.8, Vector2::zeros(), 0.3).unwrap();
        let b = Ellipse::circle(0.9, Vector2::new(1.0, 0.2)).unwrap();
        let isect = ell_ell_intersect(&a, &b);
        assert_eq!(isect.count, 2);
        let lens = partial(
            &a,
            &b,
            isect.points[0],
            isect.points[1],
            PartialSide::Eclipsed,
            &RegionKernel::Unit,
            32,
            4,
        )
        .unwrap();
        let rest = partial(
            &a,
            &b,
            isect.points[0],
            isect.points[1],
            PartialSide::Uneclipsed,
            &RegionKernel::Unit,
            32,
            4,
        )
        .unwrap();
        assert_relative_eq!(lens.area + rest.area, a.area, max_relative = 2e-3);
    }

    #[test]
    fn double_partial_lobes_complement_the_overlap() {
        // wide and tall ellipse crossing at four points
        let wide = Ellipse::new(2.0, 1.0, Vector2::zeros(), 0.0).unwrap();
        let tall = Ellipse::new(2.0, 1.0, Vector2::zeros(), 0.5 * PI).unwrap();
        let isect = ell_ell_intersect(&wide, &tall);
        assert_eq!(isect.count, 4);
        let lobes = double_partial(
            &wide,
            &tall,
            &isect.points,
            &RegionKernel::Unit,
            32,
            4,
        )
        .unwrap();
        let (overlap, _) = ell_ell_overlap(&wide, &tall);
        assert_relative_eq!(lobes.area, wide.area - overlap, max_relative = 2e-3);
    }

    #[test]
    fn indicator_kernel_counts_covered_fraction() {
        // lens of two unit circles, indicator of a half-plane-like big ellipse
        let a = Ellipse::circle(1.0, Vector2::zeros()).unwrap();
        let b = Ellipse::circle(1.0, Vector2::new(1.0, 0.0)).unwrap();
        let everything = Ellipse::circle(50.0, Vector2::zeros()).unwrap();
        let isect = ell_ell_intersect(&a, &b);
        let region = partial(
            &a,
            &b,
            isect.points[0],
            isect.points[1],
            PartialSide::Eclipsed,
            &RegionKernel::Indicator(&everything),
            24,
            4,
        )
        .unwrap();
        assert_relative_eq!(region.mean(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn transit_region_area_is_companion_area() {
        let host = Ellipse::circle(1.0, Vector2::zeros()).unwrap();
        let comp = Ellipse::circle(0.2, Vector2::new(0.1, 0.05)).unwrap();
        let r = transit_disc(&host, &comp, &RegionKernel::Unit, 24);
        assert_relative_eq!(r.area, comp.area, max_relative = 1e-3);
    }
}
