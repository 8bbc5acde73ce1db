/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use crate::constants::tolerances::ROOT_MERGE_TOL;
use crate::errors::{MathError, MathResult};
use crate::math::{Matrix3, Matrix4};

/// Imaginary parts below this fraction of the eigenvalue magnitude are treated as
/// rounding noise of the Schur decomposition (double real roots surface this way).
const IM_ACCEPT: f64 = 1e-6;

/// Real roots of `a x² + b x + c = 0`, ascending. `None` when the roots are complex.
pub fn quadratic_roots(a: f64, b: f64, c: f64) -> Option<(f64, f64)> {
    if a.abs() < f64::EPSILON * (b.abs() + c.abs()).max(1.0) {
        if b.abs() < f64::EPSILON {
            return None;
        }
        let r = -c / b;
        return Some((r, r));
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    // Citardauq form avoids cancellation for small roots
    let q = -0.5 * (b + b.signum() * disc.sqrt());
    let (r1, r2) = if q.abs() > 0.0 {
        (q / a, c / q)
    } else {
        (0.0, 0.0)
    };
    Some(if r1 <= r2 { (r1, r2) } else { (r2, r1) })
}

/// Real roots of the polynomial `c[0] + c[1] x + c[2] x² + c[3] x³ + c[4] x⁴`,
/// found as the eigenvalues of the companion matrix and polished with Newton steps.
///
/// Returns the roots (ascending, deduplicated) and their count. Roots are merged
/// when they agree to within `ROOT_MERGE_TOL` relative to the coefficient scale,
/// so a tangency (double root) reports once.
pub fn quartic_real_roots(c: [f64; 5]) -> MathResult<([f64; 4], usize)> {
    let scale = c.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return Err(MathError::DomainError {
            value: 0.0,
            msg: "all quartic coefficients are zero",
        });
    }
    // Degree collapse: fall through to the cubic / quadratic paths
    let mut raw = [0.0_f64; 4];
    let mut n_raw = 0;
    if c[4].abs() <= 1e-14 * scale {
        if c[3].abs() <= 1e-14 * scale {
            if let Some((r1, r2)) = quadratic_roots(c[2], c[1], c[0]) {
                raw[0] = r1;
                raw[1] = r2;
                n_raw = 2;
            }
        } else {
            n_raw = cubic_eigen_roots([c[0], c[1], c[2], c[3]], &mut raw);
        }
    } else {
        let a0 = c[0] / c[4];
        let a1 = c[1] / c[4];
        let a2 = c[2] / c[4];
        let a3 = c[3] / c[4];
        let companion = Matrix4::new(
            0.0, 0.0, 0.0, -a0, //
            1.0, 0.0, 0.0, -a1, //
            0.0, 1.0, 0.0, -a2, //
            0.0, 0.0, 1.0, -a3,
        );
        for ev in companion.complex_eigenvalues().iter() {
            if ev.im.abs() <= IM_ACCEPT * (1.0 + ev.re.abs()) {
                raw[n_raw] = ev.re;
                n_raw += 1;
            }
        }
    }

    // Newton polish on the full quartic
    for r in raw.iter_mut().take(n_raw) {
        *r = polish_poly(&c, *r);
    }
    raw[..n_raw].sort_by(|a, b| a.partial_cmp(b).unwrap());

    // Merge near-identical roots
    let span = raw[..n_raw]
        .iter()
        .fold(1.0_f64, |m, v| m.max(v.abs()));
    let mut out = [0.0_f64; 4];
    let mut n = 0;
    for i in 0..n_raw {
        if n == 0 || (raw[i] - out[n - 1]).abs() > ROOT_MERGE_TOL * span {
            out[n] = raw[i];
            n += 1;
        }
    }
    Ok((out, n))
}

fn cubic_eigen_roots(c: [f64; 4], out: &mut [f64; 4]) -> usize {
    let a0 = c[0] / c[3];
    let a1 = c[1] / c[3];
    let a2 = c[2] / c[3];
    let companion = Matrix3::new(
        0.0, 0.0, -a0, //
        1.0, 0.0, -a1, //
        0.0, 1.0, -a2,
    );
    let mut n = 0;
    for ev in companion.complex_eigenvalues().iter() {
        if ev.im.abs() <= IM_ACCEPT * (1.0 + ev.re.abs()) {
            out[n] = ev.re;
            n += 1;
        }
    }
    n
}

fn polish_poly(c: &[f64; 5], x0: f64) -> f64 {
    let mut x = x0;
    for _ in 0..8 {
        let p = (((c[4] * x + c[3]) * x + c[2]) * x + c[1]) * x + c[0];
        let dp = ((4.0 * c[4] * x + 3.0 * c[3]) * x + 2.0 * c[2]) * x + c[1];
        if dp.abs() < f64::EPSILON {
            break;
        }
        let dx = p / dp;
        x -= dx;
        if dx.abs() < 1e-14 * (1.0 + x.abs()) {
            break;
        }
    }
    x
}

/// Bisection on `f` over `[lo, hi]`, requiring a sign change. The shape kernel runs
/// its potential and semi-axis solutions through this.
pub fn bracketed_root<F: FnMut(f64) -> f64>(
    mut f: F,
    mut lo: f64,
    mut hi: f64,
    x_tol: f64,
    action: &'static str,
) -> MathResult<f64> {
    let mut f_lo = f(lo);
    let f_hi = f(hi);
    if f_lo == 0.0 {
        return Ok(lo);
    }
    if f_hi == 0.0 {
        return Ok(hi);
    }
    if f_lo * f_hi > 0.0 {
        return Err(MathError::BracketingFailure { action });
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || (hi - lo).abs() < x_tol {
            return Ok(mid);
        }
        if f_lo * f_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
            f_lo = f_mid;
        }
    }
    Err(MathError::MaxIterationsReached {
        iter: 200,
        action,
    })
}

#[cfg(test)]
mod ut_roots {
    use super::*;

    #[test]
    fn quadratic_both_branches() {
        let (r1, r2) = quadratic_roots(1.0, -3.0, 2.0).unwrap();
        assert!((r1 - 1.0).abs() < 1e-14);
        assert!((r2 - 2.0).abs() < 1e-14);
        assert!(quadratic_roots(1.0, 0.0, 1.0).is_none());
    }

    #[test]
    fn quartic_with_four_known_roots() {
        // (x-1)(x+2)(x-3)(x+4) = x^4 + 2x^3 - 13x^2 - 14x + 24
        let (roots, n) = quartic_real_roots([24.0, -14.0, -13.0, 2.0, 1.0]).unwrap();
        assert_eq!(n, 4);
        for (got, want) in roots.iter().zip([-4.0, -2.0, 1.0, 3.0]) {
            assert!((got - want).abs() < 1e-9, "got {got} want {want}");
        }
    }

    #[test]
    fn quartic_double_root_merges() {
        // (x-1)^2 (x^2+1): only x = 1, twice
        let (roots, n) = quartic_real_roots([1.0, -2.0, 2.0, -2.0, 1.0]).unwrap();
        assert_eq!(n, 1);
        assert!((roots[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn quartic_no_real_roots() {
        // (x^2+1)(x^2+4)
        let (_, n) = quartic_real_roots([4.0, 0.0, 5.0, 0.0, 1.0]).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn bisection_converges() {
        let r = bracketed_root(|x| x * x - 2.0, 0.0, 2.0, 1e-13, "test").unwrap();
        assert!((r - 2.0_f64.sqrt()).abs() < 1e-12);
    }
}
