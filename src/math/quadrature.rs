/*
 * UMBRA Toolkit
 * Copyright (C) 2021-onward Christopher Rabotin <christopher.rabotin@gmail.com> et al. (cf. AUTHORS.md)
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Documentation: https://nyxspace.com/
 */

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static GL_CACHE: RefCell<HashMap<usize, (Vec<f64>, Vec<f64>)>> = RefCell::new(HashMap::new());
}

/// Gauss-Legendre abscissas and weights on (-1, 1) for an `n`-point rule.
///
/// Nodes are found by Newton iteration on the Legendre recurrence. Tables are
/// memoized per thread; the node set depends only on `n`, so results stay
/// bit-identical across runs.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    GL_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .entry(n)
            .or_insert_with(|| compute_gauss_legendre(n))
            .clone()
    })
}

fn compute_gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let m = (n + 1) / 2;
    for i in 0..m {
        let mut z = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut pp = 0.0;
        for _ in 0..100 {
            let mut p1 = 1.0;
            let mut p2 = 0.0;
            for j in 1..=n {
                let p3 = p2;
                p2 = p1;
                p1 = ((2.0 * j as f64 - 1.0) * z * p2 - (j as f64 - 1.0) * p3) / j as f64;
            }
            pp = n as f64 * (z * p1 - p2) / (z * z - 1.0);
            let z1 = z;
            z = z1 - p1 / pp;
            if (z - z1).abs() < 3e-14 {
                break;
            }
        }
        nodes[i] = -z;
        nodes[n - 1 - i] = z;
        weights[i] = 2.0 / ((1.0 - z * z) * pp * pp);
        weights[n - 1 - i] = weights[i];
    }
    (nodes, weights)
}

/// Gauss-Legendre integral of `f` over the centred, axis-aligned ellipse with the
/// given semi-axes, using `n` nodes per dimension.
///
/// The whole-disc flux integrals run through here; the ratio of the numerical to
/// the analytic ellipse area (`anorm`) is obtained by integrating the unit function.
pub fn ellgauss<F: FnMut(f64, f64) -> f64>(a_p: f64, b_p: f64, n: usize, mut f: F) -> f64 {
    let (nodes, weights) = gauss_legendre(n);
    let mut total = 0.0;
    for (xi, wi) in nodes.iter().zip(weights.iter()) {
        let x = a_p * xi;
        let h = b_p * (1.0 - xi * xi).max(0.0).sqrt();
        if h == 0.0 {
            continue;
        }
        let mut inner = 0.0;
        for (yj, wj) in nodes.iter().zip(weights.iter()) {
            inner += wj * f(x, h * yj);
        }
        total += wi * inner * h;
    }
    total * a_p
}

/// Two-dimensional Gauss-Legendre integral of `f` with literal x-limits and y-limits
/// given by the two callbacks, evaluated at each x-node.
///
/// The y-node count adapts per x-node to the local span relative to the widest span
/// encountered, bounded to `[n_y_min, n_y_max]`; the selection depends only on the
/// input geometry, keeping results deterministic. Slices where the upper limit dips
/// below the lower one contribute nothing (the caller owns orientation sign fixes).
pub fn gauss2d<F, G, H>(
    n_x: usize,
    mut f: F,
    x_lo: f64,
    x_hi: f64,
    mut g_lo: G,
    mut g_hi: H,
    n_y_min: usize,
    n_y_max: usize,
) -> f64
where
    F: FnMut(f64, f64) -> f64,
    G: FnMut(f64) -> f64,
    H: FnMut(f64) -> f64,
{
    if x_hi <= x_lo {
        return 0.0;
    }
    let (nodes, weights) = gauss_legendre(n_x);
    let x_mid = 0.5 * (x_lo + x_hi);
    let x_half = 0.5 * (x_hi - x_lo);

    // First pass: y-limits at every node, widest span
    let mut limits = Vec::with_capacity(n_x);
    let mut span_max = 0.0_f64;
    for xi in nodes.iter() {
        let x = x_mid + x_half * xi;
        let lo = g_lo(x);
        let hi = g_hi(x);
        let span = (hi - lo).max(0.0);
        span_max = span_max.max(span);
        limits.push((x, lo, span));
    }
    if span_max == 0.0 {
        return 0.0;
    }

    let mut total = 0.0;
    for ((x, y_lo, span), wi) in limits.into_iter().zip(weights.iter()) {
        if span == 0.0 {
            continue;
        }
        let n_y = ((n_y_max as f64 * span / span_max).ceil() as usize).clamp(n_y_min, n_y_max);
        let (y_nodes, y_weights) = gauss_legendre(n_y);
        let y_mid = y_lo + 0.5 * span;
        let y_half = 0.5 * span;
        let mut inner = 0.0;
        for (yj, wj) in y_nodes.iter().zip(y_weights.iter()) {
            inner += wj * f(x, y_mid + y_half * yj);
        }
        total += wi * inner * y_half;
    }
    total * x_half
}

#[cfg(test)]
mod ut_quadrature {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn nodes_are_symmetric_and_weights_sum_to_two() {
        for n in [4, 9, 24, 33] {
            let (x, w) = gauss_legendre(n);
            let wsum: f64 = w.iter().sum();
            assert!((wsum - 2.0).abs() < 1e-13, "n={n}");
            for i in 0..n {
                assert!((x[i] + x[n - 1 - i]).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn ellipse_area_from_unit_function() {
        let area = ellgauss(2.0, 0.5, 48, |_, _| 1.0);
        assert!((area - PI).abs() / PI < 1e-4, "got {area}");
    }

    #[test]
    fn gauss2d_triangle_area() {
        // y from 0 to x over x in (0, 1): area 1/2, exact for polynomial limits
        let area = gauss2d(16, |_, _| 1.0, 0.0, 1.0, |_| 0.0, |x| x, 4, 16);
        assert!((area - 0.5).abs() < 1e-12);
    }

    #[test]
    fn gauss2d_matches_polynomial_moment() {
        // ∫0^1 ∫0^x  x y dy dx = ∫ x^3/2 = 1/8
        let v = gauss2d(16, |x, y| x * y, 0.0, 1.0, |_| 0.0, |x| x, 4, 16);
        assert!((v - 0.125).abs() < 1e-12);
    }
}
