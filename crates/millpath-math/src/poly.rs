//! Real roots of low-degree polynomials.
//!
//! Closed forms (Cardano, Ferrari) followed by a few Newton steps on the
//! original polynomial, which recovers the accuracy lost in the resolvent
//! cubic when the torus quartic is badly scaled.

use std::f64::consts::PI;

const DEGENERATE: f64 = 1e-12;
const POLISH_STEPS: usize = 4;

/// Solve `a*x^2 + b*x + c = 0`. Roots are returned in ascending order.
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() < DEGENERATE {
        if b.abs() > DEGENERATE {
            return vec![-c / b];
        }
        return Vec::new();
    }

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }

    // Numerically stable form: avoid cancellation between -b and sqrt(disc).
    let sqrt_disc = disc.sqrt();
    let q = -0.5 * (b + b.signum() * sqrt_disc);
    let mut roots = if q.abs() < DEGENERATE {
        vec![-b / (2.0 * a)]
    } else {
        vec![q / a, c / q]
    };
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() < DEGENERATE);
    roots
}

/// Solve `a*x^3 + b*x^2 + c*x + d = 0`. Roots are returned in ascending order.
pub fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    if a.abs() < DEGENERATE {
        return solve_quadratic(b, c, d);
    }

    let p = b / a;
    let q = c / a;
    let r = d / a;

    // Depressed cubic t^3 + aa*t + bb = 0 via x = t - p/3
    let p2 = p * p;
    let aa = q - p2 / 3.0;
    let bb = r - p * q / 3.0 + 2.0 * p2 * p / 27.0;
    let shift = p / 3.0;

    let delta = bb * bb / 4.0 + aa * aa * aa / 27.0;
    let mut roots = Vec::with_capacity(3);

    if delta > DEGENERATE {
        let sqrt_delta = delta.sqrt();
        let u = (-bb / 2.0 + sqrt_delta).cbrt();
        let v = (-bb / 2.0 - sqrt_delta).cbrt();
        roots.push(u + v - shift);
    } else if delta.abs() <= DEGENERATE {
        if aa.abs() < DEGENERATE && bb.abs() < DEGENERATE {
            roots.push(-shift);
        } else {
            let u = (-bb / 2.0).cbrt();
            roots.push(2.0 * u - shift);
            roots.push(-u - shift);
        }
    } else {
        let m = 2.0 * (-aa / 3.0).sqrt();
        let arg = (3.0 * bb / (aa * m)).clamp(-1.0, 1.0);
        let theta = arg.acos() / 3.0;
        roots.push(m * theta.cos() - shift);
        roots.push(m * (theta - 2.0 * PI / 3.0).cos() - shift);
        roots.push(m * (theta + 2.0 * PI / 3.0).cos() - shift);
    }

    let coeffs = [a, b, c, d];
    for root in roots.iter_mut() {
        *root = polish(&coeffs, *root);
    }
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() < 1e-10);
    roots
}

/// Solve `a*x^4 + b*x^3 + c*x^2 + d*x + e = 0` with Ferrari's method.
///
/// Roots are returned in ascending order with near-duplicates merged.
pub fn solve_quartic(a: f64, b: f64, c: f64, d: f64, e: f64) -> Vec<f64> {
    if a.abs() < DEGENERATE {
        return solve_cubic(b, c, d, e);
    }

    let p = b / a;
    let q = c / a;
    let r = d / a;
    let s = e / a;

    // Depressed quartic y^4 + a2*y^2 + a1*y + a0 = 0 via x = y - p/4
    let p2 = p * p;
    let a2 = q - 3.0 * p2 / 8.0;
    let a1 = r - p * q / 2.0 + p2 * p / 8.0;
    let a0 = s - p * r / 4.0 + p2 * q / 16.0 - 3.0 * p2 * p2 / 256.0;
    let shift = p / 4.0;

    let mut roots = Vec::with_capacity(4);

    if a1.abs() < DEGENERATE {
        // Biquadratic
        for y2 in solve_quadratic(1.0, a2, a0) {
            if y2 >= 0.0 {
                let y = y2.sqrt();
                roots.push(y - shift);
                roots.push(-y - shift);
            } else if y2 > -DEGENERATE {
                roots.push(-shift);
            }
        }
    } else {
        // Resolvent cubic 8u^3 + 8*a2*u^2 + (2*a2^2 - 8*a0)*u - a1^2 = 0
        let u = solve_cubic(8.0, 8.0 * a2, 2.0 * a2 * a2 - 8.0 * a0, -a1 * a1)
            .into_iter()
            .filter(|&u| u > 0.0)
            .fold(0.0_f64, f64::max);
        let sqrt_2u = (2.0 * u).sqrt();
        if sqrt_2u > DEGENERATE {
            let alpha = a2 + 2.0 * u;
            let beta = a1 / sqrt_2u;
            for y in solve_quadratic(1.0, sqrt_2u, (alpha - beta) / 2.0) {
                roots.push(y - shift);
            }
            for y in solve_quadratic(1.0, -sqrt_2u, (alpha + beta) / 2.0) {
                roots.push(y - shift);
            }
        }
    }

    let coeffs = [a, b, c, d, e];
    for root in roots.iter_mut() {
        *root = polish(&coeffs, *root);
    }
    roots.retain(|x| x.is_finite());
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|x, y| (*x - *y).abs() < 1e-10);
    roots
}

/// Evaluate a polynomial (highest degree first) and its derivative.
fn eval(coeffs: &[f64], x: f64) -> (f64, f64) {
    let mut value = 0.0;
    let mut deriv = 0.0;
    for &c in coeffs {
        deriv = deriv * x + value;
        value = value * x + c;
    }
    (value, deriv)
}

/// A few Newton steps, keeping the starting point if they diverge.
fn polish(coeffs: &[f64], x0: f64) -> f64 {
    let (f0, _) = eval(coeffs, x0);
    let mut x = x0;
    for _ in 0..POLISH_STEPS {
        let (f, df) = eval(coeffs, x);
        if df.abs() < DEGENERATE {
            break;
        }
        let next = x - f / df;
        if !next.is_finite() {
            break;
        }
        x = next;
    }
    let (f1, _) = eval(coeffs, x);
    if f1.abs() <= f0.abs() {
        x
    } else {
        x0
    }
}
