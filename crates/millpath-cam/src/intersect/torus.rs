//! Torus contacts for the corner of a bull-nose cutter.
//!
//! The torus has a horizontal ring of radius `major` around `center` and a
//! tube of radius `minor`. Point contacts have closed forms for vertical and
//! horizontal travel; any other direction solves the quartic
//! `(|q|^2 + R^2 - r^2)^2 = 4 R^2 (q.x^2 + q.y^2)` along the travel line.
//! Edge contacts are found numerically by sampling the edge.

use millpath_math::{
    horizontal, near_zero, solve_quadratic, solve_quartic, try_normalize, Point3, Vec3, EPSILON,
};
use millpath_mesh::{Edge, Triangle};

use super::{Hit, Nearest};

/// Samples per pass of the edge search.
const EDGE_SAMPLES: usize = 16;

/// Torus against the triangle's plane, through its support point along the
/// plane normal; kept only inside the triangle.
pub fn torus_plane(
    center: &Point3,
    major: f64,
    minor: f64,
    u: &Vec3,
    triangle: &Triangle,
) -> Option<Hit> {
    let n = triangle.normal;
    let approach = n.dot(u);
    if near_zero(approach) {
        return None;
    }
    let v = n * approach.signum();
    let support = match try_normalize(&horizontal(&v)) {
        Some(vh) => center + vh * major + v * minor,
        // Horizontal plane: the whole bottom circle touches; use its centre.
        None => center + v * minor,
    };
    let (cp, t) = triangle.plane.intersect_line(&support, u)?;
    if !triangle.contains_point(&cp) {
        return None;
    }
    Hit::at(cp, t, u)
}

/// Torus against a single point, picking the closed form when one applies.
pub fn torus_point(center: &Point3, major: f64, minor: f64, u: &Vec3, p: &Point3) -> Option<Hit> {
    if near_zero(u.z) {
        torus_point_push(center, major, minor, u, p)
    } else if horizontal(u).norm() < EPSILON {
        torus_point_drop(center, major, minor, u, p)
    } else {
        torus_point_general(center, major, minor, u, p)
    }
}

/// Torus travelling vertically onto a point.
pub fn torus_point_drop(
    center: &Point3,
    major: f64,
    minor: f64,
    u: &Vec3,
    p: &Point3,
) -> Option<Hit> {
    if near_zero(u.z) {
        return None;
    }
    let rho = horizontal(&(p - center)).norm();
    let dz2 = minor * minor - (rho - major) * (rho - major);
    if dz2 < 0.0 {
        return None;
    }
    let surface_z = center.z + u.z.signum() * dz2.sqrt();
    Hit::at(*p, (p.z - surface_z) / u.z, u)
}

/// Torus travelling horizontally onto a point.
pub fn torus_point_push(
    center: &Point3,
    major: f64,
    minor: f64,
    u: &Vec3,
    p: &Point3,
) -> Option<Hit> {
    let uh = horizontal(u);
    let a = uh.norm_squared();
    if a < EPSILON * EPSILON {
        return None;
    }
    let z = p.z - center.z;
    if z.abs() > minor {
        return None;
    }
    // Outer rim of the torus cross-section at the point's height.
    let reach = major + (minor * minor - z * z).sqrt();
    let w = horizontal(&(p - center));
    let t = *solve_quadratic(a, -2.0 * uh.dot(&w), w.norm_squared() - reach * reach).first()?;
    Hit::at(*p, t, u)
}

/// Torus travelling along an arbitrary unit direction onto a point. The
/// smallest non-negative root is the contact; a point the torus has
/// already passed gives none.
pub fn torus_point_general(
    center: &Point3,
    major: f64,
    minor: f64,
    u: &Vec3,
    p: &Point3,
) -> Option<Hit> {
    let w = p - center;
    let r2 = major * major;
    let q = w.norm_squared() + r2 - minor * minor;
    let delta = u.dot(&w);
    let uh = horizontal(u);
    let wh = horizontal(&w);
    let h2 = uh.norm_squared();
    let hd = uh.dot(&wh);
    let hg = wh.norm_squared();

    let roots = solve_quartic(
        1.0,
        -4.0 * delta,
        4.0 * delta * delta + 2.0 * q - 4.0 * r2 * h2,
        -4.0 * delta * q + 8.0 * r2 * hd,
        q * q - 4.0 * r2 * hg,
    );
    let t = roots.into_iter().find(|&t| t >= -EPSILON)?;
    Hit::at(*p, t.max(0.0), u)
}

/// Torus against the interior of an edge.
///
/// Only the stretch of the edge within `major + minor` of the travel line
/// through the centre can be touched. That stretch is sampled, then the
/// bracket around the best sample is sampled again.
pub fn torus_edge(center: &Point3, major: f64, minor: f64, u: &Vec3, edge: &Edge) -> Option<Hit> {
    if edge.is_degenerate() {
        return None;
    }
    let (lo, hi) = reachable_span(center, major + minor, u, edge)?;

    let search = |from: f64, to: f64| {
        let step = (to - from) / EDGE_SAMPLES as f64;
        let mut best = Nearest::default();
        let mut best_s = None;
        for i in 0..=EDGE_SAMPLES {
            let s = from + step * i as f64;
            let hit = torus_point(center, major, minor, u, &edge.point_at(s));
            let before = best.into_inner().map(|h| h.distance);
            best.consider(hit);
            if best.into_inner().map(|h| h.distance) != before {
                best_s = Some(s);
            }
        }
        best_s.zip(best.into_inner()).map(|(s, hit)| (s, hit, step))
    };

    let (s, coarse, step) = search(lo, hi)?;
    match search((s - step).max(lo), (s + step).min(hi)) {
        Some((_, fine, _)) if fine.distance < coarse.distance => Some(fine),
        _ => Some(coarse),
    }
}

/// Arc-length interval of the edge within `reach` of the line through
/// `center` along `u`.
fn reachable_span(center: &Point3, reach: f64, u: &Vec3, edge: &Edge) -> Option<(f64, f64)> {
    let d = edge.dir();
    let offset = edge.p1 - center;
    let a_vec = d - u * d.dot(u);
    let b_vec = offset - u * offset.dot(u);
    let a = a_vec.norm_squared();
    let c = b_vec.norm_squared() - reach * reach;
    let (lo, hi) = if a < EPSILON * EPSILON {
        // Edge parallel to the travel line.
        if c > 0.0 {
            return None;
        }
        (0.0, edge.length())
    } else {
        let roots = solve_quadratic(a, 2.0 * a_vec.dot(&b_vec), c);
        match roots.as_slice() {
            [s0, s1] => (*s0, *s1),
            _ => return None,
        }
    };
    let (lo, hi) = (lo.max(0.0), hi.min(edge.length()));
    (lo <= hi).then_some((lo, hi))
}
