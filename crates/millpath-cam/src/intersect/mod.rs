//! Intersection of moving cutter parts with triangle features.
//!
//! Every routine answers the same question: moving the part along the unit
//! direction `u`, at which signed distance does it first touch the feature?
//! The answer is a [`Hit`] whose `ccp` (cutter contact point, on the part at
//! its current position) satisfies `ccp + distance * u == cp`, with `cp` on
//! the triangle. Degenerate configurations return `None`.
//!
//! Parts:
//! - disk: horizontal, the flat bottom of flat and bull cutters
//! - cylinder: vertical, infinite upward from its base, the shaft
//! - sphere: the tip of a ball cutter
//! - torus: the corner of a bull cutter (see [`torus`])

pub mod torus;

use millpath_math::{horizontal, near_zero, solve_quadratic, try_normalize, Point3, Vec3, EPSILON};
use millpath_mesh::{Edge, Triangle};

pub use torus::{
    torus_edge, torus_plane, torus_point, torus_point_drop, torus_point_general, torus_point_push,
};

/// A contact found by one intersection routine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Touching point on the cutter part, before moving.
    pub ccp: Point3,
    /// Touching point on the triangle.
    pub cp: Point3,
    /// Travel along the direction until contact.
    pub distance: f64,
}

impl Hit {
    /// Hit at `cp` after travelling `distance` along `u`.
    fn at(cp: Point3, distance: f64, u: &Vec3) -> Option<Self> {
        if !distance.is_finite() {
            return None;
        }
        Some(Self {
            ccp: cp - u * distance,
            cp,
            distance,
        })
    }
}

/// The earliest of several candidate hits.
///
/// A later candidate replaces the current one only if it is closer by more
/// than [`EPSILON`], so ties keep evaluation order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nearest(Option<Hit>);

impl Nearest {
    /// Offer a candidate.
    pub fn consider(&mut self, candidate: Option<Hit>) {
        let Some(hit) = candidate else { return };
        match self.0 {
            Some(best) if hit.distance >= best.distance - EPSILON => {}
            _ => self.0 = Some(hit),
        }
    }

    /// The winning hit.
    pub fn into_inner(self) -> Option<Hit> {
        self.0
    }
}

/// True if `u` has a horizontal component, i.e. shaft tests apply.
pub fn moves_sideways(u: &Vec3) -> bool {
    horizontal(u).norm() > EPSILON
}

fn plane_hit(ccp: Point3, u: &Vec3, triangle: &Triangle) -> Option<Hit> {
    let (cp, t) = triangle.plane.intersect_line(&ccp, u)?;
    if !triangle.contains_point(&cp) {
        return None;
    }
    Hit::at(cp, t, u)
}

/// Horizontal disk of `radius` around `center` against the triangle's
/// plane; kept only if the contact lies inside the triangle.
pub fn disk_plane(center: &Point3, radius: f64, u: &Vec3, triangle: &Triangle) -> Option<Hit> {
    let n = triangle.normal;
    let approach = n.dot(u);
    if near_zero(approach) {
        return None;
    }
    let ccp = match try_normalize(&horizontal(&n)) {
        Some(nh) => center + nh * (radius * approach.signum()),
        None => *center,
    };
    plane_hit(ccp, u, triangle)
}

/// Horizontal disk against a single point.
pub fn disk_point(center: &Point3, radius: f64, u: &Vec3, p: &Point3) -> Option<Hit> {
    if near_zero(u.z) {
        return None;
    }
    let t = (p.z - center.z) / u.z;
    let ccp = p - u * t;
    if horizontal(&(ccp - center)).norm() > radius + EPSILON {
        return None;
    }
    Hit::at(*p, t, u)
}

/// Horizontal disk against an edge, touching the disk rim.
pub fn disk_edge(center: &Point3, radius: f64, u: &Vec3, edge: &Edge) -> Option<Hit> {
    if edge.is_degenerate() {
        return None;
    }
    let d = edge.dir();

    if near_zero(d.z) {
        // Horizontal edge: it meets the disk plane all at once.
        if near_zero(u.z) {
            return None;
        }
        let t = (edge.p1.z - center.z) / u.z;
        let moved = center + u * t;
        let cp = edge.closest_point(&moved);
        if horizontal(&(cp - moved)).norm() > radius + EPSILON {
            return None;
        }
        return Hit::at(cp, t, u);
    }

    // Where the edge crosses the disk plane, seen from the cutter, moves
    // along q(t) = q0 + t * v with v horizontal.
    let q0 = edge.p1 + d * ((center.z - edge.p1.z) / d.z);
    let v = horizontal(&(d * (u.z / d.z) - u));
    let a = v.norm_squared();
    if a < EPSILON * EPSILON {
        return None;
    }
    let w = horizontal(&(q0 - center));
    let t = *solve_quadratic(a, 2.0 * v.dot(&w), w.norm_squared() - radius * radius).first()?;
    let s = (q0 + v * t + u * t - edge.p1).dot(&d);
    if s < -EPSILON || s > edge.length() + EPSILON {
        return None;
    }
    Hit::at(edge.point_at(s.clamp(0.0, edge.length())), t, u)
}

/// Vertical cylinder (shaft) against a single point above its base.
pub fn cylinder_point(base: &Point3, radius: f64, u: &Vec3, p: &Point3) -> Option<Hit> {
    let uh = horizontal(u);
    let a = uh.norm_squared();
    if a < EPSILON * EPSILON {
        return None;
    }
    let w = horizontal(&(p - base));
    let t = *solve_quadratic(a, -2.0 * w.dot(&uh), w.norm_squared() - radius * radius).first()?;
    let ccp = p - u * t;
    if ccp.z < base.z - EPSILON {
        return None;
    }
    Hit::at(*p, t, u)
}

/// Vertical cylinder (shaft) against the interior of an edge.
pub fn cylinder_edge(base: &Point3, radius: f64, u: &Vec3, edge: &Edge) -> Option<Hit> {
    let uh = horizontal(u);
    if uh.norm_squared() < EPSILON * EPSILON || edge.is_degenerate() {
        return None;
    }
    let dh = horizontal(&edge.dir());
    let run = dh.norm();
    if run < EPSILON {
        // Vertical edge: its end points are tested as points.
        return None;
    }
    let e = dh / run;
    let n2 = Vec3::new(-e.y, e.x, 0.0);
    let rate = n2.dot(&uh);
    if near_zero(rate) {
        return None;
    }

    // Signed distance from the moving axis to the edge's line, in plan view.
    let d0 = n2.dot(&horizontal(&(base - edge.p1)));
    let t = ((radius - d0) / rate).min((-radius - d0) / rate);
    let axis = base + u * t;
    let side = d0 + t * rate;
    let foot = axis - n2 * side;
    let along = e.dot(&horizontal(&(foot - edge.p1)));
    if along < -EPSILON || along > run + EPSILON {
        return None;
    }
    let cp = edge.point_at((along / run).clamp(0.0, 1.0) * edge.length());
    if cp.z < axis.z - EPSILON {
        return None;
    }
    Hit::at(cp, t, u)
}

/// Sphere against the triangle's plane; kept only inside the triangle.
pub fn sphere_plane(center: &Point3, radius: f64, u: &Vec3, triangle: &Triangle) -> Option<Hit> {
    let n = triangle.normal;
    let approach = n.dot(u);
    if near_zero(approach) {
        return None;
    }
    plane_hit(center + n * (radius * approach.signum()), u, triangle)
}

/// Sphere against a single point.
pub fn sphere_point(center: &Point3, radius: f64, u: &Vec3, p: &Point3) -> Option<Hit> {
    let w = p - center;
    let b = u.dot(&w);
    let disc = b * b - w.norm_squared() + radius * radius;
    if disc < 0.0 {
        return None;
    }
    Hit::at(*p, b - disc.sqrt(), u)
}

/// Sphere against the interior of an edge.
pub fn sphere_edge(center: &Point3, radius: f64, u: &Vec3, edge: &Edge) -> Option<Hit> {
    if edge.is_degenerate() {
        return None;
    }
    let d = edge.dir();
    let offset = center - edge.p1;
    let a_vec = u - d * u.dot(&d);
    let b_vec = offset - d * offset.dot(&d);
    let a = a_vec.norm_squared();
    if a < EPSILON * EPSILON {
        return None;
    }
    let t = *solve_quadratic(
        a,
        2.0 * a_vec.dot(&b_vec),
        b_vec.norm_squared() - radius * radius,
    )
    .first()?;
    let s = (center + u * t - edge.p1).dot(&d);
    if s < -EPSILON || s > edge.length() + EPSILON {
        return None;
    }
    Hit::at(edge.point_at(s.clamp(0.0, edge.length())), t, u)
}
