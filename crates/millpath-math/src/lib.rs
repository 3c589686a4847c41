#![warn(missing_docs)]

//! Math types for the millpath toolpath kernel.
//!
//! Thin wrappers around nalgebra providing the point and vector types used
//! by every other crate, the single geometric tolerance, explicit
//! comparator functions built on it, and the polynomial root solvers used
//! by the torus intersection routines.

mod poly;

pub use poly::{solve_cubic, solve_quadratic, solve_quartic};

use std::cmp::Ordering;

use nalgebra::Vector3;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// Tolerance for every "is zero" and "is equal" test in the kernel.
pub const EPSILON: f64 = 1e-6;

/// Returns true if `v` is zero within [`EPSILON`].
#[inline]
pub fn near_zero(v: f64) -> bool {
    v.abs() < EPSILON
}

/// Returns true if `a` and `b` are equal within [`EPSILON`].
#[inline]
pub fn near_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Returns true if two points coincide within [`EPSILON`] on every axis.
#[inline]
pub fn points_near_eq(a: &Point3, b: &Point3) -> bool {
    near_eq(a.x, b.x) && near_eq(a.y, b.y) && near_eq(a.z, b.z)
}

/// Three-way comparison treating values within [`EPSILON`] as equal.
///
/// Not transitive across chains of near-equal values; use [`quantize`]
/// when a total order or a hash key is needed.
pub fn cmp_tolerant(a: f64, b: f64) -> Ordering {
    if near_eq(a, b) {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Rounds a coordinate onto the [`EPSILON`] grid.
#[inline]
pub fn quantize(v: f64) -> i64 {
    (v / EPSILON).round() as i64
}

/// Hashable, totally ordered key for a point on the [`EPSILON`] grid.
///
/// Two points with equal keys are treated as the same point by the mesh
/// arena and the contour stitcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuantKey(pub [i64; 3]);

impl QuantKey {
    /// Key for a point.
    pub fn of(p: &Point3) -> Self {
        Self([quantize(p.x), quantize(p.y), quantize(p.z)])
    }
}

/// Horizontal (xy) part of a vector.
#[inline]
pub fn horizontal(v: &Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, 0.0)
}

/// Normalizes `v`, returning `None` when it is too short to have a direction.
#[inline]
pub fn try_normalize(v: &Vec3) -> Option<Vec3> {
    v.try_normalize(EPSILON * EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_eq() {
        assert!(near_eq(1.0, 1.0 + 1e-8));
        assert!(!near_eq(1.0, 1.0 + 1e-4));
        assert!(near_zero(-5e-7));
    }

    #[test]
    fn test_cmp_tolerant() {
        assert_eq!(cmp_tolerant(1.0, 1.0 + 1e-9), Ordering::Equal);
        assert_eq!(cmp_tolerant(1.0, 2.0), Ordering::Less);
        assert_eq!(cmp_tolerant(3.0, 2.0), Ordering::Greater);
    }

    #[test]
    fn test_quant_key_merges_close_points() {
        let a = Point3::new(1.0, 2.0, 3.0);
        let b = Point3::new(1.0 + 1e-9, 2.0 - 1e-9, 3.0);
        let c = Point3::new(1.0 + 1e-3, 2.0, 3.0);
        assert_eq!(QuantKey::of(&a), QuantKey::of(&b));
        assert_ne!(QuantKey::of(&a), QuantKey::of(&c));
    }

    #[test]
    fn test_try_normalize() {
        assert!(try_normalize(&Vec3::zeros()).is_none());
        let n = try_normalize(&Vec3::new(3.0, 4.0, 0.0)).unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-12);
        assert!(horizontal(&Vec3::new(1.0, 2.0, 3.0)).z == 0.0);
    }
}
