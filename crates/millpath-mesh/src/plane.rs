//! Infinite planes.

use millpath_math::{Point3, Vec3, EPSILON};

/// A plane through `point` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// A point on the plane.
    pub point: Point3,
    /// Unit normal.
    pub normal: Vec3,
}

impl Plane {
    /// Plane through `point` with the given normal (normalized here).
    pub fn new(point: Point3, normal: Vec3) -> Self {
        let n = normal.norm();
        let normal = if n > 0.0 { normal / n } else { normal };
        Self { point, normal }
    }

    /// Signed distance from `p` to the plane, positive on the normal side.
    pub fn signed_distance(&self, p: &Point3) -> f64 {
        self.normal.dot(&(p - self.point))
    }

    /// Intersect the line `origin + t * dir` with the plane.
    ///
    /// Returns the intersection point and `t`, or `None` when the line is
    /// parallel to the plane.
    pub fn intersect_line(&self, origin: &Point3, dir: &Vec3) -> Option<(Point3, f64)> {
        let denom = self.normal.dot(dir);
        if denom.abs() < EPSILON {
            return None;
        }
        let t = self.normal.dot(&(self.point - origin)) / denom;
        Some((origin + dir * t, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_line() {
        let plane = Plane::new(Point3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, 3.0));
        let (p, t) = plane
            .intersect_line(&Point3::new(1.0, 1.0, 5.0), &Vec3::new(0.0, 0.0, -1.0))
            .unwrap();
        assert!((t - 3.0).abs() < 1e-12);
        assert!((p.z - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_line_misses() {
        let plane = Plane::new(Point3::origin(), Vec3::z());
        assert!(plane
            .intersect_line(&Point3::new(0.0, 0.0, 1.0), &Vec3::x())
            .is_none());
        assert!((plane.signed_distance(&Point3::new(4.0, 0.0, -2.0)) + 2.0).abs() < 1e-12);
    }
}
