//! Straight edges between two points.

use millpath_math::{Point3, Vec3, EPSILON};

use crate::model::{EdgeId, PointId};

/// A straight edge with its direction and length computed at construction.
///
/// Ids are meaningful only for edges owned by a [`Model`](crate::Model).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Arena id of this edge.
    pub id: EdgeId,
    /// Arena ids of the two end points.
    pub point_ids: [PointId; 2],
    /// Start point.
    pub p1: Point3,
    /// End point.
    pub p2: Point3,
    dir: Vec3,
    length: f64,
}

impl Edge {
    /// Edge from `p1` to `p2`.
    pub fn new(p1: Point3, p2: Point3) -> Self {
        Self::with_ids(EdgeId::default(), [PointId::default(); 2], p1, p2)
    }

    pub(crate) fn with_ids(id: EdgeId, point_ids: [PointId; 2], p1: Point3, p2: Point3) -> Self {
        let delta = p2 - p1;
        let length = delta.norm();
        let dir = if length > EPSILON {
            delta / length
        } else {
            Vec3::zeros()
        };
        Self {
            id,
            point_ids,
            p1,
            p2,
            dir,
            length,
        }
    }

    /// Unit direction from `p1` to `p2`; zero for a degenerate edge.
    pub fn dir(&self) -> Vec3 {
        self.dir
    }

    /// Edge length.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// True if the edge is too short to have a direction.
    pub fn is_degenerate(&self) -> bool {
        self.length <= EPSILON
    }

    /// Point at arc length `s` from `p1`.
    pub fn point_at(&self, s: f64) -> Point3 {
        self.p1 + self.dir * s
    }

    /// Closest point on the (clamped) edge to `p`.
    pub fn closest_point(&self, p: &Point3) -> Point3 {
        let s = (p - self.p1).dot(&self.dir).clamp(0.0, self.length);
        self.point_at(s)
    }
}
