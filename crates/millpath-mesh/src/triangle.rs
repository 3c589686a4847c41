//! Triangles with precomputed normal, plane, bounds and circumcircle.

use millpath_math::{Point3, Vec3, EPSILON};

use crate::aabb::Aabb;
use crate::edge::Edge;
use crate::model::{EdgeId, PointId, TriangleId};
use crate::plane::Plane;

/// A triangle of the surface model.
///
/// The normal follows the winding `(p3 - p1) x (p2 - p1)`: vertices appear
/// clockwise when viewed from the side the normal points to. Every derived
/// field is computed once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    /// Arena id (0 for triangles built outside a model).
    pub id: TriangleId,
    /// Vertex positions.
    pub points: [Point3; 3],
    /// Arena ids of the vertices.
    pub point_ids: [PointId; 3],
    /// Edges `p1->p2`, `p2->p3`, `p3->p1`.
    pub edges: [Edge; 3],
    /// Unit normal.
    pub normal: Vec3,
    /// Supporting plane.
    pub plane: Plane,
    /// Bounding box.
    pub aabb: Aabb,
    /// Circumcenter.
    pub center: Point3,
    /// Circumradius.
    pub radius: f64,
}

impl Triangle {
    /// Triangle with its normal taken from the vertex winding.
    ///
    /// Returns `None` for a degenerate (zero area) triangle.
    pub fn new(p1: Point3, p2: Point3, p3: Point3) -> Option<Self> {
        let normal = winding_normal(&p1, &p2, &p3)?;
        Some(Self::build(
            TriangleId::default(),
            [PointId::default(); 3],
            [EdgeId::default(); 3],
            [p1, p2, p3],
            normal,
        ))
    }

    /// Triangle with an explicit normal (normalized here).
    ///
    /// Returns `None` if the triangle or the normal is degenerate.
    pub fn with_normal(p1: Point3, p2: Point3, p3: Point3, normal: Vec3) -> Option<Self> {
        winding_normal(&p1, &p2, &p3)?;
        let normal = normal.try_normalize(EPSILON)?;
        Some(Self::build(
            TriangleId::default(),
            [PointId::default(); 3],
            [EdgeId::default(); 3],
            [p1, p2, p3],
            normal,
        ))
    }

    pub(crate) fn build(
        id: TriangleId,
        point_ids: [PointId; 3],
        edge_ids: [EdgeId; 3],
        points: [Point3; 3],
        normal: Vec3,
    ) -> Self {
        let [p1, p2, p3] = points;
        let edges = [
            Edge::with_ids(edge_ids[0], [point_ids[0], point_ids[1]], p1, p2),
            Edge::with_ids(edge_ids[1], [point_ids[1], point_ids[2]], p2, p3),
            Edge::with_ids(edge_ids[2], [point_ids[2], point_ids[0]], p3, p1),
        ];
        let mut aabb = Aabb::new(p1, p2);
        aabb.extend(&p3);
        let (center, radius) = circumcircle(&p1, &p2, &p3);
        Self {
            id,
            points,
            point_ids,
            edges,
            normal,
            plane: Plane::new(p1, normal),
            aabb,
            center,
            radius,
        }
    }

    /// Lowest z of the three vertices.
    pub fn min_z(&self) -> f64 {
        self.aabb.min.z
    }

    /// Highest z of the three vertices.
    pub fn max_z(&self) -> f64 {
        self.aabb.max.z
    }

    /// True if `p` (assumed to lie on the triangle's plane) is inside the
    /// triangle, edges included within [`EPSILON`].
    pub fn contains_point(&self, p: &Point3) -> bool {
        let [a, b, c] = self.points;
        let v0 = c - a;
        let v1 = b - a;
        let v2 = p - a;

        let dot00 = v0.dot(&v0);
        let dot01 = v0.dot(&v1);
        let dot02 = v0.dot(&v2);
        let dot11 = v1.dot(&v1);
        let dot12 = v1.dot(&v2);

        let denom = dot00 * dot11 - dot01 * dot01;
        if denom.abs() < EPSILON * EPSILON {
            return false;
        }
        let u = (dot11 * dot02 - dot01 * dot12) / denom;
        let v = (dot00 * dot12 - dot01 * dot02) / denom;
        u >= -EPSILON && v >= -EPSILON && u + v <= 1.0 + EPSILON
    }
}

fn winding_normal(p1: &Point3, p2: &Point3, p3: &Point3) -> Option<Vec3> {
    (p3 - p1).cross(&(p2 - p1)).try_normalize(EPSILON * EPSILON)
}

fn circumcircle(p1: &Point3, p2: &Point3, p3: &Point3) -> (Point3, f64) {
    let a = p2 - p1;
    let b = p3 - p1;
    let axb = a.cross(&b);
    let denom = 2.0 * axb.norm_squared();
    if denom < EPSILON * EPSILON {
        return (*p1, 0.0);
    }
    let offset = (b * a.norm_squared() - a * b.norm_squared()).cross(&axb) / denom;
    let center = p1 + offset;
    (center, offset.norm())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ridge() -> Triangle {
        Triangle::new(
            Point3::new(-3.0, -4.0, 1.0),
            Point3::new(-3.0, 4.0, 1.0),
            Point3::new(3.0, 0.0, 1.0),
        )
        .unwrap()
    }

    #[test]
    fn test_normal_follows_winding() {
        let t = ridge();
        assert!((t.normal - Vec3::z()).norm() < 1e-12);
        let flipped = Triangle::new(t.points[0], t.points[2], t.points[1]).unwrap();
        assert!((flipped.normal + Vec3::z()).norm() < 1e-12);
    }

    #[test]
    fn test_degenerate_triangle_rejected() {
        let p = Point3::new(0.0, 0.0, 0.0);
        assert!(Triangle::new(p, Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_contains_point() {
        let t = ridge();
        assert!(t.contains_point(&Point3::new(0.0, 0.0, 1.0)));
        assert!(t.contains_point(&Point3::new(-3.0, 0.0, 1.0)));
        assert!(!t.contains_point(&Point3::new(2.9, 3.0, 1.0)));
    }

    #[test]
    fn test_circumcircle() {
        let t = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        )
        .unwrap();
        assert!((t.center - Point3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
        assert!((t.radius - 2.0_f64.sqrt()).abs() < 1e-12);
        for p in &t.points {
            assert!(((p - t.center).norm() - t.radius).abs() < 1e-12);
        }
    }

    #[test]
    fn test_edges_and_bounds() {
        let t = ridge();
        assert!((t.edges[0].length() - 8.0).abs() < 1e-12);
        assert_eq!(t.edges[2].p2, t.points[0]);
        assert_eq!(t.min_z(), 1.0);
        assert_eq!(t.aabb.max.x, 3.0);
    }
}
