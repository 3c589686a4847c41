//! Ball end mill: a sphere at the tip and a cylindrical shaft from its
//! centre up.

use millpath_math::Vec3;
use millpath_mesh::Triangle;

use super::Cutter;
use crate::intersect::{
    cylinder_edge, cylinder_point, moves_sideways, sphere_edge, sphere_plane, sphere_point, Hit,
    Nearest,
};

pub(super) fn intersect(cutter: &Cutter, u: &Vec3, triangle: &Triangle) -> Option<Hit> {
    let center = cutter.location() + Vec3::new(0.0, 0.0, cutter.radius());
    let r = cutter.distance_radius();

    let mut best = Nearest::default();
    best.consider(sphere_plane(&center, r, u, triangle));
    for edge in &triangle.edges {
        best.consider(sphere_edge(&center, r, u, edge));
    }
    for p in &triangle.points {
        best.consider(sphere_point(&center, r, u, p));
    }
    if moves_sideways(u) {
        for edge in &triangle.edges {
            best.consider(cylinder_edge(&center, r, u, edge));
        }
        for p in &triangle.points {
            best.consider(cylinder_point(&center, r, u, p));
        }
    }
    best.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutter::{CutterShape, CutterSpec};
    use approx::assert_relative_eq;
    use millpath_math::Point3;

    #[test]
    fn test_drop_onto_vertex_and_edge() {
        let mut cutter = Cutter::new(&CutterSpec {
            shape: CutterShape::Ball { radius: 1.0 },
            required_clearance: 0.0,
        })
        .unwrap();
        // Steep triangle whose peak vertex sticks up at the origin.
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(-3.0, 3.0, -10.0),
            Point3::new(-3.0, -3.0, -10.0),
        )
        .unwrap();
        cutter.moveto(Point3::new(0.6, 0.0, 10.0));
        let hit = intersect(&cutter, &Vec3::new(0.0, 0.0, -1.0), &tri).unwrap();
        // Sphere of radius 1 over a point 0.6 away rests 0.8 above it.
        assert_relative_eq!(hit.cp.z, 2.0, epsilon = 1e-9);
        assert_relative_eq!(cutter.location().z - hit.distance, 2.0 + 0.8 - 1.0, epsilon = 1e-9);
    }
}
