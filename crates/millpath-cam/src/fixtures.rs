//! Test geometry shared by the generator tests.

use millpath_math::Point3;

use crate::cutter::CutterShape;

/// One cutter of each shape, outer radius 1.
pub fn shapes() -> [CutterShape; 3] {
    [
        CutterShape::Flat { radius: 1.0 },
        CutterShape::Ball { radius: 1.0 },
        CutterShape::Bull {
            radius: 1.0,
            minor_radius: 0.25,
        },
    ]
}

/// Two triangles of a quad listed counter-clockwise as seen from the side
/// its normal should face.
pub fn quad(a: Point3, b: Point3, c: Point3, d: Point3) -> [[Point3; 3]; 2] {
    [[a, c, b], [a, d, c]]
}

/// Upward-facing square `[min, max]^2` at height `z`.
pub fn floor(min: f64, max: f64, z: f64) -> [[Point3; 3]; 2] {
    quad(
        Point3::new(min, min, z),
        Point3::new(max, min, z),
        Point3::new(max, max, z),
        Point3::new(min, max, z),
    )
}

/// Ridge roof `z = 1 - |x| / 2` over `[-2, 2]^2`.
pub fn roof() -> Vec<[Point3; 3]> {
    let mut triangles = Vec::new();
    triangles.extend(quad(
        Point3::new(-2.0, -2.0, 0.0),
        Point3::new(0.0, -2.0, 1.0),
        Point3::new(0.0, 2.0, 1.0),
        Point3::new(-2.0, 2.0, 0.0),
    ));
    triangles.extend(quad(
        Point3::new(0.0, -2.0, 1.0),
        Point3::new(2.0, -2.0, 0.0),
        Point3::new(2.0, 2.0, 0.0),
        Point3::new(0.0, 2.0, 1.0),
    ));
    triangles
}

/// Closed box with outward normals.
pub fn cuboid(min: Point3, max: Point3) -> Vec<[Point3; 3]> {
    let v = |x: usize, y: usize, z: usize| {
        Point3::new(
            if x == 0 { min.x } else { max.x },
            if y == 0 { min.y } else { max.y },
            if z == 0 { min.z } else { max.z },
        )
    };
    let faces = [
        [v(0, 0, 0), v(0, 1, 0), v(1, 1, 0), v(1, 0, 0)],
        [v(0, 0, 1), v(1, 0, 1), v(1, 1, 1), v(0, 1, 1)],
        [v(0, 0, 0), v(1, 0, 0), v(1, 0, 1), v(0, 0, 1)],
        [v(0, 1, 0), v(0, 1, 1), v(1, 1, 1), v(1, 1, 0)],
        [v(0, 0, 0), v(0, 0, 1), v(0, 1, 1), v(0, 1, 0)],
        [v(1, 0, 0), v(1, 1, 0), v(1, 1, 1), v(1, 0, 1)],
    ];
    faces
        .into_iter()
        .flat_map(|[a, b, c, d]| quad(a, b, c, d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use millpath_mesh::Model;

    #[test]
    fn test_cuboid_normals_point_outward() {
        let min = Point3::new(-1.0, -2.0, 0.0);
        let max = Point3::new(1.0, 2.0, 3.0);
        let model = Model::from_triangles(cuboid(min, max));
        assert_eq!(model.len(), 12);
        let center = nalgebra::center(&min, &max);
        for triangle in model.triangles() {
            assert!(triangle.normal.dot(&(triangle.center - center)) > 0.0);
        }
    }
}
