//! Bull-nose end mill: a flat disk inside a torus corner, plus the shaft.

use millpath_math::Vec3;
use millpath_mesh::Triangle;

use super::Cutter;
use crate::intersect::{
    cylinder_edge, cylinder_point, disk_edge, disk_plane, disk_point, moves_sideways, torus_edge,
    torus_plane, torus_point, Hit, Nearest,
};

pub(super) fn intersect(
    cutter: &Cutter,
    minor_radius: f64,
    u: &Vec3,
    triangle: &Triangle,
) -> Option<Hit> {
    let center = cutter.location() + Vec3::new(0.0, 0.0, minor_radius);
    let major = cutter.radius() - minor_radius;
    let tube = minor_radius + cutter.required_clearance();
    let bottom = center - Vec3::new(0.0, 0.0, tube);
    let r = cutter.distance_radius();

    let mut best = Nearest::default();
    best.consider(torus_plane(&center, major, tube, u, triangle));
    for edge in &triangle.edges {
        best.consider(torus_edge(&center, major, tube, u, edge));
    }
    for p in &triangle.points {
        best.consider(torus_point(&center, major, tube, u, p));
    }
    best.consider(disk_plane(&bottom, major, u, triangle));
    for edge in &triangle.edges {
        best.consider(disk_edge(&bottom, major, u, edge));
    }
    for p in &triangle.points {
        best.consider(disk_point(&bottom, major, u, p));
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
