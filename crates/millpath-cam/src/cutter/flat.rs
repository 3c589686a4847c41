//! Flat end mill: a disk at the tip and a cylindrical shaft.

use millpath_math::Vec3;
use millpath_mesh::Triangle;

use super::Cutter;
use crate::intersect::{
    cylinder_edge, cylinder_point, disk_edge, disk_plane, disk_point, moves_sideways, Hit, Nearest,
};

pub(super) fn intersect(cutter: &Cutter, u: &Vec3, triangle: &Triangle) -> Option<Hit> {
    // Clearance lowers the bottom as well as widening the disk.
    let tip = cutter.location() - Vec3::new(0.0, 0.0, cutter.required_clearance());
    let r = cutter.distance_radius();

    let mut best = Nearest::default();
    best.consider(disk_plane(&tip, r, u, triangle));
    for edge in &triangle.edges {
        best.consider(disk_edge(&tip, r, u, edge));
    }
    for p in &triangle.points {
        best.consider(disk_point(&tip, r, u, p));
    }
    if moves_sideways(u) {
        for edge in &triangle.edges {
            best.consider(cylinder_edge(&tip, r, u, edge));
        }
        for p in &triangle.points {
            best.consider(cylinder_point(&tip, r, u, p));
        }
    }
    best.into_inner()
}
