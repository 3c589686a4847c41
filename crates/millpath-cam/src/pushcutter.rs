//! Push cutter: horizontal sweeps at fixed height.
//!
//! Every triangle near a sweep line blocks an interval of cutter
//! locations along it. The interval starts where the cutter, pushed
//! forward from before the triangle, first touches it, and ends where the
//! cutter, pushed back from beyond it, first touches it. What remains of
//! the line after removing all blocked intervals is safe to cut.

use millpath_math::{cmp_tolerant, EPSILON};
use millpath_mesh::Model;

use crate::cutter::{Cutter, CutterSpec};
use crate::error::Result;
use crate::tasks::PushLine;

/// Collision-free intervals of a sweep line, in increasing order.
pub fn free_intervals(model: &Model, spec: &CutterSpec, line: &PushLine) -> Result<Vec<(f64, f64)>> {
    let mut cutter = Cutter::new(spec)?;
    let blocked = merge(blocked_intervals(model, &mut cutter, line));

    let mut free = Vec::new();
    let mut cursor = line.start;
    for (lo, hi) in blocked {
        if hi < line.start || lo > line.end {
            continue;
        }
        if lo - cursor > EPSILON {
            free.push((cursor, lo));
        }
        cursor = cursor.max(hi);
    }
    if line.end - cursor > EPSILON {
        free.push((cursor, line.end));
    }
    Ok(free)
}

/// Blocked interval of every triangle near the line, unsorted.
fn blocked_intervals(model: &Model, cutter: &mut Cutter, line: &PushLine) -> Vec<(f64, f64)> {
    let r = cutter.distance_radius();
    let forward = line.axis.unit();
    let backward = -forward;

    let (lo, hi) = (line.start - r, line.end + r);
    let low_corner = line.axis.point(lo, line.across - r, line.z);
    let high_corner = line.axis.point(hi, line.across + r, line.z);
    let candidates = model.triangles_in_xy(low_corner.x, high_corner.x, low_corner.y, high_corner.y);

    let mut intervals = Vec::new();
    for triangle in candidates {
        // Nothing below the tip can be touched.
        if triangle.max_z() < line.z - EPSILON {
            continue;
        }
        let (min, max) = line.axis.spans(&triangle.aabb).0;

        let before = min - r - 1.0;
        cutter.moveto(line.axis.point(before, line.across, line.z));
        let Some(enter) = cutter.intersect(&forward, triangle) else {
            continue;
        };

        let beyond = max + r + 1.0;
        cutter.moveto(line.axis.point(beyond, line.across, line.z));
        let Some(exit) = cutter.intersect(&backward, triangle) else {
            continue;
        };

        let (a, b) = (before + enter.distance, beyond - exit.distance);
        intervals.push((a.min(b), a.max(b)));
    }
    intervals
}

/// Union of intervals, sorted by start.
fn merge(mut intervals: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    intervals.sort_by(|a, b| cmp_tolerant(a.0, b.0).then(a.1.total_cmp(&b.1)));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
    for (lo, hi) in intervals {
        match merged.last_mut() {
            Some(last) if lo <= last.1 + EPSILON => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutter::CutterShape;
    use crate::fixtures;
    use crate::tasks::Axis;
    use approx::assert_relative_eq;
    use millpath_math::Point3;

    fn two_boxes() -> Model {
        let mut triangles = fixtures::cuboid(Point3::new(-0.5, -0.5, 0.0), Point3::new(0.5, 0.5, 3.0));
        triangles.extend(fixtures::cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 3.0)));
        Model::from_triangles(triangles)
    }

    fn flat(radius: f64) -> CutterSpec {
        CutterSpec {
            shape: CutterShape::Flat { radius },
            required_clearance: 0.0,
        }
    }

    fn line(axis: Axis, across: f64, z: f64) -> PushLine {
        PushLine {
            axis,
            across,
            start: -7.0,
            end: 7.0,
            z,
        }
    }

    #[test]
    fn test_merge_overlapping() {
        let merged = merge(vec![(3.0, 4.0), (0.0, 1.0), (0.5, 2.0), (2.0, 2.5)]);
        assert_eq!(merged, vec![(0.0, 2.5), (3.0, 4.0)]);
    }

    #[test]
    fn test_line_split_around_boxes() {
        let model = two_boxes();
        let free = free_intervals(&model, &flat(1.0), &line(Axis::X, 0.0, 2.0)).unwrap();
        assert_eq!(free.len(), 2);
        assert_relative_eq!(free[0].0, -7.0);
        assert_relative_eq!(free[0].1, -1.5, epsilon = 1e-9);
        assert_relative_eq!(free[1].0, 2.0, epsilon = 1e-9);
        assert_relative_eq!(free[1].1, 7.0);

        // At x = 0.75 the disk rim first catches the corner edge of the
        // smaller box, 0.25 to the side of its centre.
        let free = free_intervals(&model, &flat(1.0), &line(Axis::Y, 0.75, 2.0)).unwrap();
        assert_eq!(free.len(), 2);
        assert_relative_eq!(free[0].1, -0.5 - (1.0f64 - 0.0625).sqrt(), epsilon = 1e-9);
        assert_relative_eq!(free[1].0, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_line_above_model_is_free() {
        let model = two_boxes();
        let free = free_intervals(&model, &flat(1.0), &line(Axis::X, 0.0, 3.5)).unwrap();
        assert_eq!(free, vec![(-7.0, 7.0)]);
    }

    #[test]
    fn test_line_beside_model_is_free() {
        let model = two_boxes();
        let free = free_intervals(&model, &flat(1.0), &line(Axis::X, 2.5, 1.0)).unwrap();
        assert_eq!(free, vec![(-7.0, 7.0)]);
    }

    #[test]
    fn test_every_shape_keeps_radius_from_wall() {
        let model = two_boxes();
        for shape in fixtures::shapes() {
            let spec = CutterSpec {
                shape,
                required_clearance: 0.0,
            };
            let free = free_intervals(&model, &spec, &line(Axis::X, 0.25, 1.0)).unwrap();
            assert_eq!(free.len(), 2);
            assert_relative_eq!(free[0].1, -1.5, epsilon = 1e-9);
            assert_relative_eq!(free[1].0, 2.0, epsilon = 1e-9);
        }
    }
}
