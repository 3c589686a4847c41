//! Planar contour helpers for waterline loops.

use millpath_math::{Point3, EPSILON};

/// Signed area of a closed polygon in the xy plane; positive when
/// counter-clockwise. The closing edge is implied.
pub fn signed_area(points: &[Point3]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

/// A crossing between two non-adjacent edges of a closed polygon.
#[derive(Debug, Clone, Copy)]
struct Crossing {
    /// Edge `i` runs from point `i` to point `i + 1`.
    first: usize,
    second: usize,
    at: Point3,
}

/// Split a closed polygon at its self-intersections.
///
/// Returns the simple loops that keep the winding of the input; loops of
/// opposite winding (the twisted pieces) and zero-area loops are dropped.
/// The closing point is not repeated.
pub fn remove_self_intersections(points: Vec<Point3>) -> Vec<Vec<Point3>> {
    let area = signed_area(&points);
    if area.abs() <= EPSILON {
        return Vec::new();
    }
    let mut loops = Vec::new();
    split(points, area.signum(), &mut loops);
    loops
}

fn split(points: Vec<Point3>, sign: f64, out: &mut Vec<Vec<Point3>>) {
    let crossings = crossings(&points);
    let Some(&Crossing { first, second, at }) = crossings.first() else {
        let area = signed_area(&points);
        if area.abs() > EPSILON && area.signum() == sign {
            out.push(points);
        }
        return;
    };

    let mut outer: Vec<Point3> = points[..=first].to_vec();
    outer.push(at);
    outer.extend_from_slice(&points[second + 1..]);

    let mut inner = vec![at];
    inner.extend_from_slice(&points[first + 1..=second]);

    split(outer, sign, out);
    split(inner, sign, out);
}

/// Every proper crossing between non-adjacent edges, ordered by edge.
fn crossings(points: &[Point3]) -> Vec<Crossing> {
    let n = points.len();
    let mut found = Vec::new();
    if n < 4 {
        return found;
    }
    for i in 0..n {
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (a, b) = (points[i], points[(i + 1) % n]);
            let (c, d) = (points[j], points[(j + 1) % n]);
            if let Some(at) = segment_crossing(&a, &b, &c, &d) {
                found.push(Crossing {
                    first: i,
                    second: j,
                    at,
                });
            }
        }
    }
    found
}

/// Interior crossing of segments ab and cd in xy; z follows ab.
fn segment_crossing(a: &Point3, b: &Point3, c: &Point3, d: &Point3) -> Option<Point3> {
    let r = (b.x - a.x, b.y - a.y);
    let s = (d.x - c.x, d.y - c.y);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() < EPSILON * EPSILON {
        return None;
    }
    let q = (c.x - a.x, c.y - a.y);
    let t = (q.0 * s.1 - q.1 * s.0) / denom;
    let u = (q.0 * r.1 - q.1 * r.0) / denom;
    let inside = |v: f64| v > EPSILON && v < 1.0 - EPSILON;
    (inside(t) && inside(u)).then(|| a + (b - a) * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn poly(coords: &[(f64, f64)]) -> Vec<Point3> {
        coords.iter().map(|&(x, y)| Point3::new(x, y, 2.0)).collect()
    }

    #[test]
    fn test_signed_area_winding() {
        let square = poly(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]);
        assert_relative_eq!(signed_area(&square), 4.0);
        let mut reversed = square;
        reversed.reverse();
        assert_relative_eq!(signed_area(&reversed), -4.0);
    }

    #[test]
    fn test_simple_polygon_unchanged() {
        let square = poly(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]);
        assert_eq!(remove_self_intersections(square.clone()), vec![square]);
    }

    #[test]
    fn test_twisted_ear_removed() {
        let twisted = poly(&[(0.0, 0.0), (4.0, 0.0), (4.0, 5.0), (5.0, 4.0), (0.0, 4.0)]);
        let loops = remove_self_intersections(twisted);
        assert_eq!(loops.len(), 1);
        let expected = poly(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]);
        assert_eq!(loops[0].len(), expected.len());
        for (got, want) in loops[0].iter().zip(&expected) {
            assert_relative_eq!(got.x, want.x, epsilon = 1e-9);
            assert_relative_eq!(got.y, want.y, epsilon = 1e-9);
            assert_relative_eq!(got.z, 2.0);
        }
    }

    #[test]
    fn test_balanced_figure_eight_vanishes() {
        let eight = poly(&[(0.0, 0.0), (4.0, 4.0), (4.0, 0.0), (0.0, 4.0)]);
        assert!(signed_area(&eight).abs() < EPSILON);
        assert!(remove_self_intersections(eight).is_empty());
    }
}
