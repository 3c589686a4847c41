//! Drop cutter: vertical probing over a grid of scan lines.
//!
//! For each sample position the cutter is lowered onto every nearby
//! upward-facing triangle and the highest contact wins. Between two
//! samples that rest on different triangles, the crossing of the two
//! height lines is probed as well, so ridges and valleys between samples
//! are not cut off. Where the cutter steps between the model and the
//! floor, the last supported position is found by bisection and inserted.

use millpath_math::{Point3, EPSILON};
use millpath_mesh::{Model, Triangle, TriangleId};
use tracing::debug;

use crate::cutter::{Cutter, CutterSpec};
use crate::error::Result;
use crate::settings::grid;
use crate::tasks::{Axis, DropLine};

/// Bisection steps when locating where the cutter leaves the model.
const EDGE_STEPS: usize = 40;

/// Result of probing one position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropSample {
    /// Cutter location.
    pub cl: Point3,
    /// Triangle that holds the cutter up; `None` when resting on the floor.
    pub triangle: Option<TriangleId>,
}

/// Vertical probe over a model.
#[derive(Debug)]
pub struct DropCutter<'a> {
    model: &'a Model,
    cutter: Cutter,
    floor: f64,
    start_z: f64,
}

impl<'a> DropCutter<'a> {
    /// Probe for `cutter` over `model`, never going below `floor`.
    pub fn new(model: &'a Model, cutter: &CutterSpec, floor: f64) -> Result<Self> {
        let cutter = Cutter::new(cutter)?;
        let top = model.bounds().map_or(floor, |b| b.max.z.max(floor));
        let start_z = top + cutter.required_clearance() + 1.0;
        Ok(Self {
            model,
            cutter,
            floor,
            start_z,
        })
    }

    /// Drop the cutter at (x, y).
    pub fn probe(&mut self, x: f64, y: f64) -> DropSample {
        let r = self.cutter.distance_radius();
        self.cutter.moveto(Point3::new(x, y, self.start_z));

        let mut best: Option<(f64, TriangleId)> = None;
        for triangle in self.model.triangles_in_xy(x - r, x + r, y - r, y + r) {
            if triangle.normal.z < -EPSILON {
                continue;
            }
            let Some(contact) = self.cutter.drop(triangle) else {
                continue;
            };
            let z = contact.cl.z;
            best = match best {
                None => Some((z, triangle.id)),
                // Near ties keep the triangle found first.
                Some((top, id)) if z <= top + EPSILON => Some((top.max(z), id)),
                Some(_) => Some((z, triangle.id)),
            };
        }

        match best {
            Some((z, id)) if z >= self.floor => DropSample {
                cl: Point3::new(x, y, z),
                triangle: Some(id),
            },
            _ => DropSample {
                cl: Point3::new(x, y, self.floor),
                triangle: None,
            },
        }
    }

    /// Cutter locations along a scan line in increasing axis order, with
    /// refinement points between samples on different contact sources.
    pub fn line(&mut self, line: &DropLine) -> Vec<Point3> {
        let positions = grid(line.start, line.end, line.step);
        let mut points = Vec::with_capacity(positions.len());
        let mut previous: Option<(f64, DropSample)> = None;

        for along in positions {
            let at = line.axis.point(along, line.across, 0.0);
            let sample = self.probe(at.x, at.y);
            if let Some((prev_along, prev)) = previous {
                if let Some(extra) = self.refine(line, prev_along, &prev, along, &sample) {
                    points.push(extra);
                }
            }
            points.push(sample.cl);
            previous = Some((along, sample));
        }
        points
    }

    fn refine(
        &mut self,
        line: &DropLine,
        a_along: f64,
        a: &DropSample,
        b_along: f64,
        b: &DropSample,
    ) -> Option<Point3> {
        match (a.triangle, b.triangle) {
            (Some(ta), Some(tb)) if ta != tb => self.ridge(line, a_along, a, b_along, b),
            (Some(_), None) => Some(self.model_edge(line, a_along, a, b_along)),
            (None, Some(_)) => Some(self.model_edge(line, b_along, b, a_along)),
            _ => None,
        }
    }

    /// Probe at the crossing of the height lines of two neighbouring samples.
    fn ridge(
        &mut self,
        line: &DropLine,
        a_along: f64,
        a: &DropSample,
        b_along: f64,
        b: &DropSample,
    ) -> Option<Point3> {
        let (ta, tb) = (a.triangle?, b.triangle?);
        let ma = slope(self.model.triangle(ta), line.axis)?;
        let mb = slope(self.model.triangle(tb), line.axis)?;
        if (ma - mb).abs() < EPSILON {
            return None;
        }
        // za + ma (s - sa) = zb + mb (s - sb)
        let s = (b.cl.z - a.cl.z + ma * a_along - mb * b_along) / (ma - mb);
        let (lo, hi) = (a_along.min(b_along), a_along.max(b_along));
        if !(s > lo + EPSILON && s < hi - EPSILON) {
            return None;
        }
        let at = line.axis.point(s, line.across, 0.0);
        let probe = self.probe(at.x, at.y);
        debug!(along = s, z = probe.cl.z, "refined between samples");
        Some(probe.cl)
    }

    /// Last position between a supported sample and a floor sample where
    /// the model still holds the cutter up.
    fn model_edge(
        &mut self,
        line: &DropLine,
        supported_along: f64,
        supported: &DropSample,
        floor_along: f64,
    ) -> Point3 {
        let (mut inside, mut outside) = (supported_along, floor_along);
        let mut last = supported.cl;
        for _ in 0..EDGE_STEPS {
            let mid = 0.5 * (inside + outside);
            let at = line.axis.point(mid, line.across, 0.0);
            let sample = self.probe(at.x, at.y);
            if sample.triangle.is_some() {
                inside = mid;
                last = sample.cl;
            } else {
                outside = mid;
            }
        }
        debug!(along = inside, z = last.z, "model edge between samples");
        last
    }
}

/// Height change per unit along `axis` on the triangle's plane.
fn slope(triangle: &Triangle, axis: Axis) -> Option<f64> {
    let n = triangle.normal;
    if n.z < EPSILON {
        return None;
    }
    Some(-axis.along(&n) / n.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutter::CutterShape;
    use crate::fixtures;
    use approx::assert_relative_eq;

    fn ball(radius: f64) -> CutterSpec {
        CutterSpec {
            shape: CutterShape::Ball { radius },
            required_clearance: 0.0,
        }
    }

    #[test]
    fn test_flat_surface_every_shape() {
        let model = Model::from_triangles(fixtures::floor(-10.0, 10.0, 2.5));
        for shape in fixtures::shapes() {
            let spec = CutterSpec {
                shape,
                required_clearance: 0.0,
            };
            let mut drop = DropCutter::new(&model, &spec, 0.0).unwrap();
            for (x, y) in [(0.0, 0.0), (-4.4, 7.1), (9.0, -9.0)] {
                let sample = drop.probe(x, y);
                assert_relative_eq!(sample.cl.z, 2.5, epsilon = 1e-9);
                assert!(sample.triangle.is_some());
            }
        }
    }

    #[test]
    fn test_floor_clamp() {
        let model = Model::from_triangles(fixtures::floor(-1.0, 1.0, -3.0));
        let mut drop = DropCutter::new(&model, &ball(0.5), 0.0).unwrap();
        let sample = drop.probe(0.0, 0.0);
        assert_relative_eq!(sample.cl.z, 0.0);
        assert_eq!(sample.triangle, None);
        let sample = drop.probe(50.0, 0.0);
        assert_eq!(sample.triangle, None);
    }

    #[test]
    fn test_downward_triangles_ignored() {
        // A ceiling above the floor, facing down.
        let mut triangles = fixtures::floor(-5.0, 5.0, 1.0).to_vec();
        for [a, b, c] in fixtures::floor(-5.0, 5.0, 3.0) {
            triangles.push([a, c, b]);
        }
        let model = Model::from_triangles(triangles);
        let mut drop = DropCutter::new(&model, &ball(1.0), 0.0).unwrap();
        assert_relative_eq!(drop.probe(0.0, 0.0).cl.z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_clearance_lifts_every_shape() {
        let model = Model::from_triangles(fixtures::floor(-10.0, 10.0, 1.25));
        for shape in fixtures::shapes() {
            let spec = CutterSpec {
                shape,
                required_clearance: 0.5,
            };
            let mut drop = DropCutter::new(&model, &spec, 0.0).unwrap();
            let sample = drop.probe(0.0, 0.0);
            assert_relative_eq!(sample.cl.z, 1.75, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_model_edge_inserted_at_floor_transitions() {
        let model = Model::from_triangles(fixtures::floor(-1.0, 1.0, 1.0));
        let spec = CutterSpec {
            shape: CutterShape::Flat { radius: 0.5 },
            required_clearance: 0.0,
        };
        let mut drop = DropCutter::new(&model, &spec, 0.0).unwrap();
        let line = DropLine {
            axis: Axis::X,
            across: 0.0,
            start: -3.0,
            end: 3.0,
            step: 0.4,
        };
        let points = drop.line(&line);
        assert_eq!(points.len(), 16 + 2);
        let samples = grid(line.start, line.end, line.step);
        let inserted: Vec<_> = points
            .iter()
            .filter(|p| !samples.iter().any(|x| (x - p.x).abs() < 1e-9))
            .collect();
        assert_eq!(inserted.len(), 2);
        // The disk rim just reaches the square's sides, still on top.
        assert_relative_eq!(inserted[0].x, -1.5, epsilon = 1e-9);
        assert_relative_eq!(inserted[1].x, 1.5, epsilon = 1e-9);
        for p in inserted {
            assert_relative_eq!(p.z, 1.0, epsilon = 1e-9);
        }
        assert!(points.windows(2).all(|w| w[0].x < w[1].x));
    }

    #[test]
    fn test_ridge_refinement_inserts_one_point() {
        let model = Model::from_triangles(fixtures::roof());
        let mut drop = DropCutter::new(&model, &ball(0.1), 0.0).unwrap();
        for across in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let line = DropLine {
                axis: Axis::X,
                across,
                start: -1.65,
                end: 1.65,
                step: 0.3,
            };
            let points = drop.line(&line);
            assert_eq!(points.len(), 12 + 1);
            let samples = grid(line.start, line.end, line.step);
            let inserted: Vec<_> = points
                .iter()
                .filter(|p| !samples.iter().any(|x| (x - p.x).abs() < 1e-9))
                .collect();
            assert_eq!(inserted.len(), 1);
            assert_relative_eq!(inserted[0].x, 0.0, epsilon = 1e-9);
            // Resting on the ridge line itself.
            assert_relative_eq!(inserted[0].z, 1.0, epsilon = 1e-9);
            assert!(points.windows(2).all(|w| w[0].x < w[1].x));
        }
    }
}
