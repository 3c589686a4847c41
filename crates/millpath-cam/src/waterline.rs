//! Waterline: constant-height contours around the model.
//!
//! A layer is built in four steps. The model is sliced by the horizontal
//! plane, each slice segment is offset by pushing the cutter toward it,
//! the offset segments are stitched into chains through the mesh features
//! they share, and the gaps at convex corners are filled by pushing the
//! cutter around the corner point. Closed chains are finally split at
//! their self-intersections.
//!
//! Slice segments keep the material on their left, so closed contours
//! around material run counter-clockwise seen from above.

use std::collections::{HashMap, HashSet};

use millpath_math::{horizontal, points_near_eq, try_normalize, Point3, Vec3, EPSILON};
use millpath_mesh::{EdgeId, Model, PointId, Triangle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contour::remove_self_intersections;
use crate::cutter::{Cutter, CutterSpec};
use crate::error::Result;

/// Angular step of the samples that round a convex corner.
const CORNER_STEP: f64 = std::f64::consts::PI / 18.0;

/// One offset contour of a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    /// Cutter locations. A closed contour repeats its first point at the end.
    pub points: Vec<Point3>,
    /// Whether the contour returns to its start.
    pub closed: bool,
}

/// Contours of one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerContours {
    /// Contours in stitching order.
    pub contours: Vec<Contour>,
    /// Number of joins decided by the seeded tie-break.
    pub ambiguous_joins: usize,
}

/// Mesh feature a slice segment end lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SliceKey {
    Vertex(PointId),
    Edge(EdgeId),
}

#[derive(Debug, Clone, Copy)]
struct SlicePoint {
    key: SliceKey,
    at: Point3,
}

/// A slice segment with its offset end points.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: SlicePoint,
    end: SlicePoint,
    cl_start: Point3,
    cl_end: Point3,
}

impl Segment {
    fn dir(&self) -> Vec3 {
        horizontal(&(self.end.at - self.start.at))
    }
}

/// Offset contours of `model` at height `z` for the cutter `spec`.
///
/// Ties between equally good continuations are broken by an RNG seeded
/// from `seed` and the layer `index`, so the result is reproducible.
pub fn waterline_layer(
    model: &Model,
    spec: &CutterSpec,
    seed: u64,
    index: usize,
    z: f64,
) -> Result<LayerContours> {
    let mut cutter = Cutter::new(spec)?;
    let slices = slice(model, z);

    let segments: Vec<Segment> = slices
        .iter()
        .filter_map(|&(start, end, normal)| {
            let cl_start = offset(model, &mut cutter, &start.at, &normal)?;
            let cl_end = offset(model, &mut cutter, &end.at, &normal)?;
            Some(Segment {
                start,
                end,
                cl_start,
                cl_end,
            })
        })
        .collect();
    debug!(
        z,
        slices = slices.len(),
        offset = segments.len(),
        "waterline layer sliced"
    );

    let mut rng = StdRng::seed_from_u64(seed ^ index as u64);
    let (chains, ambiguous_joins) = stitch(&segments, &mut rng);
    if ambiguous_joins > 0 {
        warn!(z, ambiguous_joins, "waterline joins decided by tie-break");
    }

    let mut contours = Vec::new();
    for chain in chains {
        let closed = chain.len() > 1
            && segments[chain[0]].start.key == segments[chain[chain.len() - 1]].end.key;
        let points = trace(model, &mut cutter, &segments, &chain, closed);
        if closed {
            for mut ring in remove_self_intersections(points) {
                ring.push(ring[0]);
                contours.push(Contour {
                    points: ring,
                    closed: true,
                });
            }
        } else if points.len() > 1 {
            contours.push(Contour {
                points,
                closed: false,
            });
        }
    }

    Ok(LayerContours {
        contours,
        ambiguous_joins,
    })
}

/// Oriented slice segments with the outward normal of their triangle.
fn slice(model: &Model, z: f64) -> Vec<(SlicePoint, SlicePoint, Vec3)> {
    let mut segments = Vec::new();
    for triangle in model.triangles() {
        if triangle.min_z() > z + EPSILON || triangle.max_z() < z - EPSILON {
            continue;
        }
        let Some(normal) = try_normalize(&horizontal(&triangle.normal)) else {
            continue;
        };
        let crossing = slice_triangle(triangle, z);
        let [a, b] = match crossing.as_slice() {
            [a, b] => [*a, *b],
            _ => continue,
        };
        if points_near_eq(&a.at, &b.at) {
            continue;
        }
        // Material on the left: the outward normal points right.
        let d = b.at - a.at;
        if d.x * normal.y - d.y * normal.x < 0.0 {
            segments.push((a, b, normal));
        } else {
            segments.push((b, a, normal));
        }
    }
    segments
}

/// Points where the plane meets the triangle, keyed by feature.
fn slice_triangle(triangle: &Triangle, z: f64) -> Vec<SlicePoint> {
    let mut points: Vec<SlicePoint> = Vec::with_capacity(3);
    let mut push = |point: SlicePoint| {
        if !points.iter().any(|p| p.key == point.key) {
            points.push(point);
        }
    };
    for (i, p) in triangle.points.iter().enumerate() {
        if (p.z - z).abs() <= EPSILON {
            push(SlicePoint {
                key: SliceKey::Vertex(triangle.point_ids[i]),
                at: Point3::new(p.x, p.y, z),
            });
        }
    }
    for edge in &triangle.edges {
        let (da, db) = (edge.p1.z - z, edge.p2.z - z);
        if (da > EPSILON && db < -EPSILON) || (da < -EPSILON && db > EPSILON) {
            let t = da / (da - db);
            let at = edge.p1 + (edge.p2 - edge.p1) * t;
            push(SlicePoint {
                key: SliceKey::Edge(edge.id),
                at: Point3::new(at.x, at.y, z),
            });
        }
    }
    points
}

/// Cutter location touching the model when pushed toward `target` along
/// `-normal`, starting clear of it. `None` if the start is already blocked
/// or nothing is touched.
fn offset(model: &Model, cutter: &mut Cutter, target: &Point3, normal: &Vec3) -> Option<Point3> {
    let r = cutter.distance_radius();
    let start = target + normal * (r + 1.0);
    push_toward(model, cutter, start, &-normal)
}

fn push_toward(model: &Model, cutter: &mut Cutter, start: Point3, u: &Vec3) -> Option<Point3> {
    let reach = 2.0 * cutter.distance_radius() + 1.0;
    let candidates = model.triangles_in_xy(
        start.x - reach,
        start.x + reach,
        start.y - reach,
        start.y + reach,
    );

    let mut best: Option<f64> = None;
    for triangle in candidates {
        if triangle.max_z() < start.z - EPSILON {
            continue;
        }
        cutter.moveto(start);
        let Some(contact) = cutter.intersect(u, triangle) else {
            continue;
        };
        if contact.distance < -EPSILON {
            // Behind the start unless the cutter already overlaps it.
            let exit = cutter.intersect(&-u, triangle).map(|c| -c.distance);
            if exit.is_some_and(|exit| exit > EPSILON) {
                return None;
            }
            continue;
        }
        let distance = contact.distance.max(0.0);
        best = Some(best.map_or(distance, |b: f64| b.min(distance)));
    }
    best.map(|d| start + u * d)
}

/// Chains of segment indices. Returns the chains and the number of joins
/// decided by the tie-break.
fn stitch(segments: &[Segment], rng: &mut StdRng) -> (Vec<Vec<usize>>, usize) {
    let mut by_start: HashMap<SliceKey, Vec<usize>> = HashMap::new();
    for (i, s) in segments.iter().enumerate() {
        by_start.entry(s.start.key).or_default().push(i);
    }
    let ends: HashSet<SliceKey> = segments.iter().map(|s| s.end.key).collect();

    // Open chains first, from heads nothing leads into; then loops.
    let heads = (0..segments.len())
        .filter(|&i| !ends.contains(&segments[i].start.key))
        .chain(0..segments.len())
        .collect::<Vec<_>>();

    let mut used = vec![false; segments.len()];
    let mut chains = Vec::new();
    let mut ambiguous = 0;
    for head in heads {
        if used[head] {
            continue;
        }
        used[head] = true;
        let mut chain = vec![head];
        let mut current = head;
        loop {
            let next: Vec<usize> = by_start
                .get(&segments[current].end.key)
                .map(|c| c.iter().copied().filter(|&i| !used[i]).collect())
                .unwrap_or_default();
            let Some(next) = choose(segments, current, &next, rng, &mut ambiguous) else {
                break;
            };
            used[next] = true;
            chain.push(next);
            current = next;
        }
        chains.push(chain);
    }
    (chains, ambiguous)
}

/// Continuation with the shortest offset gap.
fn choose(
    segments: &[Segment],
    current: usize,
    candidates: &[usize],
    rng: &mut StdRng,
    ambiguous: &mut usize,
) -> Option<usize> {
    let from = segments[current].cl_end;
    let gap = |i: usize| (segments[i].cl_start - from).norm();
    let shortest = candidates.iter().map(|&i| gap(i)).reduce(f64::min)?;
    let tied: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| gap(i) <= shortest + EPSILON)
        .collect();
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    *ambiguous += 1;
    Some(tied[rng.gen_range(0..tied.len())])
}

/// Cutter locations along a chain, rounding convex corners.
fn trace(
    model: &Model,
    cutter: &mut Cutter,
    segments: &[Segment],
    chain: &[usize],
    closed: bool,
) -> Vec<Point3> {
    let mut points: Vec<Point3> = Vec::new();
    for (k, &i) in chain.iter().enumerate() {
        let segment = &segments[i];
        if k > 0 {
            let previous = &segments[chain[k - 1]];
            for p in round_corner(model, cutter, previous, segment) {
                append(&mut points, p);
            }
        }
        append(&mut points, segment.cl_start);
        append(&mut points, segment.cl_end);
    }

    if closed {
        let (last, first) = (&segments[chain[chain.len() - 1]], &segments[chain[0]]);
        for p in round_corner(model, cutter, last, first) {
            append(&mut points, p);
        }
        if points.len() > 1 && points_near_eq(&points[0], &points[points.len() - 1]) {
            points.pop();
        }
    }
    points
}

fn append(points: &mut Vec<Point3>, p: Point3) {
    if !points.last().is_some_and(|last| points_near_eq(last, &p)) {
        points.push(p);
    }
}

/// Samples around the shared slice point of a left (convex) turn.
fn round_corner(model: &Model, cutter: &mut Cutter, from: &Segment, to: &Segment) -> Vec<Point3> {
    let (d1, d2) = (from.dir(), to.dir());
    if d1.x * d2.y - d1.y * d2.x <= EPSILON {
        return Vec::new();
    }
    let corner = from.end.at;
    let angle = |p: &Point3| (p.y - corner.y).atan2(p.x - corner.x);
    let a0 = angle(&from.cl_end);
    let sweep = (angle(&to.cl_start) - a0).rem_euclid(2.0 * std::f64::consts::PI);
    let steps = (sweep / CORNER_STEP).ceil() as usize;

    let reach = cutter.distance_radius() + 1.0;
    let mut samples = Vec::new();
    for k in 1..steps {
        let a = a0 + sweep * k as f64 / steps as f64;
        let outward = Vec3::new(a.cos(), a.sin(), 0.0);
        if let Some(p) = push_toward(model, cutter, corner + outward * reach, &-outward) {
            samples.push(p);
        }
    }
    samples
}
