//! Arena-backed triangle surface model.

use std::collections::HashMap;

use millpath_math::{Point3, QuantKey, Vec3};
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::edge::Edge;
use crate::kdtree::{KdTree, DEFAULT_BUCKET_SIZE};
use crate::triangle::Triangle;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Position in the owning arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a merged vertex in a [`Model`].
    PointId
);
arena_id!(
    /// Index of a merged (shared) edge in a [`Model`].
    EdgeId
);
arena_id!(
    /// Index of a triangle in a [`Model`].
    TriangleId
);

/// A read-only triangulated surface.
///
/// Built through [`ModelBuilder`], [`Model::from_triangles`] or
/// [`Model::from_indexed`]. Serializes to the compact [`ModelData`] form and
/// rebuilds its arena and spatial index when deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "ModelData", try_from = "ModelData")]
pub struct Model {
    points: Vec<Point3>,
    edges: Vec<Edge>,
    edge_triangles: Vec<Vec<TriangleId>>,
    triangles: Vec<Triangle>,
    bounds: Option<Aabb>,
    index: KdTree<TriangleId, 4>,
}

impl Model {
    /// Model from a list of vertex triples. Degenerate triangles are skipped.
    pub fn from_triangles(triangles: impl IntoIterator<Item = [Point3; 3]>) -> Self {
        let mut builder = ModelBuilder::new();
        for [p1, p2, p3] in triangles {
            builder.add_triangle(p1, p2, p3);
        }
        builder.build()
    }

    /// Model from a shared vertex list and index triples.
    ///
    /// Faces referencing missing vertices or with zero area are skipped.
    pub fn from_indexed(vertices: &[Point3], faces: &[[u32; 3]]) -> Self {
        let mut builder = ModelBuilder::new();
        for face in faces {
            let get = |i: u32| vertices.get(i as usize).copied();
            if let (Some(p1), Some(p2), Some(p3)) = (get(face[0]), get(face[1]), get(face[2])) {
                builder.add_triangle(p1, p2, p3);
            }
        }
        builder.build()
    }

    /// All triangles, ordered by id.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Triangle by id.
    pub fn triangle(&self, id: TriangleId) -> &Triangle {
        &self.triangles[id.index()]
    }

    /// Merged vertex by id.
    pub fn point(&self, id: PointId) -> &Point3 {
        &self.points[id.index()]
    }

    /// Shared edge by id.
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    /// Triangles that use the given edge.
    pub fn edge_triangles(&self, id: EdgeId) -> &[TriangleId] {
        &self.edge_triangles[id.index()]
    }

    /// Aggregate bounds, `None` for an empty model.
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Number of triangles.
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    /// True if the model has no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Triangles whose xy bounds overlap the rectangle, ordered by id.
    pub fn triangles_in_xy(&self, min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Vec<&Triangle> {
        let lo = [f64::NEG_INFINITY, min_x, f64::NEG_INFINITY, min_y];
        let hi = [max_x, f64::INFINITY, max_y, f64::INFINITY];
        let mut ids: Vec<TriangleId> = self.index.within(&lo, &hi).into_iter().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| self.triangle(id)).collect()
    }
}

/// Incremental model construction with vertex and edge merging.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    points: Vec<Point3>,
    point_lookup: HashMap<QuantKey, PointId>,
    edges: Vec<Edge>,
    edge_lookup: HashMap<(PointId, PointId), EdgeId>,
    edge_triangles: Vec<Vec<TriangleId>>,
    triangles: Vec<Triangle>,
}

impl ModelBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a triangle with its normal from the winding.
    pub fn add_triangle(&mut self, p1: Point3, p2: Point3, p3: Point3) -> Option<TriangleId> {
        let normal = Triangle::new(p1, p2, p3)?.normal;
        self.push(p1, p2, p3, normal)
    }

    /// Add a triangle with an explicit normal.
    pub fn add_triangle_with_normal(
        &mut self,
        p1: Point3,
        p2: Point3,
        p3: Point3,
        normal: Vec3,
    ) -> Option<TriangleId> {
        let normal = Triangle::with_normal(p1, p2, p3, normal)?.normal;
        self.push(p1, p2, p3, normal)
    }

    fn push(&mut self, p1: Point3, p2: Point3, p3: Point3, normal: Vec3) -> Option<TriangleId> {
        let ids = [self.point_id(p1), self.point_id(p2), self.point_id(p3)];
        if ids[0] == ids[1] || ids[1] == ids[2] || ids[2] == ids[0] {
            return None;
        }
        let id = TriangleId(self.triangles.len() as u32);
        let edge_ids = [
            self.edge_id(ids[0], ids[1], id),
            self.edge_id(ids[1], ids[2], id),
            self.edge_id(ids[2], ids[0], id),
        ];
        let points = ids.map(|pid| self.points[pid.index()]);
        self.triangles
            .push(Triangle::build(id, ids, edge_ids, points, normal));
        Some(id)
    }

    fn point_id(&mut self, p: Point3) -> PointId {
        let key = QuantKey::of(&p);
        if let Some(&id) = self.point_lookup.get(&key) {
            return id;
        }
        let id = PointId(self.points.len() as u32);
        self.points.push(p);
        self.point_lookup.insert(key, id);
        id
    }

    fn edge_id(&mut self, a: PointId, b: PointId, triangle: TriangleId) -> EdgeId {
        let key = if a < b { (a, b) } else { (b, a) };
        let id = match self.edge_lookup.get(&key) {
            Some(&id) => id,
            None => {
                let id = EdgeId(self.edges.len() as u32);
                let (p, q) = (self.points[key.0.index()], self.points[key.1.index()]);
                self.edges.push(Edge::with_ids(id, [key.0, key.1], p, q));
                self.edge_triangles.push(Vec::new());
                self.edge_lookup.insert(key, id);
                id
            }
        };
        self.edge_triangles[id.index()].push(triangle);
        id
    }

    /// Finish the model and build its spatial index.
    pub fn build(self) -> Model {
        let bounds = self
            .triangles
            .iter()
            .map(|t| t.aabb)
            .reduce(|a, b| a.union(&b));
        let index = KdTree::build(
            self.triangles.iter().map(|t| {
                (
                    [t.aabb.min.x, t.aabb.max.x, t.aabb.min.y, t.aabb.max.y],
                    t.id,
                )
            }),
            DEFAULT_BUCKET_SIZE,
        );
        Model {
            points: self.points,
            edges: self.edges,
            edge_triangles: self.edge_triangles,
            triangles: self.triangles,
            bounds,
            index,
        }
    }
}

/// Compact serialized form of a [`Model`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelData {
    /// Merged vertices.
    pub vertices: Vec<Point3>,
    /// Vertex index triples, one per triangle.
    pub faces: Vec<[u32; 3]>,
    /// Unit normal per face.
    pub normals: Vec<Vec3>,
}

impl From<Model> for ModelData {
    fn from(model: Model) -> Self {
        Self {
            faces: model
                .triangles
                .iter()
                .map(|t| t.point_ids.map(|id| id.0))
                .collect(),
            normals: model.triangles.iter().map(|t| t.normal).collect(),
            vertices: model.points,
        }
    }
}

impl TryFrom<ModelData> for Model {
    type Error = String;

    fn try_from(data: ModelData) -> Result<Self, Self::Error> {
        if data.normals.len() != data.faces.len() {
            return Err(format!(
                "{} normals for {} faces",
                data.normals.len(),
                data.faces.len()
            ));
        }
        let mut builder = ModelBuilder::new();
        for (face, normal) in data.faces.iter().zip(&data.normals) {
            let mut pts = [Point3::origin(); 3];
            for (slot, &i) in pts.iter_mut().zip(face) {
                *slot = *data
                    .vertices
                    .get(i as usize)
                    .ok_or_else(|| format!("face references missing vertex {i}"))?;
            }
            builder.add_triangle_with_normal(pts[0], pts[1], pts[2], *normal);
        }
        Ok(builder.build())
    }
}
