#![warn(missing_docs)]

//! Surface model for the millpath toolpath kernel.
//!
//! The model is an arena: points, edges and triangles live in flat vectors
//! and refer to each other through integer ids. Coincident points and shared
//! edges are merged when triangles are added, so "is this the same vertex"
//! is an id comparison everywhere downstream.
//!
//! # Example
//!
//! ```
//! use millpath_mesh::Model;
//! use millpath_math::Point3;
//!
//! let model = Model::from_triangles([[
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//! ]]);
//! assert_eq!(model.len(), 1);
//! assert!(model.triangles()[0].normal.z > 0.0);
//! ```

mod aabb;
mod edge;
pub mod kdtree;
mod model;
mod plane;
mod triangle;

pub use aabb::Aabb;
pub use edge::Edge;
pub use kdtree::KdTree;
pub use model::{EdgeId, Model, ModelBuilder, ModelData, PointId, TriangleId};
pub use plane::Plane;
pub use triangle::Triangle;
