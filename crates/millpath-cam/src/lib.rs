#![warn(missing_docs)]

//! Toolpath generation for 3-axis milling of triangulated surfaces.
//!
//! # Strategies
//!
//! - Drop cutter: the cutter is lowered onto the model over a grid of scan
//!   lines, with extra probes where neighbouring samples rest on different
//!   triangles.
//! - Push cutter: the cutter is swept horizontally along lines at each
//!   layer; the stretches where it collides with the model are cut out.
//! - Waterline: contours at each layer, offset by the cutter and rounded at
//!   convex corners.
//!
//! Lines and layers are independent tasks run through a
//! [`millpath_parallel::Executor`], sequentially, on a local pool, or on
//! distributed workers.
//!
//! # Example
//!
//! ```
//! use millpath_cam::{generate_toolpath, no_progress, CutterShape, CutterSpec, ToolpathSettings};
//! use millpath_math::Point3;
//! use millpath_mesh::Model;
//! use millpath_parallel::Executor;
//!
//! let model = Model::from_triangles([[
//!     Point3::new(-3.0, -4.0, 1.0),
//!     Point3::new(-3.0, 4.0, 1.0),
//!     Point3::new(3.0, 0.0, 1.0),
//! ]]);
//! let cutter = CutterSpec {
//!     shape: CutterShape::Ball { radius: 1.0 },
//!     required_clearance: 0.0,
//! };
//! let settings = ToolpathSettings {
//!     line_distance: Some(1.0),
//!     ..ToolpathSettings::default()
//! };
//!
//! let toolpath =
//!     generate_toolpath(&model, &cutter, &settings, &Executor::Sequential, &mut no_progress)
//!         .unwrap();
//! assert!(!toolpath.is_cancelled());
//! assert!(toolpath.stats().points > 0);
//! ```

mod contour;
mod cutter;
mod dropcutter;
mod error;
mod generate;
pub mod intersect;
mod path;
mod processor;
mod progress;
mod pushcutter;
mod settings;
mod tasks;
mod waterline;

#[cfg(test)]
mod fixtures;

pub use contour::{remove_self_intersections, signed_area};
pub use cutter::{Contact, Cutter, CutterShape, CutterSpec};
pub use dropcutter::{DropCutter, DropSample};
pub use error::{CamError, Result};
pub use generate::generate_toolpath;
pub use path::{GenerationStatus, Path, Toolpath, ToolpathStats};
pub use processor::PathProcessor;
pub use progress::{no_progress, Progress, ProgressCallback};
pub use pushcutter::free_intervals;
pub use settings::{
    grid, LayerOrder, MAX_GRID_POINTS, MillingStyle, PathPolicy, ScanDirection, StartCorner, Strategy, ToolpathSettings,
};
pub use tasks::{
    registry, Axis, DropLine, DropLineTask, JobInput, PushLine, PushLineTask, WaterlineLayer,
    WaterlineLayerTask,
};
pub use waterline::{waterline_layer, Contour, LayerContours};
