//! Per-line and per-layer tasks run through the executor.
//!
//! Each generator ships one [`JobInput`] per job (the model travels once)
//! and one small argument per scan line or layer.

use millpath_math::{Point3, Vec3};
use millpath_mesh::{Aabb, Model};
use millpath_parallel::{FunctionRegistry, Task, TaskFailure};
use serde::{Deserialize, Serialize};

use crate::cutter::CutterSpec;
use crate::dropcutter::DropCutter;
use crate::pushcutter::free_intervals;
use crate::settings::ToolpathSettings;
use crate::waterline::{waterline_layer, LayerContours};

/// Input shared by every task of a generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    /// Surface to machine.
    pub model: Model,
    /// Cutter in use.
    pub cutter: CutterSpec,
    /// Resolved processing box.
    pub bounds: Aabb,
    /// Generation settings.
    pub settings: ToolpathSettings,
}

/// Horizontal axis a scan line runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Along x, at fixed y.
    X,
    /// Along y, at fixed x.
    Y,
}

impl Axis {
    /// Unit vector along the axis.
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::new(1.0, 0.0, 0.0),
            Axis::Y => Vec3::new(0.0, 1.0, 0.0),
        }
    }

    /// Point at `along` on a line at `across`, height `z`.
    pub fn point(self, along: f64, across: f64, z: f64) -> Point3 {
        match self {
            Axis::X => Point3::new(along, across, z),
            Axis::Y => Point3::new(across, along, z),
        }
    }

    /// Coordinate of `p` (or a vector) along the axis.
    pub fn along(self, v: &Vec3) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
        }
    }

    /// Extent of a box along the axis and across it.
    pub(crate) fn spans(self, bounds: &Aabb) -> ((f64, f64), (f64, f64)) {
        let x = (bounds.min.x, bounds.max.x);
        let y = (bounds.min.y, bounds.max.y);
        match self {
            Axis::X => (x, y),
            Axis::Y => (y, x),
        }
    }
}

/// One drop-cutter scan line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropLine {
    /// Axis the line runs along.
    pub axis: Axis,
    /// Fixed coordinate across the axis.
    pub across: f64,
    /// First sample along the axis.
    pub start: f64,
    /// Last sample along the axis.
    pub end: f64,
    /// Maximum distance between samples.
    pub step: f64,
}

/// Drops the cutter along one line.
pub struct DropLineTask;

impl Task for DropLineTask {
    const NAME: &'static str = "millpath.drop_line";
    type Shared = JobInput;
    type Args = DropLine;
    type Output = Vec<Point3>;

    fn run(input: &JobInput, line: DropLine) -> Result<Vec<Point3>, TaskFailure> {
        let mut drop = DropCutter::new(&input.model, &input.cutter, input.bounds.min.z)
            .map_err(|e| TaskFailure::new(e.to_string()))?;
        Ok(drop.line(&line))
    }
}

/// One push-cutter sweep line at a given height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PushLine {
    /// Axis the line runs along.
    pub axis: Axis,
    /// Fixed coordinate across the axis.
    pub across: f64,
    /// Start of the line along the axis.
    pub start: f64,
    /// End of the line along the axis.
    pub end: f64,
    /// Cutter tip height.
    pub z: f64,
}

/// Finds the collision-free stretches of one sweep line.
pub struct PushLineTask;

impl Task for PushLineTask {
    const NAME: &'static str = "millpath.push_line";
    type Shared = JobInput;
    type Args = PushLine;
    type Output = Vec<(f64, f64)>;

    fn run(input: &JobInput, line: PushLine) -> Result<Vec<(f64, f64)>, TaskFailure> {
        free_intervals(&input.model, &input.cutter, &line).map_err(|e| TaskFailure::new(e.to_string()))
    }
}

/// One waterline layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterlineLayer {
    /// Layer number, used to seed tie-breaking.
    pub index: usize,
    /// Layer height.
    pub z: f64,
}

/// Builds the offset contours of one layer.
pub struct WaterlineLayerTask;

impl Task for WaterlineLayerTask {
    const NAME: &'static str = "millpath.waterline_layer";
    type Shared = JobInput;
    type Args = WaterlineLayer;
    type Output = LayerContours;

    fn run(input: &JobInput, layer: WaterlineLayer) -> Result<LayerContours, TaskFailure> {
        waterline_layer(
            &input.model,
            &input.cutter,
            input.settings.seed,
            layer.index,
            layer.z,
        )
        .map_err(|e| TaskFailure::new(e.to_string()))
    }
}

/// Registry with every task the generators use, for worker processes.
pub fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry
        .register::<DropLineTask>()
        .register::<PushLineTask>()
        .register::<WaterlineLayerTask>();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_all_tasks() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec![
                "millpath.drop_line",
                "millpath.push_line",
                "millpath.waterline_layer"
            ]
        );
    }

    #[test]
    fn test_axis_points() {
        assert_eq!(Axis::X.point(1.0, 2.0, 3.0), Point3::new(1.0, 2.0, 3.0));
        assert_eq!(Axis::Y.point(1.0, 2.0, 3.0), Point3::new(2.0, 1.0, 3.0));
        assert_eq!(Axis::Y.along(&Vec3::new(4.0, 5.0, 6.0)), 5.0);
    }
}
