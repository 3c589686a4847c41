//! Toolpath generation settings.

use millpath_math::EPSILON;
use millpath_mesh::Aabb;
use serde::{Deserialize, Serialize};

use crate::error::{CamError, Result};

/// Most values a single grid of lines, samples or layers may hold.
/// Settings whose steps are finer than this over the processing box are
/// rejected before generation starts.
pub const MAX_GRID_POINTS: usize = 100_000;

/// Path generation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drop the cutter onto the model over a grid.
    #[default]
    DropCutter,
    /// Sweep the cutter horizontally along lines, layer by layer.
    PushCutter,
    /// Follow the model's outline at each layer.
    Waterline,
}

/// Axis the scan lines run along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// Lines parallel to x, stepping in y.
    #[default]
    X,
    /// Lines parallel to y, stepping in x.
    Y,
    /// X lines, then Y lines.
    Xy,
}

/// Direction of horizontal cuts relative to the spindle rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MillingStyle {
    /// Cut in the +axis direction; contours keep their slice orientation.
    Conventional,
    /// Cut in the -axis direction; contours are reversed.
    Climb,
    /// No constraint; the start corner and the path policy decide.
    #[default]
    Ignore,
}

/// Corner of the processing box where machining starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCorner {
    /// Lowest x and lowest y.
    #[default]
    MinXMinY,
    /// Highest x and lowest y.
    MaxXMinY,
    /// Lowest x and highest y.
    MinXMaxY,
    /// Highest x and highest y.
    MaxXMaxY,
}

impl StartCorner {
    /// True if machining starts at the low end of x.
    pub fn from_min_x(self) -> bool {
        matches!(self, StartCorner::MinXMinY | StartCorner::MinXMaxY)
    }

    /// True if machining starts at the low end of y.
    pub fn from_min_y(self) -> bool {
        matches!(self, StartCorner::MinXMinY | StartCorner::MaxXMinY)
    }
}

/// Order in which layers are machined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerOrder {
    /// Highest layer first.
    #[default]
    TopDown,
    /// Lowest layer first.
    BottomUp,
}

/// How scan lines are turned into paths.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathPolicy {
    /// One path per run of a scan line.
    #[default]
    Simple,
    /// Every other scan line reversed.
    ZigZag {
        /// If set, all runs of one sweep form a single path joined by
        /// retracts to this height.
        #[serde(default)]
        safety_height: Option<f64>,
    },
}

/// Settings for [`generate_toolpath`](crate::generate_toolpath).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolpathSettings {
    /// Path generation algorithm.
    pub strategy: Strategy,
    /// Processing box; the model bounds when unset.
    pub bounds: Option<Aabb>,
    /// Distance between scan lines. When unset it follows from `overlap`.
    pub line_distance: Option<f64>,
    /// Fraction of the cutter width shared by neighbouring lines, in [0, 1).
    pub overlap: f64,
    /// Distance between samples along a line (drop cutter). Defaults to the
    /// line distance.
    pub sample_distance: Option<f64>,
    /// Maximum height between layers (push cutter, waterline).
    pub step_down: f64,
    /// Axis the scan lines run along.
    pub direction: ScanDirection,
    /// Cut direction constraint.
    pub milling_style: MillingStyle,
    /// Where machining starts.
    pub start_corner: StartCorner,
    /// Order of layers.
    pub layer_order: LayerOrder,
    /// How lines become paths.
    pub path_policy: PathPolicy,
    /// Seed for breaking exact ties between contour continuations.
    pub seed: u64,
}

impl Default for ToolpathSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            bounds: None,
            line_distance: None,
            overlap: 0.5,
            sample_distance: None,
            step_down: 1.0,
            direction: ScanDirection::default(),
            milling_style: MillingStyle::default(),
            start_corner: StartCorner::default(),
            layer_order: LayerOrder::default(),
            path_policy: PathPolicy::default(),
            seed: 0,
        }
    }
}

impl ToolpathSettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(step) = self.line_distance {
            if !(step.is_finite() && step > 0.0) {
                return Err(CamError::InvalidSettings(
                    "line_distance must be positive".into(),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(CamError::InvalidSettings(
                "overlap must be in [0, 1)".into(),
            ));
        }
        if let Some(step) = self.sample_distance {
            if !(step.is_finite() && step > 0.0) {
                return Err(CamError::InvalidSettings(
                    "sample_distance must be positive".into(),
                ));
            }
        }
        let step_down_ok = self.step_down.is_finite() && self.step_down > 0.0;
        if self.strategy != Strategy::DropCutter && !step_down_ok {
            return Err(CamError::InvalidSettings(
                "step_down must be positive".into(),
            ));
        }
        if let PathPolicy::ZigZag { safety_height } = self.path_policy {
            if self.milling_style != MillingStyle::Ignore {
                return Err(CamError::InvalidSettings(
                    "zig-zag paths require milling_style = ignore".into(),
                ));
            }
            if safety_height.is_some_and(|h| !h.is_finite()) {
                return Err(CamError::InvalidSettings(
                    "safety_height must be finite".into(),
                ));
            }
        }
        if let Some(bounds) = &self.bounds {
            let size = bounds.size();
            if !(size.x.is_finite() && size.y.is_finite() && size.z.is_finite()) {
                return Err(CamError::InvalidSettings("bounds must be finite".into()));
            }
        }
        Ok(())
    }

    /// Reject steps that would put more than [`MAX_GRID_POINTS`] values on
    /// one grid over `bounds` for a cutter of `radius`.
    pub(crate) fn check_grids(&self, bounds: &Aabb, radius: f64) -> Result<()> {
        let size = bounds.size();
        let width = size.x.max(size.y);
        let mut grids = vec![
            ("line_distance", width, self.line_step(radius)),
            ("sample_distance", width, self.sample_step(radius)),
        ];
        if self.strategy != Strategy::DropCutter {
            grids.push(("step_down", size.z, self.step_down));
        }
        for (name, span, step) in grids {
            if span / step > MAX_GRID_POINTS as f64 {
                return Err(CamError::InvalidSettings(format!(
                    "{name} {step} gives more than {MAX_GRID_POINTS} values over {span}"
                )));
            }
        }
        Ok(())
    }

    /// Distance between scan lines for a cutter of `radius`.
    pub fn line_step(&self, radius: f64) -> f64 {
        self.line_distance
            .unwrap_or(2.0 * radius * (1.0 - self.overlap))
    }

    /// Distance between samples along a line for a cutter of `radius`.
    pub fn sample_step(&self, radius: f64) -> f64 {
        self.sample_distance.unwrap_or_else(|| self.line_step(radius))
    }

    /// Layer heights in machining order.
    pub fn layers(&self, min_z: f64, max_z: f64) -> Vec<f64> {
        let mut layers = grid(min_z, max_z, self.step_down);
        if self.layer_order == LayerOrder::TopDown {
            layers.reverse();
        }
        layers
    }
}

/// Evenly spaced values from `min` to `max`, both included, no further
/// apart than `step`: `1 + ceil((max - min) / step)` of them.
pub fn grid(min: f64, max: f64, step: f64) -> Vec<f64> {
    let span = max - min;
    if span <= EPSILON || step <= 0.0 {
        return vec![min];
    }
    let intervals = ((span / step) - EPSILON).ceil().max(1.0) as usize;
    (0..=intervals)
        .map(|i| {
            if i == intervals {
                max
            } else {
                min + span * i as f64 / intervals as f64
            }
        })
        .collect()
}

/// Processing box resolved against the model: explicit bounds when set,
/// otherwise the model's own.
pub(crate) fn resolve_bounds(settings: &ToolpathSettings, model_bounds: Option<Aabb>) -> Result<Aabb> {
    let bounds = settings
        .bounds
        .or(model_bounds)
        .ok_or(CamError::EmptyModel)?;
    let size = bounds.size();
    for (axis, extent) in [("x", size.x), ("y", size.y)] {
        if extent <= EPSILON {
            return Err(CamError::EmptyBounds(format!(
                "{axis} extent is {extent}"
            )));
        }
    }
    if size.z < 0.0 {
        return Err(CamError::EmptyBounds(format!("z extent is {}", size.z)));
    }
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use millpath_math::Point3;

    #[test]
    fn test_grid_includes_both_ends() {
        let g = grid(-7.0, 7.0, 0.28);
        assert_eq!(g.len(), 51);
        assert_relative_eq!(g[0], -7.0);
        assert_relative_eq!(g[50], 7.0);
        assert_relative_eq!(g[1] - g[0], 0.28, epsilon = 1e-12);

        // Uneven span: spacing shrinks so both ends are hit.
        let g = grid(0.0, 1.0, 0.3);
        assert_eq!(g.len(), 5);
        assert_relative_eq!(g[1], 0.25);

        assert_eq!(grid(2.0, 2.0, 0.5), vec![2.0]);
    }

    #[test]
    fn test_layers_follow_order() {
        let mut settings = ToolpathSettings {
            step_down: 2.0 / 3.0,
            ..Default::default()
        };
        let layers = settings.layers(2.0, 4.0);
        assert_eq!(layers.len(), 4);
        assert_relative_eq!(layers[0], 4.0);
        assert_relative_eq!(layers[3], 2.0);

        settings.layer_order = LayerOrder::BottomUp;
        assert_relative_eq!(settings.layers(2.0, 4.0)[0], 2.0);
    }

    #[test]
    fn test_line_step_from_overlap() {
        let settings = ToolpathSettings {
            overlap: 0.25,
            ..Default::default()
        };
        assert_relative_eq!(settings.line_step(2.0), 3.0);
        assert_relative_eq!(settings.sample_step(2.0), 3.0);
        let settings = ToolpathSettings {
            line_distance: Some(0.5),
            sample_distance: Some(0.1),
            ..settings
        };
        assert_relative_eq!(settings.line_step(2.0), 0.5);
        assert_relative_eq!(settings.sample_step(2.0), 0.1);
    }

    #[test]
    fn test_validation() {
        assert!(ToolpathSettings::default().validate().is_ok());

        let invalid = [
            ToolpathSettings {
                line_distance: Some(0.0),
                ..Default::default()
            },
            ToolpathSettings {
                overlap: 1.0,
                ..Default::default()
            },
            ToolpathSettings {
                strategy: Strategy::Waterline,
                step_down: -1.0,
                ..Default::default()
            },
            ToolpathSettings {
                milling_style: MillingStyle::Climb,
                path_policy: PathPolicy::ZigZag {
                    safety_height: None,
                },
                ..Default::default()
            },
        ];
        for settings in invalid {
            assert!(matches!(
                settings.validate(),
                Err(CamError::InvalidSettings(_))
            ));
        }
    }

    #[test]
    fn test_grid_size_capped() {
        let bounds = Aabb::new(Point3::new(-7.0, -7.0, 0.0), Point3::new(7.0, 7.0, 4.0));
        assert!(ToolpathSettings::default().check_grids(&bounds, 1.0).is_ok());

        let too_fine = [
            ToolpathSettings {
                line_distance: Some(1e-12),
                ..Default::default()
            },
            ToolpathSettings {
                sample_distance: Some(1e-4),
                ..Default::default()
            },
            ToolpathSettings {
                strategy: Strategy::PushCutter,
                step_down: 1e-9,
                ..Default::default()
            },
            ToolpathSettings {
                overlap: 1.0 - 1e-9,
                ..Default::default()
            },
        ];
        for settings in too_fine {
            assert!(settings.validate().is_ok());
            assert!(matches!(
                settings.check_grids(&bounds, 1.0),
                Err(CamError::InvalidSettings(_))
            ));
        }

        // Drop cutter has no layers.
        let drop = ToolpathSettings {
            step_down: 1e-9,
            ..Default::default()
        };
        assert!(drop.check_grids(&bounds, 1.0).is_ok());
    }

    #[test]
    fn test_empty_bounds() {
        let settings = ToolpathSettings {
            bounds: Some(Aabb::new(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 5.0, 1.0),
            )),
            ..Default::default()
        };
        assert!(matches!(
            resolve_bounds(&settings, None),
            Err(CamError::EmptyBounds(_))
        ));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: ToolpathSettings = toml::from_str(
            r#"
            strategy = "push_cutter"
            line_distance = 0.5
            step_down = 0.25
            direction = "xy"
            start_corner = "max_x_min_y"
            seed = 7

            [path_policy]
            type = "zig_zag"
            safety_height = 10.0
            "#,
        )
        .unwrap();
        assert_eq!(settings.strategy, Strategy::PushCutter);
        assert_eq!(settings.direction, ScanDirection::Xy);
        assert_eq!(settings.start_corner, StartCorner::MaxXMinY);
        assert_eq!(
            settings.path_policy,
            PathPolicy::ZigZag {
                safety_height: Some(10.0)
            }
        );
        assert_eq!(settings.seed, 7);
        assert!(settings.validate().is_ok());
    }
}
