//! Toolpath generation entry point.
//!
//! A generator turns the settings into a list of tasks (scan lines, sweep
//! lines or layers), runs them through the executor, puts the results
//! back in logical order and feeds them to the path processor.

use std::sync::Arc;

use millpath_math::Point3;
use millpath_mesh::{Aabb, Model};
use millpath_parallel::{Executor, Resequencer, ResultOrder, Task};
use tracing::{debug, info};

use crate::cutter::CutterSpec;
use crate::error::{CamError, Result};
use crate::path::{GenerationStatus, Toolpath};
use crate::processor::PathProcessor;
use crate::progress::{Progress, ProgressCallback};
use crate::settings::{grid, resolve_bounds, MillingStyle, ScanDirection, StartCorner, Strategy, ToolpathSettings};
use crate::tasks::{
    Axis, DropLine, DropLineTask, JobInput, PushLine, PushLineTask, WaterlineLayer, WaterlineLayerTask,
};
use crate::waterline::LayerContours;

/// Generate a toolpath for `model`.
///
/// Settings are validated before any geometry work. `callback` is polled
/// once per finished line or layer; returning `true` stops generation and
/// yields the paths done so far with status
/// [`Cancelled`](GenerationStatus::Cancelled).
pub fn generate_toolpath(
    model: &Model,
    cutter: &CutterSpec,
    settings: &ToolpathSettings,
    executor: &Executor,
    callback: &mut ProgressCallback<'_>,
) -> Result<Toolpath> {
    cutter.validate()?;
    settings.validate()?;
    if model.is_empty() {
        return Err(CamError::EmptyModel);
    }
    let bounds = resolve_bounds(settings, model.bounds())?;
    settings.check_grids(&bounds, cutter.shape.radius())?;
    info!(
        strategy = ?settings.strategy,
        triangles = model.len(),
        mode = executor.mode(),
        "generating toolpath"
    );

    let mut job = Job {
        executor,
        input: Arc::new(JobInput {
            model: model.clone(),
            cutter: *cutter,
            bounds,
            settings: settings.clone(),
        }),
        callback,
        cancelled: false,
    };
    let mut processor = PathProcessor::new(settings.path_policy);
    match settings.strategy {
        Strategy::DropCutter => drop_cutter(&mut job, &mut processor)?,
        Strategy::PushCutter => push_cutter(&mut job, &mut processor)?,
        Strategy::Waterline => waterline(&mut job, &mut processor)?,
    }

    let toolpath = Toolpath {
        paths: processor.finish(),
        status: if job.cancelled {
            GenerationStatus::Cancelled
        } else {
            GenerationStatus::Completed
        },
    };
    let stats = toolpath.stats();
    info!(
        paths = stats.paths,
        points = stats.points,
        cutting_length = stats.cutting_length,
        status = ?toolpath.status,
        "toolpath generated"
    );
    Ok(toolpath)
}

struct Job<'a, 'cb> {
    executor: &'a Executor,
    input: Arc<JobInput>,
    callback: &'a mut ProgressCallback<'cb>,
    cancelled: bool,
}

impl Job<'_, '_> {
    fn settings(&self) -> &ToolpathSettings {
        &self.input.settings
    }

    fn bounds(&self) -> Aabb {
        self.input.bounds
    }

    fn radius(&self) -> f64 {
        self.input.cutter.shape.radius()
    }

    /// Run `T` over `args` and return the outputs in argument order.
    ///
    /// Stops early, leaving a prefix, when the callback asks to cancel.
    fn run<T>(
        &mut self,
        what: &str,
        args: Vec<T::Args>,
        position: impl Fn(&T::Output) -> Option<Point3>,
    ) -> Result<Vec<T::Output>>
    where
        T: Task<Shared = JobInput>,
    {
        let total = args.len();
        debug!(what, total, "submitting tasks");
        let stream =
            self.executor
                .run_in_parallel::<T>(Arc::clone(&self.input), args, ResultOrder::Unordered)?;
        let token = stream.cancel_token();

        let mut outputs = Vec::with_capacity(total);
        let mut last = None;
        for (index, outcome) in Resequencer::new(stream) {
            let done = outputs.len();
            let progress = Progress::step(format!("{what} {}/{total}", done + 1), done, total, last);
            if (self.callback)(&progress) {
                token.cancel();
                self.cancelled = true;
                info!(what, done, total, "generation cancelled");
                break;
            }
            let output = outcome.map_err(|failure| CamError::TaskFailed {
                index,
                message: failure.message,
            })?;
            last = position(&output).or(last);
            outputs.push(output);
        }
        Ok(outputs)
    }
}

/// Axes swept, in order.
fn axes(direction: ScanDirection) -> &'static [Axis] {
    match direction {
        ScanDirection::X => &[Axis::X],
        ScanDirection::Y => &[Axis::Y],
        ScanDirection::Xy => &[Axis::X, Axis::Y],
    }
}

/// Fixed coordinates of the lines along `axis`, starting at the corner.
fn line_positions(bounds: &Aabb, axis: Axis, step: f64, corner: StartCorner) -> Vec<f64> {
    let (lo, hi) = axis.spans(bounds).1;
    let mut positions = grid(lo, hi, step);
    let from_min = match axis {
        Axis::X => corner.from_min_y(),
        Axis::Y => corner.from_min_x(),
    };
    if !from_min {
        positions.reverse();
    }
    positions
}

/// True if runs along `axis` go toward increasing coordinates.
fn runs_forward(settings: &ToolpathSettings, axis: Axis) -> bool {
    match settings.milling_style {
        MillingStyle::Conventional => true,
        MillingStyle::Climb => false,
        MillingStyle::Ignore => match axis {
            Axis::X => settings.start_corner.from_min_x(),
            Axis::Y => settings.start_corner.from_min_y(),
        },
    }
}

fn drop_cutter(job: &mut Job<'_, '_>, processor: &mut PathProcessor) -> Result<()> {
    let settings = job.settings().clone();
    let bounds = job.bounds();
    let (line_step, sample_step) = (settings.line_step(job.radius()), settings.sample_step(job.radius()));

    let mut lines = Vec::new();
    for &axis in axes(settings.direction) {
        let (start, end) = axis.spans(&bounds).0;
        for across in line_positions(&bounds, axis, line_step, settings.start_corner) {
            lines.push(DropLine {
                axis,
                across,
                start,
                end,
                step: sample_step,
            });
        }
    }

    let outputs = job.run::<DropLineTask>("drop line", lines.clone(), |points| points.last().copied())?;
    let mut current = None;
    for (line, mut points) in lines.iter().zip(outputs) {
        if current != Some(line.axis) {
            processor.new_direction();
            current = Some(line.axis);
        }
        if !runs_forward(&settings, line.axis) {
            points.reverse();
        }
        processor.new_scanline();
        for p in points {
            processor.append(p);
        }
        processor.end_scanline();
    }
    processor.end_direction();
    Ok(())
}

fn push_cutter(job: &mut Job<'_, '_>, processor: &mut PathProcessor) -> Result<()> {
    let settings = job.settings().clone();
    let bounds = job.bounds();
    let line_step = settings.line_step(job.radius());
    let layers = settings.layers(bounds.min.z, bounds.max.z);
    debug!(layers = layers.len(), "push cutter layers");

    let mut lines = Vec::new();
    for &z in &layers {
        for &axis in axes(settings.direction) {
            let (start, end) = axis.spans(&bounds).0;
            for across in line_positions(&bounds, axis, line_step, settings.start_corner) {
                lines.push(PushLine {
                    axis,
                    across,
                    start,
                    end,
                    z,
                });
            }
        }
    }

    let outputs = job.run::<PushLineTask>("push line", lines.clone(), |_| None)?;
    let mut current = None;
    for (line, mut free) in lines.iter().zip(outputs) {
        if current != Some((line.z.to_bits(), line.axis)) {
            processor.new_direction();
            current = Some((line.z.to_bits(), line.axis));
        }
        let forward = runs_forward(&settings, line.axis);
        if !forward {
            free.reverse();
        }
        processor.new_scanline();
        for (lo, hi) in free {
            let (a, b) = if forward { (lo, hi) } else { (hi, lo) };
            processor.append(line.axis.point(a, line.across, line.z));
            processor.append(line.axis.point(b, line.across, line.z));
            processor.split_scanline();
        }
        processor.end_scanline();
    }
    processor.end_direction();
    Ok(())
}

fn waterline(job: &mut Job<'_, '_>, processor: &mut PathProcessor) -> Result<()> {
    let settings = job.settings().clone();
    let bounds = job.bounds();
    let mut heights = settings.layers(bounds.min.z, bounds.max.z);
    // Layer numbers follow height so the tie-break does not depend on order.
    let ascending = heights.first() <= heights.last();
    let count = heights.len();
    let layers: Vec<WaterlineLayer> = heights
        .drain(..)
        .enumerate()
        .map(|(i, z)| WaterlineLayer {
            index: if ascending { i } else { count - 1 - i },
            z,
        })
        .collect();

    let outputs = job.run::<WaterlineLayerTask>("waterline layer", layers, |layer: &LayerContours| {
        layer.contours.last().and_then(|c| c.points.last().copied())
    })?;

    let mut ambiguous = 0;
    for layer in outputs {
        ambiguous += layer.ambiguous_joins;
        processor.new_direction();
        for contour in layer.contours {
            let mut points = contour.points;
            if settings.milling_style == MillingStyle::Climb {
                points.reverse();
            }
            processor.new_scanline();
            for p in points {
                processor.append(p);
            }
            processor.end_scanline();
        }
    }
    processor.end_direction();
    if ambiguous > 0 {
        info!(ambiguous, "waterline joins decided by tie-break");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutter::CutterShape;
    use crate::fixtures;
    use crate::path::Path;
    use crate::progress::no_progress;
    use crate::settings::PathPolicy;
    use crate::tasks::registry;
    use approx::assert_relative_eq;
    use millpath_parallel::{DistributedConfig, ParallelConfig};

    fn scenario_a() -> (Model, CutterSpec, ToolpathSettings) {
        let model = Model::from_triangles([[
            Point3::new(-3.0, -4.0, 1.0),
            Point3::new(-3.0, 4.0, 1.0),
            Point3::new(3.0, 0.0, 1.0),
        ]]);
        let cutter = CutterSpec {
            shape: CutterShape::Ball { radius: 1.0 },
            required_clearance: 0.0,
        };
        let settings = ToolpathSettings {
            bounds: Some(Aabb::new(Point3::new(-7.0, -7.0, 0.0), Point3::new(7.0, 7.0, 4.0))),
            line_distance: Some(0.28),
            sample_distance: Some(0.28),
            ..ToolpathSettings::default()
        };
        (model, cutter, settings)
    }

    fn two_boxes() -> Model {
        let mut triangles = fixtures::cuboid(Point3::new(-0.5, -0.5, 0.0), Point3::new(0.5, 0.5, 3.0));
        triangles.extend(fixtures::cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 3.0)));
        Model::from_triangles(triangles)
    }

    fn generate(model: &Model, cutter: &CutterSpec, settings: &ToolpathSettings) -> Toolpath {
        generate_toolpath(model, cutter, settings, &Executor::Sequential, &mut no_progress).unwrap()
    }

    fn all_points(toolpath: &Toolpath) -> impl Iterator<Item = &Point3> {
        toolpath.paths.iter().flat_map(|p| p.points())
    }

    #[test]
    fn test_drop_cutter_over_triangle() {
        let (model, cutter, settings) = scenario_a();
        let toolpath = generate(&model, &cutter, &settings);
        assert_eq!(toolpath.status, GenerationStatus::Completed);
        assert_eq!(toolpath.paths.len(), 51);

        for p in all_points(&toolpath) {
            assert!(p.z >= -1e-9 && p.z <= 1.0 + 1e-9);
            if (-2.5..=0.0).contains(&p.x) && p.y.abs() <= 1.0 {
                assert_relative_eq!(p.z, 1.0, epsilon = 1e-9);
            }
            if p.x < -4.01 || p.x > 4.01 || p.y.abs() > 5.01 {
                assert_relative_eq!(p.z, 0.0);
            }
        }
        // Every line that touches the triangle gains exactly two points,
        // where the ball rolls off its outline onto the floor.
        let samples = grid(-7.0, 7.0, 0.28);
        let mut touching = 0;
        for path in &toolpath.paths {
            let inserted: Vec<&Point3> = path
                .points()
                .iter()
                .filter(|p| !samples.iter().any(|x| (x - p.x).abs() < 1e-9))
                .collect();
            if path.points().iter().all(|p| p.z < 1e-9) {
                assert!(inserted.is_empty());
                continue;
            }
            touching += 1;
            assert_eq!(inserted.len(), 2);
            for p in &inserted {
                assert!(p.z < 1e-3);
            }
            if path.start().y.abs() < 1e-9 {
                assert_relative_eq!(inserted[0].x, -4.0, epsilon = 1e-6);
                assert_relative_eq!(inserted[1].x, 4.0, epsilon = 1e-6);
            }
        }
        assert!(touching > 30);

        // Lines start at the low corner and run toward +x.
        let first = &toolpath.paths[0];
        assert_relative_eq!(first.start().y, -7.0);
        assert!(first.start().x < first.end().x);
    }

    #[test]
    fn test_push_cutter_layers() {
        let model = two_boxes();
        let cutter = CutterSpec {
            shape: CutterShape::Flat { radius: 1.0 },
            required_clearance: 0.0,
        };
        let bounds = Aabb::new(Point3::new(-7.0, -7.0, 2.0), Point3::new(7.0, 7.0, 4.0));
        let settings = ToolpathSettings {
            strategy: Strategy::PushCutter,
            bounds: Some(bounds),
            line_distance: Some(14.0 / 19.0),
            step_down: 2.0 / 3.0,
            ..ToolpathSettings::default()
        };
        let toolpath = generate(&model, &cutter, &settings);

        let mut heights: Vec<f64> = toolpath.paths.iter().map(|p| p.start().z).collect();
        heights.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        assert_eq!(heights.len(), 4);
        assert_relative_eq!(heights[0], 4.0);
        assert_relative_eq!(heights[3], 2.0);
        for p in all_points(&toolpath) {
            assert!(bounds.contains(p, 1e-9));
        }
        // The boxes split the middle lines of the lower layers in two.
        let low: Vec<&Path> = toolpath.paths.iter().filter(|p| p.start().z < 2.5).collect();
        assert!(low.len() > 20);
        assert!(low.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn test_waterline_follows_box() {
        let model = Model::from_triangles(fixtures::cuboid(
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, 1.0, 2.0),
        ));
        let cutter = CutterSpec {
            shape: CutterShape::Flat { radius: 0.5 },
            required_clearance: 0.0,
        };
        let mut settings = ToolpathSettings {
            strategy: Strategy::Waterline,
            bounds: Some(Aabb::new(Point3::new(-3.0, -3.0, 0.5), Point3::new(3.0, 3.0, 1.5))),
            step_down: 0.5,
            ..ToolpathSettings::default()
        };
        let conventional = generate(&model, &cutter, &settings);
        assert_eq!(conventional.paths.len(), 3);
        assert_relative_eq!(conventional.paths[0].start().z, 1.5);

        settings.milling_style = MillingStyle::Climb;
        let climb = generate(&model, &cutter, &settings);
        assert_eq!(climb.paths.len(), 3);
        let mut reversed = conventional.paths[0].clone();
        reversed.reverse();
        assert_eq!(climb.paths[0], reversed);
    }

    #[test]
    fn test_cancel_on_third_poll() {
        let (model, cutter, settings) = scenario_a();
        let mut calls = 0;
        let mut cancel_third = |_: &Progress| {
            calls += 1;
            calls == 3
        };
        let toolpath = generate_toolpath(&model, &cutter, &settings, &Executor::Sequential, &mut cancel_third).unwrap();
        assert!(toolpath.is_cancelled());
        assert_eq!(toolpath.paths.len(), 2);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_configuration_errors_before_work() {
        let (model, cutter, settings) = scenario_a();
        let bad_cutter = CutterSpec {
            shape: CutterShape::Flat { radius: -1.0 },
            ..cutter
        };
        let mut polled = false;
        let mut callback = |_: &Progress| {
            polled = true;
            false
        };
        let err = generate_toolpath(&model, &bad_cutter, &settings, &Executor::Sequential, &mut callback);
        assert!(matches!(err, Err(CamError::InvalidCutter(_))));

        let zigzag_climb = ToolpathSettings {
            milling_style: MillingStyle::Climb,
            path_policy: PathPolicy::ZigZag { safety_height: None },
            ..settings.clone()
        };
        let err = generate_toolpath(&model, &cutter, &zigzag_climb, &Executor::Sequential, &mut callback);
        assert!(matches!(err, Err(CamError::InvalidSettings(_))));

        let flat_box = ToolpathSettings {
            bounds: Some(Aabb::new(Point3::new(0.0, -1.0, 0.0), Point3::new(0.0, 1.0, 1.0))),
            ..settings.clone()
        };
        let err = generate_toolpath(&model, &cutter, &flat_box, &Executor::Sequential, &mut callback);
        assert!(matches!(err, Err(CamError::EmptyBounds(_))));

        let too_fine = ToolpathSettings {
            line_distance: Some(1e-12),
            ..settings.clone()
        };
        let err = generate_toolpath(&model, &cutter, &too_fine, &Executor::Sequential, &mut callback);
        assert!(matches!(err, Err(CamError::InvalidSettings(_))));

        let empty = Model::from_triangles(Vec::new());
        let err = generate_toolpath(&empty, &cutter, &settings, &Executor::Sequential, &mut callback);
        assert!(matches!(err, Err(CamError::EmptyModel)));
        assert!(!polled);
    }

    fn assert_same(a: &Toolpath, b: &Toolpath) {
        assert_eq!(a.status, b.status);
        assert_eq!(a.paths.len(), b.paths.len());
        for (pa, pb) in a.paths.iter().zip(&b.paths) {
            assert_eq!(pa.len(), pb.len());
            for (p, q) in pa.points().iter().zip(pb.points()) {
                assert!((p - q).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn test_executors_agree() {
        let (model, cutter, mut settings) = scenario_a();
        settings.line_distance = Some(1.0);
        settings.direction = ScanDirection::Xy;
        settings.path_policy = PathPolicy::ZigZag {
            safety_height: Some(5.0),
        };
        let sequential = generate(&model, &cutter, &settings);

        let registry = Arc::new(registry());
        let local = Executor::from_config(&ParallelConfig::Local { workers: Some(3) }, Arc::clone(&registry)).unwrap();
        let distributed = Executor::from_config(
            &ParallelConfig::Distributed(DistributedConfig {
                workers: 2,
                secret: "shared".into(),
                ..DistributedConfig::default()
            }),
            registry,
        )
        .unwrap();
        for executor in [&local, &distributed] {
            let toolpath = generate_toolpath(&model, &cutter, &settings, executor, &mut no_progress).unwrap();
            assert_same(&sequential, &toolpath);
        }
    }
}
