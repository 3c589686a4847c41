//! Turns raw cutter locations into ordered paths.
//!
//! Generators feed the processor scan line by scan line:
//!
//! ```text
//! new_direction
//!   new_scanline  append* (split_scanline append*)*  end_scanline
//!   ...
//! end_direction
//! ...
//! finish
//! ```
//!
//! A scan line may hold several runs (separated by `split_scanline`); each
//! run becomes a path, or with a zig-zag safety height, part of one.

use millpath_math::{points_near_eq, Point3};

use crate::path::Path;
use crate::settings::PathPolicy;

type Run = Vec<Point3>;

/// Collects runs of points into paths according to a [`PathPolicy`].
#[derive(Debug)]
pub struct PathProcessor {
    policy: PathPolicy,
    paths: Vec<Path>,
    /// Scan lines of the current direction (zig-zag only).
    sweep: Vec<Vec<Run>>,
    /// Finished runs of the current scan line.
    scanline: Vec<Run>,
    run: Run,
}

impl PathProcessor {
    /// Empty processor.
    pub fn new(policy: PathPolicy) -> Self {
        Self {
            policy,
            paths: Vec::new(),
            sweep: Vec::new(),
            scanline: Vec::new(),
            run: Vec::new(),
        }
    }

    /// Start a sweep of scan lines in one direction.
    pub fn new_direction(&mut self) {
        self.end_direction();
    }

    /// Start a scan line.
    pub fn new_scanline(&mut self) {
        self.end_scanline();
    }

    /// Add a point to the current run. Repeated points are dropped.
    pub fn append(&mut self, point: Point3) {
        if self.run.last().is_some_and(|last| points_near_eq(last, &point)) {
            return;
        }
        self.run.push(point);
    }

    /// Close the current run; the scan line continues with a new one.
    pub fn split_scanline(&mut self) {
        if !self.run.is_empty() {
            self.scanline.push(std::mem::take(&mut self.run));
        }
    }

    /// Close the current scan line.
    pub fn end_scanline(&mut self) {
        self.split_scanline();
        let runs = std::mem::take(&mut self.scanline);
        if runs.is_empty() {
            return;
        }
        match self.policy {
            PathPolicy::Simple => self.paths.extend(runs.into_iter().filter_map(Path::new)),
            PathPolicy::ZigZag { .. } => self.sweep.push(runs),
        }
    }

    /// Close the current sweep, emitting buffered zig-zag scan lines.
    pub fn end_direction(&mut self) {
        self.end_scanline();
        let PathPolicy::ZigZag { safety_height } = self.policy else {
            return;
        };
        let mut runs: Vec<Run> = Vec::new();
        for (i, mut scanline) in std::mem::take(&mut self.sweep).into_iter().enumerate() {
            if i % 2 == 1 {
                scanline.reverse();
                for run in &mut scanline {
                    run.reverse();
                }
            }
            runs.extend(scanline);
        }
        match safety_height {
            None => self.paths.extend(runs.into_iter().filter_map(Path::new)),
            Some(height) => {
                let mut joined: Run = Vec::new();
                for run in runs {
                    if let (Some(from), Some(to)) = (joined.last().copied(), run.first()) {
                        joined.push(Point3::new(from.x, from.y, height));
                        joined.push(Point3::new(to.x, to.y, height));
                    }
                    joined.extend(run);
                }
                self.paths.extend(Path::new(joined));
            }
        }
    }

    /// Close everything and return the paths.
    pub fn finish(mut self) -> Vec<Path> {
        self.end_direction();
        self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    fn feed(processor: &mut PathProcessor) {
        processor.new_direction();
        for y in 0..3 {
            let y = y as f64;
            processor.new_scanline();
            processor.append(p(0.0, y));
            processor.append(p(1.0, y));
            processor.split_scanline();
            processor.append(p(2.0, y));
            processor.append(p(3.0, y));
            processor.end_scanline();
        }
        processor.end_direction();
    }

    fn xs(path: &Path) -> Vec<f64> {
        path.points().iter().map(|q| q.x).collect()
    }

    #[test]
    fn test_simple_one_path_per_run() {
        let mut processor = PathProcessor::new(PathPolicy::Simple);
        feed(&mut processor);
        let paths = processor.finish();
        assert_eq!(paths.len(), 6);
        assert!(paths.iter().all(|path| xs(path)[0] < xs(path)[1]));
    }

    #[test]
    fn test_zigzag_reverses_every_other_line() {
        let mut processor = PathProcessor::new(PathPolicy::ZigZag {
            safety_height: None,
        });
        feed(&mut processor);
        let paths = processor.finish();
        assert_eq!(paths.len(), 6);
        assert_eq!(xs(&paths[0]), vec![0.0, 1.0]);
        assert_eq!(xs(&paths[1]), vec![2.0, 3.0]);
        assert_eq!(xs(&paths[2]), vec![3.0, 2.0]);
        assert_eq!(xs(&paths[3]), vec![1.0, 0.0]);
        assert_eq!(xs(&paths[4]), vec![0.0, 1.0]);
    }

    #[test]
    fn test_zigzag_safety_height_joins_runs() {
        let mut processor = PathProcessor::new(PathPolicy::ZigZag {
            safety_height: Some(5.0),
        });
        feed(&mut processor);
        let paths = processor.finish();
        assert_eq!(paths.len(), 1);
        let points = paths[0].points();
        // 12 cutting points plus two retract points between each of 6 runs.
        assert_eq!(points.len(), 12 + 2 * 5);
        assert_eq!(points[2], Point3::new(1.0, 0.0, 5.0));
        assert_eq!(points[3], Point3::new(2.0, 0.0, 5.0));
    }

    #[test]
    fn test_empty_scanlines_produce_no_paths() {
        let mut processor = PathProcessor::new(PathPolicy::Simple);
        processor.new_direction();
        processor.new_scanline();
        processor.split_scanline();
        processor.end_scanline();
        processor.append(p(0.0, 0.0));
        processor.append(p(0.0, 0.0));
        let paths = processor.finish();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 1);
    }
}
