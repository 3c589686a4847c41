//! Toolpaths: ordered point sequences plus a completion status.

use millpath_math::Point3;
use serde::{Deserialize, Serialize};

/// An ordered, non-empty sequence of cutter locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point3>", into = "Vec<Point3>")]
pub struct Path {
    points: Vec<Point3>,
}

impl Path {
    /// Path through `points`; `None` if there are none.
    pub fn new(points: Vec<Point3>) -> Option<Self> {
        (!points.is_empty()).then_some(Self { points })
    }

    /// The points, in travel order.
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// First point.
    pub fn start(&self) -> Point3 {
        self.points[0]
    }

    /// Last point.
    pub fn end(&self) -> Point3 {
        self.points[self.points.len() - 1]
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Never true: a path has at least one point.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total length of the polyline.
    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
    }

    /// Reverse the travel direction.
    pub fn reverse(&mut self) {
        self.points.reverse();
    }
}

impl TryFrom<Vec<Point3>> for Path {
    type Error = &'static str;

    fn try_from(points: Vec<Point3>) -> Result<Self, Self::Error> {
        Path::new(points).ok_or("a path needs at least one point")
    }
}

impl From<Path> for Vec<Point3> {
    fn from(path: Path) -> Self {
        path.points
    }
}

/// Whether generation ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Every line or layer was processed.
    Completed,
    /// The progress callback asked to stop; paths cover what was done.
    Cancelled,
}

/// The output of toolpath generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toolpath {
    /// Paths in machining order.
    pub paths: Vec<Path>,
    /// Completion status.
    pub status: GenerationStatus,
}

/// Summary numbers for a toolpath.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolpathStats {
    /// Number of paths.
    pub paths: usize,
    /// Number of points over all paths.
    pub points: usize,
    /// Length travelled along the paths, excluding moves between them.
    pub cutting_length: f64,
}

impl Toolpath {
    /// True if generation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == GenerationStatus::Cancelled
    }

    /// Path count, point count and cutting length.
    pub fn stats(&self) -> ToolpathStats {
        ToolpathStats {
            paths: self.paths.len(),
            points: self.paths.iter().map(Path::len).sum(),
            cutting_length: self.paths.iter().map(Path::length).sum(),
        }
    }
}
