//! Progress reporting and cooperative cancellation.

use millpath_math::Point3;

/// A progress update passed to the generation callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// What is being worked on.
    pub text: Option<String>,
    /// Completion, 0 to 100.
    pub percent: Option<f64>,
    /// Last computed tool position.
    pub tool_position: Option<Point3>,
}

impl Progress {
    /// Update for item `done` of `total`.
    pub(crate) fn step(text: String, done: usize, total: usize, tool_position: Option<Point3>) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            100.0 * done as f64 / total as f64
        };
        Self {
            text: Some(text),
            percent: Some(percent),
            tool_position,
        }
    }
}

/// Callback polled once per scan line or layer. Returning `true` cancels
/// generation.
pub type ProgressCallback<'a> = dyn FnMut(&Progress) -> bool + 'a;

/// Callback that never cancels.
pub fn no_progress(_: &Progress) -> bool {
    false
}
