//! Cutter definitions and their contact with triangles.
//!
//! A cutter is a rotating body described by its shape, placed with its tip
//! at `location`. Contact tests move it along a unit direction until it
//! touches a triangle:
//!
//! | shape | bottom | corner | shaft |
//! |-------|--------|--------|-------|
//! | flat  | disk   |        | cylinder |
//! | ball  |        | sphere | cylinder |
//! | bull  | disk   | torus  | cylinder |
//!
//! The shaft only matters for sideways travel.

mod ball;
mod bull;
mod flat;

use millpath_math::{Point3, Vec3};
use millpath_mesh::Triangle;
use serde::{Deserialize, Serialize};

use crate::error::{CamError, Result};
use crate::intersect::Hit;

/// Geometry of a cutter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CutterShape {
    /// Flat end mill.
    Flat {
        /// Radius of the cutting disk.
        radius: f64,
    },
    /// Ball end mill.
    Ball {
        /// Radius of the ball, equal to the shaft radius.
        radius: f64,
    },
    /// Bull-nose end mill: flat bottom with a rounded corner.
    Bull {
        /// Outer radius.
        radius: f64,
        /// Corner radius, strictly between 0 and `radius`.
        minor_radius: f64,
    },
}

impl CutterShape {
    /// Outer radius of the cutter.
    pub fn radius(&self) -> f64 {
        match self {
            CutterShape::Flat { radius }
            | CutterShape::Ball { radius }
            | CutterShape::Bull { radius, .. } => *radius,
        }
    }
}

/// A cutter as configured in a job: shape plus the clearance kept from
/// the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutterSpec {
    /// Cutter geometry.
    #[serde(flatten)]
    pub shape: CutterShape,
    /// Extra distance kept from the surface in every direction.
    #[serde(default)]
    pub required_clearance: f64,
}

impl Default for CutterSpec {
    fn default() -> Self {
        Self {
            shape: CutterShape::Ball { radius: 1.0 },
            required_clearance: 0.0,
        }
    }
}

impl CutterSpec {
    /// Check the dimensions.
    pub fn validate(&self) -> Result<()> {
        let radius = self.shape.radius();
        if !(radius.is_finite() && radius > 0.0) {
            return Err(CamError::InvalidCutter(format!(
                "radius must be positive, got {radius}"
            )));
        }
        if let CutterShape::Bull { minor_radius, .. } = self.shape {
            if !(minor_radius > 0.0 && minor_radius < radius) {
                return Err(CamError::InvalidCutter(format!(
                    "minor radius must lie in (0, {radius}), got {minor_radius}"
                )));
            }
        }
        if !(self.required_clearance.is_finite() && self.required_clearance >= 0.0) {
            return Err(CamError::InvalidCutter(format!(
                "required clearance must not be negative, got {}",
                self.required_clearance
            )));
        }
        Ok(())
    }
}

/// Where a moving cutter first touches a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Cutter location (tip) at contact.
    pub cl: Point3,
    /// Contact point on the triangle.
    pub cp: Point3,
    /// Signed travel along the direction from the current location.
    pub distance: f64,
}

/// A cutter placed in space.
#[derive(Debug, Clone, PartialEq)]
pub struct Cutter {
    shape: CutterShape,
    required_clearance: f64,
    distance_radius: f64,
    location: Point3,
}

impl Cutter {
    /// Cutter at the origin. Fails if `spec` does not validate.
    pub fn new(spec: &CutterSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            shape: spec.shape,
            required_clearance: spec.required_clearance,
            distance_radius: spec.shape.radius() + spec.required_clearance,
            location: Point3::origin(),
        })
    }

    /// Outer radius.
    pub fn radius(&self) -> f64 {
        self.shape.radius()
    }

    /// Clearance kept from the surface.
    pub fn required_clearance(&self) -> f64 {
        self.required_clearance
    }

    /// Radius plus clearance.
    pub fn distance_radius(&self) -> f64 {
        self.distance_radius
    }

    /// Current tip position.
    pub fn location(&self) -> Point3 {
        self.location
    }

    /// Move the tip to `location`.
    pub fn moveto(&mut self, location: Point3) {
        self.location = location;
    }

    /// First contact when moving along the unit direction `u`.
    pub fn intersect(&self, u: &Vec3, triangle: &Triangle) -> Option<Contact> {
        let hit = match self.shape {
            CutterShape::Flat { .. } => flat::intersect(self, u, triangle),
            CutterShape::Ball { .. } => ball::intersect(self, u, triangle),
            CutterShape::Bull { minor_radius, .. } => {
                bull::intersect(self, minor_radius, u, triangle)
            }
        }?;
        self.contact(hit, u)
    }

    /// First contact when dropping straight down.
    pub fn drop(&self, triangle: &Triangle) -> Option<Contact> {
        self.intersect(&Vec3::new(0.0, 0.0, -1.0), triangle)
    }

    fn contact(&self, hit: Hit, u: &Vec3) -> Option<Contact> {
        hit.distance.is_finite().then(|| Contact {
            cl: self.location + u * hit.distance,
            cp: hit.cp,
            distance: hit.distance,
        })
    }
}
