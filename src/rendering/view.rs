use crate::core::config::MapQuality;
use crate::core::geo::GeoPoint;
use serde::{Deserialize, Serialize};

/// Projection used to map the globe onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Projection {
    /// Orthographic view of the sphere
    #[default]
    Spherical,
    /// Central projection onto a tangent plane
    Gnomonic,
}

/// Everything a texture mapper needs to know about the current view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    /// Geographic point in the middle of the canvas
    pub center: GeoPoint,
    /// Globe radius in pixels
    pub radius: f64,
    pub width: u32,
    pub height: u32,
    pub projection: Projection,
    pub quality: MapQuality,
}

impl ViewParams {
    pub fn new(center: GeoPoint, radius: f64, width: u32, height: u32) -> Self {
        Self {
            center,
            radius,
            width,
            height,
            projection: Projection::default(),
            quality: MapQuality::default(),
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_quality(mut self, quality: MapQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Canvas column of the projection center
    pub fn center_x(&self) -> f64 {
        (self.width / 2) as f64
    }

    /// Canvas row of the projection center
    pub fn center_y(&self) -> f64 {
        (self.height / 2) as f64
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.radius > 0.0 && self.center.is_valid()
    }

    /// Whether the sphere covers every pixel of the canvas
    pub fn globe_covers_canvas(&self) -> bool {
        let half_diagonal = ((self.width as f64 / 2.0).powi(2) + (self.height as f64 / 2.0).powi(2)).sqrt();
        self.radius >= half_diagonal
    }
}
