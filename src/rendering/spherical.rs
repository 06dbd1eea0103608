use crate::core::config::RenderConfig;
use crate::core::geo::GeoPoint;
use crate::rendering::mapper::{fill_span, MapperState, ScanlineTextureMapper};
use crate::rendering::view::ViewParams;
use crate::tiles::stacked_loader::StackedTileLoader;
use crate::Result;
use std::sync::Arc;

/// Orthographic globe, pixels outside the disk keep the background
pub struct SphericalScanlineTextureMapper {
    state: MapperState,
    last_radius: Option<f64>,
}

impl SphericalScanlineTextureMapper {
    pub fn new(loader: Arc<StackedTileLoader>, config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            state: MapperState::new(loader, config)?,
            last_radius: None,
        })
    }
}

/// Columns `[start, end)` of row `y` that lie on the disk
fn disk_span(view: &ViewParams, y: u32) -> Option<(usize, usize)> {
    let dy = view.center_y() - y as f64;
    if dy.abs() > view.radius {
        return None;
    }
    let half = (view.radius * view.radius - dy * dy).sqrt();
    let start = (view.center_x() - half).ceil().max(0.0) as usize;
    let end = ((view.center_x() + half).floor() + 1.0).min(view.width as f64).max(0.0) as usize;
    (start < end).then_some((start, end))
}

/// Inverse orthographic projection of a canvas pixel
///
/// Points just off the rim are pulled onto it, the span logic never asks
/// for anything further out.
pub fn geo_coordinates(view: &ViewParams, x: f64, y: f64) -> (f64, f64) {
    let GeoPoint { lon: lon0, lat: lat0 } = view.center;
    let rx = (x - view.center_x()) / view.radius;
    let ry = (view.center_y() - y) / view.radius;
    let rz = (1.0 - rx * rx - ry * ry).max(0.0).sqrt();

    let lat = (rz * lat0.sin() + ry * lat0.cos()).clamp(-1.0, 1.0).asin();
    let lon = lon0 + rx.atan2(rz * lat0.cos() - ry * lat0.sin());
    (GeoPoint::normalize_lon(lon), lat)
}

impl ScanlineTextureMapper for SphericalScanlineTextureMapper {
    fn state(&self) -> &MapperState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MapperState {
        &mut self.state
    }

    fn render(&mut self, view: &ViewParams) -> Result<()> {
        let resized = self.state.prepare_canvas(view);
        if resized || self.last_radius != Some(view.radius) {
            // the old disk may stick out of the new one
            self.state.canvas_mut().fill(0);
            self.last_radius = Some(view.radius);
        }

        let n = self.state.interpolation_step(view);
        self.state.render_bands(view, |context, row, y| {
            if let Some((start, end)) = disk_span(view, y) {
                fill_span(context, row, start, end, n, view, |x| {
                    geo_coordinates(view, x as f64, y as f64)
                });
            }
        })
    }
}
