use crate::core::config::RenderConfig;
use crate::core::geo::GeoPoint;
use crate::rendering::mapper::{fill_span, MapperState, ScanlineTextureMapper};
use crate::rendering::view::ViewParams;
use crate::tiles::stacked_loader::StackedTileLoader;
use crate::Result;
use std::f64::consts::PI;
use std::sync::Arc;

/// Central projection, every canvas pixel shows a point of the near hemisphere
pub struct GnomonicScanlineTextureMapper {
    state: MapperState,
}

impl GnomonicScanlineTextureMapper {
    pub fn new(loader: Arc<StackedTileLoader>, config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            state: MapperState::new(loader, config)?,
        })
    }
}

/// Inverse gnomonic projection of a canvas pixel
pub fn geo_coordinates(view: &ViewParams, x: f64, y: f64) -> (f64, f64) {
    let GeoPoint { lon: lon0, lat: lat0 } = view.center;
    let pixel_to_rad = PI / (2.0 * view.radius);
    let rx = (x - view.center_x()) * pixel_to_rad;
    let ry = (view.center_y() - y) * pixel_to_rad;
    let p = (rx * rx + ry * ry).sqrt();
    if p == 0.0 {
        return (lon0, lat0);
    }

    let c = p.atan();
    let (sin_c, cos_c) = c.sin_cos();
    let lon = lon0 + (rx * sin_c).atan2(p * lat0.cos() * cos_c - ry * lat0.sin() * sin_c);
    let lat = (cos_c * lat0.sin() + ry * sin_c * lat0.cos() / p).clamp(-1.0, 1.0).asin();
    (GeoPoint::normalize_lon(lon), lat)
}

impl ScanlineTextureMapper for GnomonicScanlineTextureMapper {
    fn state(&self) -> &MapperState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut MapperState {
        &mut self.state
    }

    fn render(&mut self, view: &ViewParams) -> Result<()> {
        let n = self.state.interpolation_step(view);
        let width = view.width as usize;
        self.state.render_bands(view, |context, row, y| {
            fill_span(context, row, 0, width, n, view, |x| {
                geo_coordinates(view, x as f64, y as f64)
            });
        })
    }
}
