//! Per-band sampling state shared by the scanline texture mappers
//!
//! A context turns geographic coordinates into a position on the global
//! texture of the ground layer at one tile level, finds the stacked tile
//! that covers it and reads the color through the tile's result raster.
//! The raster of the current tile is kept as a snapshot so consecutive
//! samples on a scanline do not touch the loader at all.

use crate::constants::MAX_INTERPOLATION_STEP;
use crate::core::geo::{level_to_column, level_to_row, TileId};
use crate::rendering::view::{Projection, ViewParams};
use crate::tiles::stacked::ResultRaster;
use crate::tiles::stacked_loader::StackedTileLoader;
use crate::tiles::texture::{TextureLayer, TextureProjection};
use crate::MapError;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::sync::Arc;

/// Deepest level considered when the loader knows no maximum
const FALLBACK_MAX_TILE_LEVEL: u32 = 20;

/// Latitude where the Mercator texture ends, `atan(sinh(π))`
const MAX_MERCATOR_LAT: f64 = 1.484_422_229_745_332;

struct CurrentTile {
    x: u32,
    y: u32,
    raster: Arc<ResultRaster>,
}

pub struct ScanlineTextureMapperContext<'a> {
    loader: &'a StackedTileLoader,
    theme_hash: u32,
    tile_level: u32,
    projection: TextureProjection,
    tile_width: f64,
    tile_height: f64,
    columns: u32,
    rows: u32,
    global_width: f64,
    global_height: f64,
    current: Option<CurrentTile>,
    prev_position: Option<(f64, f64)>,
    error: Option<MapError>,
}

impl<'a> ScanlineTextureMapperContext<'a> {
    pub fn new(loader: &'a StackedTileLoader, ground: &TextureLayer, tile_level: u32) -> Self {
        let (tile_width, tile_height) = ground.tile_size;
        let columns = level_to_column(ground.level_zero_columns, tile_level);
        let rows = level_to_row(ground.level_zero_rows, tile_level);
        Self {
            loader,
            theme_hash: loader.theme_hash(),
            tile_level,
            projection: ground.projection,
            tile_width: tile_width as f64,
            tile_height: tile_height as f64,
            columns,
            rows,
            global_width: tile_width as f64 * columns as f64,
            global_height: tile_height as f64 * rows as f64,
            current: None,
            prev_position: None,
            error: None,
        }
    }

    pub fn tile_level(&self) -> u32 {
        self.tile_level
    }

    /// Size of the whole texture at the current tile level in pixels
    pub fn global_size(&self) -> (f64, f64) {
        (self.global_width, self.global_height)
    }

    /// Position on the global texture, x grows eastwards from the dateline
    pub fn texture_position(&self, lon: f64, lat: f64) -> (f64, f64) {
        let x = (lon + PI) * self.global_width / (2.0 * PI);
        let y = match self.projection {
            TextureProjection::Equirectangular => (FRAC_PI_2 - lat) * self.global_height / PI,
            TextureProjection::Mercator => {
                let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
                (PI - (FRAC_PI_4 + lat / 2.0).tan().ln()) * self.global_height / (2.0 * PI)
            }
        };
        (x, y)
    }

    /// Nearest neighbour color at a geographic position
    pub fn pixel_value(&mut self, lon: f64, lat: f64) -> u32 {
        self.exact(lon, lat, false)
    }

    /// Bilinearly interpolated color at a geographic position
    pub fn pixel_value_f(&mut self, lon: f64, lat: f64) -> u32 {
        self.exact(lon, lat, true)
    }

    /// Fills `out` with nearest neighbour samples spaced evenly between the
    /// previous exact sample and `(lon, lat)`, exclusive on both ends
    pub fn pixel_value_approx(&mut self, lon: f64, lat: f64, out: &mut [u32]) {
        self.approx(lon, lat, out, false);
    }

    /// Bilinear variant of [`Self::pixel_value_approx`]
    pub fn pixel_value_approx_f(&mut self, lon: f64, lat: f64, out: &mut [u32]) {
        self.approx(lon, lat, out, true);
    }

    /// Hands back the first tile loading error this context ran into
    pub fn take_error(&mut self) -> Option<MapError> {
        self.error.take()
    }

    fn exact(&mut self, lon: f64, lat: f64, bilinear: bool) -> u32 {
        let (x, y) = self.texture_position(lon, lat);
        self.prev_position = Some((x, y));
        self.sample(x, y, bilinear)
    }

    fn approx(&mut self, lon: f64, lat: f64, out: &mut [u32], bilinear: bool) {
        let (x1, y1) = self.texture_position(lon, lat);
        let (x0, y0) = self.prev_position.unwrap_or((x1, y1));

        // crossing the dateline takes the short way round
        let mut dx = x1 - x0;
        if dx > self.global_width / 2.0 {
            dx -= self.global_width;
        } else if dx < -self.global_width / 2.0 {
            dx += self.global_width;
        }
        let dy = y1 - y0;

        let steps = (out.len() + 1) as f64;
        for (j, px) in out.iter_mut().enumerate() {
            let t = (j + 1) as f64 / steps;
            *px = self.sample(x0 + dx * t, y0 + dy * t, bilinear);
        }
    }

    fn sample(&mut self, x: f64, y: f64, bilinear: bool) -> u32 {
        let x = x.rem_euclid(self.global_width);
        let y = y.clamp(0.0, self.global_height - 1.0);
        let tile_x = ((x / self.tile_width) as u32).min(self.columns - 1);
        let tile_y = ((y / self.tile_height) as u32).min(self.rows - 1);
        let local_x = x - tile_x as f64 * self.tile_width;
        let local_y = y - tile_y as f64 * self.tile_height;

        let Some(raster) = self.raster(tile_x, tile_y) else {
            return 0;
        };
        if raster.is_null() {
            return 0;
        }
        let max_x = (raster.width() - 1) as f64;
        let max_y = (raster.height() - 1) as f64;
        if bilinear {
            raster.pixel_f(local_x.min(max_x), local_y.min(max_y))
        } else {
            raster.pixel(local_x.min(max_x) as u32, local_y.min(max_y) as u32)
        }
    }

    fn raster(&mut self, tile_x: u32, tile_y: u32) -> Option<&ResultRaster> {
        let stale = !matches!(&self.current, Some(current) if current.x == tile_x && current.y == tile_y);
        if stale {
            let id = TileId::new(self.theme_hash, self.tile_level, tile_x, tile_y);
            let raster = match self.loader.load_tile(id, false) {
                Ok(tile) => tile.result(),
                Err(e) => {
                    log::warn!("cannot load tile {}: {}", id, e);
                    if self.error.is_none() {
                        self.error = Some(e);
                    }
                    Arc::new(ResultRaster::null())
                }
            };
            self.current = Some(CurrentTile {
                x: tile_x,
                y: tile_y,
                raster,
            });
        }
        self.current.as_ref().map(|current| &*current.raster)
    }
}

/// Horizontal distance between exactly computed pixels on a scanline
pub fn interpolation_step(view: &ViewParams) -> usize {
    if view.quality.is_print_quality() || view.width < 2 {
        return 1;
    }
    let span = view.width as usize - 1;
    let mut best = 1;
    let mut best_eval = span;
    for n in 2..MAX_INTERPOLATION_STEP {
        let eval = span / n + span % n;
        if eval < best_eval {
            best_eval = eval;
            best = n;
        }
    }
    best
}

/// Coarsest tile level whose texture is at least as wide as the visible globe
pub fn tile_zoom_level(view: &ViewParams, ground: &TextureLayer, max_level: Option<u32>) -> u32 {
    let needed = match view.projection {
        Projection::Spherical => 2.0 * PI * view.radius,
        Projection::Gnomonic => 4.0 * view.radius,
    };
    let cap = max_level.unwrap_or(FALLBACK_MAX_TILE_LEVEL);
    let mut level = 0;
    while level < cap {
        let width = ground.tile_size.0 as f64 * level_to_column(ground.level_zero_columns, level) as f64;
        if width >= needed {
            break;
        }
        level += 1;
    }
    level
}
