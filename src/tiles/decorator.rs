//! Post-merge decoration of stacked tiles: sun shading, city lights and a
//! debug stamp of the tile id.

use crate::constants::CITY_LIGHTS_THEME;
use crate::core::geo::{level_to_column, level_to_row, TileId};
use crate::tiles::image::TileImage;
use crate::tiles::stacked::StackedTile;
use crate::tiles::stacked_loader::StackedTileLoader;
use crate::tiles::sun::SunLocator;
use crate::tiles::texture::{MapTheme, TextureLayer, TextureProjection};
use once_cell::sync::OnceCell;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

const FRAME_COLOR: u32 = 0xffff_0000;
const TEXT_COLOR: u32 = 0xffff_ffff;
const SHADOW_COLOR: u32 = 0xff00_0000;

/// 3x5 glyphs for the characters of a tile id, one row per entry, MSB left
const GLYPHS: [(char, [u8; 5]); 11] = [
    ('0', [0b111, 0b101, 0b101, 0b101, 0b111]),
    ('1', [0b010, 0b110, 0b010, 0b010, 0b111]),
    ('2', [0b111, 0b001, 0b111, 0b100, 0b111]),
    ('3', [0b111, 0b001, 0b111, 0b001, 0b111]),
    ('4', [0b101, 0b101, 0b111, 0b001, 0b001]),
    ('5', [0b111, 0b100, 0b111, 0b001, 0b111]),
    ('6', [0b111, 0b100, 0b111, 0b101, 0b111]),
    ('7', [0b111, 0b001, 0b001, 0b001, 0b001]),
    ('8', [0b111, 0b101, 0b111, 0b101, 0b111]),
    ('9', [0b111, 0b101, 0b111, 0b001, 0b111]),
    ('/', [0b001, 0b001, 0b010, 0b100, 0b100]),
];

fn glyph(c: char) -> Option<&'static [u8; 5]> {
    GLYPHS.iter().find(|(g, _)| *g == c).map(|(_, rows)| rows)
}

/// Maps tile pixels of one layer back to geographic coordinates
struct TileGeometry {
    projection: TextureProjection,
    global_width: f64,
    global_height: f64,
    origin_x: f64,
    origin_y: f64,
}

impl TileGeometry {
    fn new(layer: &TextureLayer, id: &TileId, width: u32, height: u32) -> Self {
        let columns = level_to_column(layer.level_zero_columns, id.zoom_level);
        let rows = level_to_row(layer.level_zero_rows, id.zoom_level);
        Self {
            projection: layer.projection,
            global_width: columns as f64 * width as f64,
            global_height: rows as f64 * height as f64,
            origin_x: id.x as f64 * width as f64,
            origin_y: id.y as f64 * height as f64,
        }
    }

    fn lon(&self, x: u32) -> f64 {
        (self.origin_x + x as f64 + 0.5) / self.global_width * TAU - PI
    }

    fn lat(&self, y: u32) -> f64 {
        let v = (self.origin_y + y as f64 + 0.5) / self.global_height;
        match self.projection {
            TextureProjection::Equirectangular => FRAC_PI_2 - v * PI,
            TextureProjection::Mercator => (PI - v * TAU).sinh().atan(),
        }
    }
}

/// Applies the decorations to freshly merged stacked tiles
pub struct MergedLayerDecorator {
    data_root: PathBuf,
    sun: RwLock<SunLocator>,
    show_tile_id: AtomicBool,
    city_lights: OnceCell<Option<u32>>,
}

impl MergedLayerDecorator {
    pub fn new(data_root: impl Into<PathBuf>, sun: SunLocator) -> Self {
        Self {
            data_root: data_root.into(),
            sun: RwLock::new(sun),
            show_tile_id: AtomicBool::new(false),
            city_lights: OnceCell::new(),
        }
    }

    pub fn sun_locator(&self) -> SunLocator {
        *self.sun.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_sun_locator(&self, sun: SunLocator) {
        *self.sun.write().unwrap_or_else(PoisonError::into_inner) = sun;
    }

    pub fn show_tile_id(&self) -> bool {
        self.show_tile_id.load(Ordering::Relaxed)
    }

    pub fn set_show_tile_id(&self, show: bool) {
        self.show_tile_id.store(show, Ordering::Relaxed);
    }

    /// Decorates a merged tile in place, nothing happens for tiles loaded on behalf of a decoration
    pub fn decorate(&self, tile: &StackedTile, ground: &TextureLayer, loader: &StackedTileLoader) {
        if tile.for_merged_layer_decorator() {
            return;
        }
        let sun = self.sun_locator();
        let show_tile_id = self.show_tile_id();
        if !sun.show() && !show_tile_id {
            return;
        }

        let raster = tile.result();
        if raster.depth() != 32 {
            log::debug!("not decorating tile {} of depth {}", tile.id(), raster.depth());
            return;
        }
        let mut image = raster.image().clone();

        if sun.show() {
            let night = if sun.citylights() {
                self.city_lights_tile(tile.id(), loader)
            } else {
                None
            };
            match night {
                Some(night) => paint_city_lights(&sun, &mut image, &night, ground, &tile.id()),
                None => paint_sun_shading(&sun, &mut image, ground, &tile.id()),
            }
        }
        if show_tile_id {
            paint_tile_id(&mut image, &tile.id());
        }
        tile.set_result_image(image);
    }

    /// Hash of the night lights theme, registered with the loader on first use
    fn city_lights_hash(&self, loader: &StackedTileLoader) -> Option<u32> {
        *self.city_lights.get_or_init(|| {
            match MapTheme::load(&self.data_root, CITY_LIGHTS_THEME) {
                Ok(theme) => {
                    let hash = theme.hash();
                    loader.register_theme(theme);
                    Some(hash)
                }
                Err(e) => {
                    log::warn!("city lights unavailable: {}", e);
                    None
                }
            }
        })
    }

    fn city_lights_tile(&self, id: TileId, loader: &StackedTileLoader) -> Option<TileImage> {
        let hash = self.city_lights_hash(loader)?;
        match loader.load_tile(id.with_theme(hash), true) {
            Ok(tile) => {
                let raster = tile.result();
                (!raster.is_null()).then(|| raster.image().clone())
            }
            Err(e) => {
                log::warn!("cannot load city lights for {}: {}", id, e);
                None
            }
        }
    }
}

fn paint_sun_shading(sun: &SunLocator, image: &mut TileImage, ground: &TextureLayer, id: &TileId) {
    let (width, height) = image.size();
    let geometry = TileGeometry::new(ground, id, width, height);
    let sun_lat = sun.position().lat;

    for y in 0..height {
        let lat = geometry.lat(y);
        let a = ((lat - sun_lat) / 2.0).sin();
        let c = lat.cos() * sun_lat.cos();
        for x in 0..width {
            let brightness = sun.shading_with(geometry.lon(x), a, c);
            if brightness < 0.99999 {
                let shaded = sun.shade_pixel(image.pixel(x, y), brightness);
                image.set_pixel(x, y, shaded);
            }
        }
    }
}

fn paint_city_lights(sun: &SunLocator, image: &mut TileImage, night: &TileImage, ground: &TextureLayer, id: &TileId) {
    let (width, height) = image.size();
    let night = if night.size() == (width, height) {
        night.clone()
    } else {
        night.scaled(width, height)
    };
    let geometry = TileGeometry::new(ground, id, width, height);
    let sun_lat = sun.position().lat;

    for y in 0..height {
        let lat = geometry.lat(y);
        let a = ((lat - sun_lat) / 2.0).sin();
        let c = lat.cos() * sun_lat.cos();
        for x in 0..width {
            let brightness = sun.shading_with(geometry.lon(x), a, c);
            if brightness < 0.99999 {
                let lit = sun.shade_pixel_composite(image.pixel(x, y), night.pixel(x, y), brightness);
                image.set_pixel(x, y, lit);
            }
        }
    }
}

fn paint_tile_id(image: &mut TileImage, id: &TileId) {
    let (width, height) = image.size();
    if width < 2 || height < 2 {
        return;
    }
    for x in 0..width {
        image.set_pixel(x, 0, FRAME_COLOR);
        image.set_pixel(x, height - 1, FRAME_COLOR);
    }
    for y in 0..height {
        image.set_pixel(0, y, FRAME_COLOR);
        image.set_pixel(width - 1, y, FRAME_COLOR);
    }

    let text = format!("{}/{}/{}", id.zoom_level, id.x, id.y);
    let scale = (width / 100).max(1);
    let advance = 4 * scale;
    let text_width = advance * text.chars().count() as u32;
    let left = width.saturating_sub(text_width) / 2;
    let top = height.saturating_sub(5 * scale) / 2;

    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else {
            continue;
        };
        let x0 = left + i as u32 * advance;
        draw_glyph(image, rows, x0 + 1, top + 1, scale, SHADOW_COLOR);
        draw_glyph(image, rows, x0, top, scale, TEXT_COLOR);
    }
}

fn draw_glyph(image: &mut TileImage, rows: &[u8; 5], x0: u32, y0: u32, scale: u32, color: u32) {
    for (row, bits) in rows.iter().enumerate() {
        for column in 0..3u32 {
            if bits & (0b100 >> column) == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let x = x0 + column * scale + dx;
                    let y = y0 + row as u32 * scale + dy;
                    if x < image.width() && y < image.height() {
                        image.set_pixel(x, y, color);
                    }
                }
            }
        }
    }
}
