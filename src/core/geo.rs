use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;

/// Mean earth radius in meters
const EARTH_RADIUS: f64 = 6_371_000.0;

/// Represents a point on the globe, stored in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    /// Creates a new point from radians
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Creates a new point from decimal degrees
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self::new(lon.to_radians(), lat.to_radians())
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon.to_degrees()
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat.to_degrees()
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat.abs() <= FRAC_PI_2 && self.lon.abs() <= PI
    }

    /// Great circle distance to another point using the haversine formula
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let delta_lat = other.lat - self.lat;
        let delta_lon = other.lon - self.lon;

        let a = (delta_lat / 2.0).sin().powi(2)
            + self.lat.cos() * other.lat.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS * c
    }

    /// Wraps a longitude in radians into [-π, π]
    pub fn normalize_lon(lon: f64) -> f64 {
        let mut lon = lon;
        while lon < -PI {
            lon += 2.0 * PI;
        }
        while lon > PI {
            lon -= 2.0 * PI;
        }
        lon
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Stable 32-bit FNV-1a hash used to key themes and texture layers
pub fn theme_hash(id: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    id.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u32).wrapping_mul(PRIME))
}

/// Identifies a tile by theme (or texture layer), zoom level and position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub theme_hash: u32,
    pub zoom_level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(theme_hash: u32, zoom_level: u32, x: u32, y: u32) -> Self {
        Self {
            theme_hash,
            zoom_level,
            x,
            y,
        }
    }

    /// The same position keyed under a different theme or layer
    pub fn with_theme(&self, theme_hash: u32) -> Self {
        Self { theme_hash, ..*self }
    }

    /// Gets the ancestor tile `delta` levels up, if there is one
    pub fn ancestor(&self, delta: u32) -> Option<TileId> {
        if delta > self.zoom_level {
            return None;
        }
        Some(TileId::new(
            self.theme_hash,
            self.zoom_level - delta,
            self.x >> delta,
            self.y >> delta,
        ))
    }

    /// Gets the parent tile at a lower zoom level
    pub fn parent(&self) -> Option<TileId> {
        self.ancestor(1)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.theme_hash, self.zoom_level, self.x, self.y
        )
    }
}

/// Number of tile rows at `level` for a layer with `level_zero_rows` rows at level zero
pub fn level_to_row(level_zero_rows: u32, level: u32) -> u32 {
    level_zero_rows << level
}

/// Number of tile columns at `level` for a layer with `level_zero_columns` columns at level zero
pub fn level_to_column(level_zero_columns: u32, level: u32) -> u32 {
    level_zero_columns << level
}

/// Tile level with the given number of rows, if it is a power-of-two multiple
pub fn row_to_level(level_zero_rows: u32, rows: u32) -> Option<u32> {
    ratio_to_level(level_zero_rows, rows)
}

/// Tile level with the given number of columns, if it is a power-of-two multiple
pub fn column_to_level(level_zero_columns: u32, columns: u32) -> Option<u32> {
    ratio_to_level(level_zero_columns, columns)
}

fn ratio_to_level(level_zero: u32, count: u32) -> Option<u32> {
    if level_zero == 0 || count % level_zero != 0 {
        return None;
    }
    let ratio = count / level_zero;
    ratio.is_power_of_two().then(|| ratio.trailing_zeros())
}
