//! Engine-wide defaults for tile loading, caching and shading.
//! Keeping them in a single place makes it easier to tweak the magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 675;

/// Default volatile (in-memory) tile cache size in kilobytes.
pub const DEFAULT_VOLATILE_CACHE_KB: u64 = 20_000;

/// Default expiry of tiles on disk (one week).
pub const DEFAULT_EXPIRE_SECS: u64 = 60 * 60 * 24 * 7;

/// Upper bound (exclusive) for the horizontal interpolation step.
pub const MAX_INTERPOLATION_STEP: usize = 48;

/// Width of the twilight band in haversine space.
pub const TWILIGHT_DIAMETER: f64 = 0.1;

/// Brightness multiplier applied to pixels on the night side.
pub const SHADOW_FACTOR: f64 = 0.35;

/// Name of the theme descriptor inside a theme directory.
pub const THEME_FILE_NAME: &str = "theme.json";

/// Directory below the data root that holds all map themes.
pub const MAPS_DIR: &str = "maps";

/// Theme id of the night lights dataset used for city light decoration.
pub const CITY_LIGHTS_THEME: &str = "earth/citylights";
