//! # Globelet
//!
//! Stacked map-tile loading, caching and scanline texture mapping for a
//! software-rendered raster globe.
//!
//! Base tiles for every texture layer of a theme are loaded from disk (or
//! downloaded in the background), merged into one stacked tile, decorated,
//! cached in a two-tier cache and finally projected onto a canvas one
//! scanline at a time.

pub mod background;
pub mod core;
pub mod prelude;
pub mod rendering;
pub mod tiles;
pub use crate::core::constants;

// Re-export public API
pub use core::{
    config::{MapPerformanceOptions, MapPerformanceProfile, MapQuality},
    geo::{GeoPoint, TileId},
};

pub use tiles::{
    decorator::MergedLayerDecorator,
    download::{DownloadJob, DownloadManager, DownloadUsage},
    loader::TileLoader,
    stacked::{CompletionState, StackedTile},
    stacked_loader::{StackedTileLoader, TileUpdate},
    sun::SunLocator,
    texture::{MapTheme, TextureLayer},
};

pub use background::tasks::{TileJobHandler, TileJobQueue};

pub use rendering::{
    canvas::CanvasImage,
    gnomonic::GnomonicScanlineTextureMapper,
    mapper::{ScanlineTextureMapper, TextureColorizer},
    spherical::SphericalScanlineTextureMapper,
    view::{Projection, ViewParams},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Level zero tile {0} is missing, the theme installation is incomplete")]
    MissingLevelZeroTile(String),

    #[error("Unknown theme or texture layer: {0}")]
    UnknownTheme(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),
}

/// Error type alias for convenience
pub type Error = MapError;

/// Initialise `env_logger` with the `RUST_LOG` filter, ignoring repeated calls.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}
