//! Configuration system for tile loading and scanline rendering
//!
//! This module provides a small hierarchical configuration system that lets
//! callers pick a preset profile or assemble custom options. Every option is
//! serde-serializable so it can live next to the theme data as JSON.

use crate::constants::DEFAULT_VOLATILE_CACHE_KB;
use crate::tiles::download::DownloadUsage;
use serde::{Deserialize, Serialize};

/// Trade-off between rendering speed and quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MapQuality {
    /// Only outlines, textures are sampled like `LowQuality`
    Outline,
    /// Nearest sampling, every other scanline duplicated
    LowQuality,
    /// Nearest sampling on every scanline
    #[default]
    Normal,
    /// Bilinear sampling
    HighQuality,
    /// Bilinear sampling, every column computed exactly
    PrintQuality,
}

impl MapQuality {
    /// Whether every other scanline is copied from the one above
    pub fn is_interlaced(&self) -> bool {
        matches!(self, Self::Outline | Self::LowQuality)
    }

    /// Whether samples are bilinearly interpolated
    pub fn is_high_quality(&self) -> bool {
        matches!(self, Self::HighQuality | Self::PrintQuality)
    }

    /// Whether the sparse horizontal interpolation shortcut is disabled
    pub fn is_print_quality(&self) -> bool {
        matches!(self, Self::PrintQuality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapPerformanceProfile {
    Balanced,
    LowQuality,
    HighQuality,
    Custom(MapPerformanceOptions),
}

impl MapPerformanceProfile {
    pub fn resolve(&self) -> MapPerformanceOptions {
        match self {
            Self::Balanced => MapPerformanceOptions {
                tile_loader: TileLoadingConfig::default(),
                rendering: RenderConfig::default(),
                sun: SunConfig::default(),
            },
            Self::LowQuality => MapPerformanceOptions {
                tile_loader: TileLoadingConfig {
                    volatile_cache_kb: 8_000,
                    background_merge: true,
                    ..TileLoadingConfig::default()
                },
                rendering: RenderConfig {
                    quality: MapQuality::LowQuality,
                    worker_threads: 2,
                    interpolation_step: None,
                },
                sun: SunConfig::default(),
            },
            Self::HighQuality => MapPerformanceOptions {
                tile_loader: TileLoadingConfig {
                    volatile_cache_kb: 100_000,
                    ..TileLoadingConfig::default()
                },
                rendering: RenderConfig {
                    quality: MapQuality::HighQuality,
                    worker_threads: default_worker_threads(),
                    interpolation_step: None,
                },
                sun: SunConfig::default(),
            },
            Self::Custom(options) => options.clone(),
        }
    }
}

impl Default for MapPerformanceProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPerformanceOptions {
    pub tile_loader: TileLoadingConfig,
    pub rendering: RenderConfig,
    pub sun: SunConfig,
}

impl Default for MapPerformanceOptions {
    fn default() -> Self {
        MapPerformanceProfile::default().resolve()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLoadingConfig {
    /// Maximum cost of the volatile tile cache in kilobytes
    pub volatile_cache_kb: u64,
    /// Overrides the expiry configured on every texture layer
    pub expire_secs_override: Option<u64>,
    /// Re-merge tiles on the background job queue after downloads complete
    pub background_merge: bool,
    /// Usage hint passed along with downloads triggered by visible tiles
    pub download_usage: DownloadUsage,
    /// Stamp `zoom/x/y` onto every tile
    pub show_tile_id: bool,
}

impl TileLoadingConfig {
    pub fn volatile_cache_bytes(&self) -> u64 {
        self.volatile_cache_kb * 1024
    }
}

impl Default for TileLoadingConfig {
    fn default() -> Self {
        Self {
            volatile_cache_kb: DEFAULT_VOLATILE_CACHE_KB,
            expire_secs_override: None,
            background_merge: false,
            download_usage: DownloadUsage::Browse,
            show_tile_id: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub quality: MapQuality,
    /// Size of the scanline worker pool
    pub worker_threads: usize,
    /// Fixed horizontal interpolation step, computed from the canvas width when `None`
    pub interpolation_step: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            quality: MapQuality::Normal,
            worker_threads: default_worker_threads(),
            interpolation_step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SunConfig {
    /// Darken the night side of the globe
    pub show_shading: bool,
    /// Paint city lights on the night side instead of plain shading
    pub show_city_lights: bool,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
