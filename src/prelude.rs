//! Prelude module for common globelet types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use globelet::prelude::*;`

pub use crate::core::{
    config::{
        MapPerformanceOptions, MapPerformanceProfile, MapQuality, RenderConfig, SunConfig,
        TileLoadingConfig,
    },
    geo::{theme_hash, GeoPoint, TileId},
};

pub use crate::tiles::{
    base::{MergeRule, TextureTile, TileState},
    decorator::MergedLayerDecorator,
    download::{DownloadJob, DownloadManager, DownloadUsage, OfflineDownloadManager},
    image::TileImage,
    loader::TileLoader,
    stacked::{CompletionState, ResultRaster, StackedTile},
    stacked_loader::{StackedTileLoader, TileUpdate},
    sun::SunLocator,
    texture::{MapTheme, StorageLayout, TextureLayer, TextureProjection},
};

#[cfg(feature = "tokio-runtime")]
pub use crate::tiles::download::HttpDownloadManager;

pub use crate::background::tasks::{TileJob, TileJobHandler, TileJobQueue, TileJobQueueConfig};

pub use crate::rendering::{
    create_mapper, CanvasImage, GnomonicScanlineTextureMapper, Projection, Rect,
    ScanlineTextureMapper, SphericalScanlineTextureMapper, TextureColorizer, ViewParams,
};

pub use crate::{Error as MapError, Result};

pub use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
