//! Read-only descriptors of map themes and their texture layers

use crate::constants::{DEFAULT_EXPIRE_SECS, MAPS_DIR, THEME_FILE_NAME, TILE_SIZE};
use crate::core::geo::{theme_hash, TileId};
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How tile rows map to latitudes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureProjection {
    /// Rows are evenly spaced in latitude
    #[default]
    Equirectangular,
    /// Rows are evenly spaced in Mercator y, clipped at ±85.0511°
    Mercator,
}

/// Directory layout of the tiles of one layer below its source directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageLayout {
    /// `{z}/{y:06}/{y:06}_{x:06}.{ext}`
    #[default]
    Marble,
    /// `{z}/{x}/{y}.{ext}`
    OpenStreetMap,
}

/// One raster dataset of a theme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureLayer {
    pub name: String,
    /// Directory below `<data_root>/maps` holding the tiles
    pub source_dir: String,
    #[serde(default = "default_file_format")]
    pub file_format: String,
    #[serde(default = "default_tile_size")]
    pub tile_size: (u32, u32),
    #[serde(default = "default_level_zero_columns")]
    pub level_zero_columns: u32,
    #[serde(default = "default_level_zero_rows")]
    pub level_zero_rows: u32,
    /// Highest level with tiles, discovered on disk when `None`
    #[serde(default)]
    pub max_tile_level: Option<u32>,
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,
    #[serde(default)]
    pub projection: TextureProjection,
    #[serde(default)]
    pub storage_layout: StorageLayout,
    /// URL templates with `{zoom}`, `{x}` and `{y}` placeholders
    #[serde(default)]
    pub download_urls: Vec<String>,
}

fn default_file_format() -> String {
    "jpg".to_string()
}

fn default_tile_size() -> (u32, u32) {
    (TILE_SIZE, TILE_SIZE)
}

fn default_level_zero_columns() -> u32 {
    2
}

fn default_level_zero_rows() -> u32 {
    1
}

fn default_expire_secs() -> u64 {
    DEFAULT_EXPIRE_SECS
}

impl TextureLayer {
    /// A layer with default tiling below `source_dir`
    pub fn new(name: impl Into<String>, source_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_dir: source_dir.into(),
            file_format: default_file_format(),
            tile_size: default_tile_size(),
            level_zero_columns: default_level_zero_columns(),
            level_zero_rows: default_level_zero_rows(),
            max_tile_level: None,
            expire_secs: default_expire_secs(),
            projection: TextureProjection::default(),
            storage_layout: StorageLayout::default(),
            download_urls: Vec::new(),
        }
    }

    pub fn with_file_format(mut self, format: impl Into<String>) -> Self {
        self.file_format = format.into();
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_size = (width, height);
        self
    }

    pub fn with_level_zero(mut self, columns: u32, rows: u32) -> Self {
        self.level_zero_columns = columns;
        self.level_zero_rows = rows;
        self
    }

    pub fn with_max_tile_level(mut self, level: u32) -> Self {
        self.max_tile_level = Some(level);
        self
    }

    pub fn with_expire_secs(mut self, secs: u64) -> Self {
        self.expire_secs = secs;
        self
    }

    pub fn with_projection(mut self, projection: TextureProjection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_storage_layout(mut self, layout: StorageLayout) -> Self {
        self.storage_layout = layout;
        self
    }

    pub fn with_download_url(mut self, template: impl Into<String>) -> Self {
        self.download_urls.push(template.into());
        self
    }

    /// Hash keying the base tiles of this layer
    pub fn source_hash(&self) -> u32 {
        theme_hash(&self.source_dir)
    }

    /// Base tile id of this layer at the given position
    pub fn tile_id(&self, zoom_level: u32, x: u32, y: u32) -> TileId {
        TileId::new(self.source_hash(), zoom_level, x, y)
    }

    /// Tile file path relative to the maps directory
    pub fn relative_tile_file_name(&self, id: &TileId) -> PathBuf {
        let file = match self.storage_layout {
            StorageLayout::Marble => format!(
                "{}/{:06}/{:06}_{:06}.{}",
                id.zoom_level, id.y, id.y, id.x, self.file_format
            ),
            StorageLayout::OpenStreetMap => {
                format!("{}/{}/{}.{}", id.zoom_level, id.x, id.y, self.file_format)
            }
        };
        Path::new(&self.source_dir).join(file)
    }

    /// Download URL of a tile, templates are rotated by tile position
    pub fn download_url(&self, id: &TileId) -> Option<String> {
        if self.download_urls.is_empty() {
            return None;
        }
        let index = (id.x as usize + id.y as usize + id.zoom_level as usize) % self.download_urls.len();
        Some(
            self.download_urls[index]
                .replace("{zoom}", &id.zoom_level.to_string())
                .replace("{x}", &id.x.to_string())
                .replace("{y}", &id.y.to_string()),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.tile_size.0 == 0 || self.tile_size.1 == 0 {
            return Err(MapError::Config(format!(
                "texture layer '{}' has an empty tile size",
                self.name
            )));
        }
        if self.level_zero_columns == 0 || self.level_zero_rows == 0 {
            return Err(MapError::Config(format!(
                "texture layer '{}' needs at least one level zero tile",
                self.name
            )));
        }
        Ok(())
    }
}

/// A map theme: an ordered stack of texture layers, the first one being the ground
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTheme {
    pub target: String,
    pub theme: String,
    pub layers: Vec<TextureLayer>,
}

impl MapTheme {
    pub fn new(target: impl Into<String>, theme: impl Into<String>, layers: Vec<TextureLayer>) -> Self {
        Self {
            target: target.into(),
            theme: theme.into(),
            layers,
        }
    }

    /// `target/theme`
    pub fn id(&self) -> String {
        format!("{}/{}", self.target, self.theme)
    }

    /// Hash keying the stacked tiles of this theme
    pub fn hash(&self) -> u32 {
        theme_hash(&self.id())
    }

    pub fn ground_layer(&self) -> Option<&TextureLayer> {
        self.layers.first()
    }

    /// Loads `<data_root>/maps/<theme_id>/theme.json`
    pub fn load(data_root: &Path, theme_id: &str) -> Result<Self> {
        let path = theme_file(data_root, theme_id);
        if !path.is_file() {
            return Err(MapError::UnknownTheme(theme_id.to_string()));
        }
        let theme: MapTheme = serde_json::from_str(&fs::read_to_string(&path)?)?;
        theme.validate()?;
        log::debug!("loaded theme {} with {} layers", theme.id(), theme.layers.len());
        Ok(theme)
    }

    /// Writes the theme descriptor to its place below `data_root`
    pub fn save(&self, data_root: &Path) -> Result<PathBuf> {
        let path = theme_file(data_root, &self.id());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(MapError::Config(format!("theme {} has no texture layers", self.id())));
        }
        self.layers.iter().try_for_each(TextureLayer::validate)
    }
}

/// `<data_root>/maps`
pub fn maps_dir(data_root: &Path) -> PathBuf {
    data_root.join(MAPS_DIR)
}

fn theme_file(data_root: &Path, theme_id: &str) -> PathBuf {
    maps_dir(data_root).join(theme_id).join(THEME_FILE_NAME)
}
