use crate::core::geo::TileId;
use crate::tiles::base::{TextureTile, TileState};
use crate::tiles::download::{DownloadJob, DownloadManager, DownloadUsage};
use crate::tiles::image::TileImage;
use crate::tiles::texture::{maps_dir, TextureLayer};
use crate::{MapError, Result};
use fxhash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

/// Called with `(stacked_id, tile_id)` whenever a downloaded tile replaced its pixels
pub type TileCompletedCallback = Arc<dyn Fn(TileId, TileId) + Send + Sync>;

type CallbackSlot = Arc<RwLock<Option<TileCompletedCallback>>>;

/// Loads base tiles of texture layers from disk and schedules downloads for
/// whatever is missing or outdated.
///
/// Disk reads happen synchronously on the calling thread; downloads go
/// through the [`DownloadManager`] and report back via the completion callback.
pub struct TileLoader {
    data_root: PathBuf,
    layers: RwLock<FxHashMap<u32, TextureLayer>>,
    download_manager: Arc<dyn DownloadManager>,
    expire_override: Option<u64>,
    on_tile_completed: CallbackSlot,
}

impl TileLoader {
    pub fn new(data_root: impl Into<PathBuf>, download_manager: Arc<dyn DownloadManager>) -> Self {
        Self {
            data_root: data_root.into(),
            layers: RwLock::new(FxHashMap::default()),
            download_manager,
            expire_override: None,
            on_tile_completed: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the expiry of every layer
    pub fn with_expire_override(mut self, expire_secs: Option<u64>) -> Self {
        self.expire_override = expire_secs;
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Makes the tiles of these layers loadable
    pub fn add_layers<'a>(&self, layers: impl IntoIterator<Item = &'a TextureLayer>) {
        let mut known = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        for layer in layers {
            known.insert(layer.source_hash(), layer.clone());
        }
    }

    pub fn layer(&self, source_hash: u32) -> Option<TextureLayer> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source_hash)
            .cloned()
    }

    pub fn set_tile_completed_callback(&self, callback: TileCompletedCallback) {
        *self.on_tile_completed.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn layer_for(&self, id: &TileId) -> Result<TextureLayer> {
        self.layer(id.theme_hash)
            .ok_or_else(|| MapError::Config(format!("no texture layer registered for tile {}", id)))
    }

    fn expire_secs(&self, layer: &TextureLayer) -> u64 {
        self.expire_override.unwrap_or(layer.expire_secs)
    }

    /// Absolute path of a base tile file
    pub fn tile_file_name(&self, id: &TileId) -> Option<PathBuf> {
        let layer = self.layer(id.theme_hash)?;
        Some(self.file_name(&layer, id))
    }

    fn file_name(&self, layer: &TextureLayer, id: &TileId) -> PathBuf {
        maps_dir(&self.data_root).join(layer.relative_tile_file_name(id))
    }

    /// Reads a tile file, `None` if it is missing, undecodable or wrongly sized
    fn read_tile_file(&self, layer: &TextureLayer, id: &TileId) -> Option<(TileImage, SystemTime)> {
        let path = self.file_name(layer, id);
        if !path.is_file() {
            return None;
        }
        let image = match TileImage::load(&path) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("cannot decode tile {}: {}", path.display(), e);
                return None;
            }
        };
        if image.size() != layer.tile_size {
            log::debug!(
                "ignoring tile {} of size {:?}, expected {:?}",
                path.display(),
                image.size(),
                layer.tile_size
            );
            return None;
        }
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Some((image, modified))
    }

    /// Loads one base tile
    ///
    /// A file on disk yields an up-to-date tile, or an expired one plus a
    /// download when it is older than the layer's expiry. Without a usable
    /// file the tile is filled with a scaled-up part of the nearest lower
    /// level and a download is started.
    pub fn load_tile(&self, stacked_id: TileId, tile_id: TileId, usage: DownloadUsage) -> Result<Arc<TextureTile>> {
        let layer = self.layer_for(&tile_id)?;
        let expire_secs = self.expire_secs(&layer);

        if let Some((image, modified)) = self.read_tile_file(&layer, &tile_id) {
            let tile = Arc::new(TextureTile::new(tile_id, stacked_id, image, TileState::Uptodate, expire_secs));
            tile.set_last_modified(modified);
            if tile.is_outdated(modified) {
                log::debug!("tile {} expired, reloading", tile_id);
                tile.set_state(TileState::Expired);
                self.trigger_download(&layer, &tile, usage);
            }
            return Ok(tile);
        }

        let image = self.scaled_lower_level_tile(&layer, &tile_id)?;
        let tile = Arc::new(TextureTile::new(tile_id, stacked_id, image, TileState::Expired, expire_secs));
        self.trigger_download(&layer, &tile, usage);
        Ok(tile)
    }

    /// Downloads the tile again regardless of its state
    pub fn reload_tile(&self, tile: &Arc<TextureTile>, usage: DownloadUsage) -> Result<()> {
        let layer = self.layer_for(&tile.id())?;
        self.trigger_download(&layer, tile, usage);
        Ok(())
    }

    /// Stores a tile on disk without creating a tile object
    pub fn download_tile(&self, tile_id: TileId) -> Result<()> {
        let layer = self.layer_for(&tile_id)?;
        if let Some(url) = layer.download_url(&tile_id) {
            let destination = self.file_name(&layer, &tile_id);
            self.download_manager
                .add_job(DownloadJob::new(url, destination, tile_id, DownloadUsage::Bulk));
        }
        Ok(())
    }

    fn trigger_download(&self, layer: &TextureLayer, tile: &Arc<TextureTile>, usage: DownloadUsage) {
        let Some(url) = layer.download_url(&tile.id()) else {
            log::debug!("layer {} has no download url for {}", layer.name, tile.id());
            return;
        };
        let destination = self.file_name(layer, &tile.id());
        let tile_size = layer.tile_size;
        let target = Arc::clone(tile);
        let callback = Arc::clone(&self.on_tile_completed);

        let job = DownloadJob::new(url, destination, tile.id(), usage).on_complete(move |data| {
            let image = match TileImage::from_bytes(&data) {
                Ok(image) if !image.is_null() => image,
                Ok(_) => return,
                Err(e) => {
                    log::warn!("discarding undecodable download for {}: {}", target.id(), e);
                    return;
                }
            };
            if image.size() != tile_size {
                log::warn!(
                    "discarding download for {} of size {:?}, expected {:?}",
                    target.id(),
                    image.size(),
                    tile_size
                );
                return;
            }
            target.set_image(image);
            let handler = callback.read().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(handler) = handler {
                handler(target.stacked_id(), target.id());
            }
        });
        self.download_manager.add_job(job);
    }

    /// Crops the covering part of the nearest lower level tile on disk and scales it up
    fn scaled_lower_level_tile(&self, layer: &TextureLayer, id: &TileId) -> Result<TileImage> {
        let (width, height) = layer.tile_size;
        for level in (0..id.zoom_level).rev() {
            let delta = id.zoom_level - level;
            let Some(ancestor) = id.ancestor(delta) else {
                continue;
            };
            let Some((image, _)) = self.read_tile_file(layer, &ancestor) else {
                continue;
            };
            let rest_x = id.x % (1 << delta);
            let rest_y = id.y % (1 << delta);
            let part_width = (image.width() >> delta).max(1);
            let part_height = (image.height() >> delta).max(1);
            log::debug!("filling tile {} from level {} tile {}", id, level, ancestor);
            return Ok(image
                .copy(rest_x * part_width, rest_y * part_height, part_width, part_height)
                .scaled(width, height));
        }

        let level_zero = id.ancestor(id.zoom_level).unwrap_or(*id);
        let path = self.file_name(layer, &level_zero);
        log::error!("level zero tile {} of layer {} is missing", path.display(), layer.name);
        Err(MapError::MissingLevelZeroTile(path.display().to_string()))
    }
}
