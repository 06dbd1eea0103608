use crate::background::tasks::{TileJobHandler, TileJobQueue, TileJobQueueConfig};
use crate::core::config::{MapPerformanceOptions, TileLoadingConfig};
use crate::core::geo::{level_to_column, level_to_row, TileId};
use crate::tiles::base::MergeRule;
use crate::tiles::cache::CostLruCache;
use crate::tiles::decorator::MergedLayerDecorator;
use crate::tiles::download::{DownloadManager, DownloadUsage};
use crate::tiles::loader::TileLoader;
use crate::tiles::stacked::{CompletionState, StackedTile};
use crate::tiles::sun::SunLocator;
use crate::tiles::texture::{maps_dir, MapTheme, TextureLayer};
use crate::{MapError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use fxhash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};

/// Tells renderers that tiles changed and a repaint is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileUpdate {
    /// Any number of tiles changed
    Available,
    /// One stacked tile was re-merged
    Tile(TileId),
}

struct Containers {
    on_display: FxHashMap<TileId, Arc<StackedTile>>,
    cache: CostLruCache<TileId, Arc<StackedTile>>,
    /// Tiles being built, flagged when one of their base tiles changed meanwhile
    building: FxHashMap<TileId, bool>,
}

/// Hands out stacked tiles for a theme, building them from base tiles on demand
///
/// Tiles used in the current frame live in the in-display hash. Between
/// [`Self::reset_tile_hash`] and [`Self::cleanup_tile_hash`] every tile that
/// was not requested again moves into a cost bounded LRU cache, from which
/// it can be revived until it is evicted or expires.
pub struct StackedTileLoader {
    tile_loader: Arc<TileLoader>,
    decorator: MergedLayerDecorator,
    theme_hash: u32,
    themes: RwLock<FxHashMap<u32, MapTheme>>,
    max_levels: Mutex<FxHashMap<u32, Option<u32>>>,
    containers: Mutex<Containers>,
    built: Condvar,
    subscribers: Mutex<Vec<Sender<TileUpdate>>>,
    jobs: TileJobQueue,
    download_usage: DownloadUsage,
    background_merge: bool,
}

impl StackedTileLoader {
    /// Creates a loader for `theme` and wires itself up to download completions
    pub fn new(tile_loader: Arc<TileLoader>, theme: MapTheme, config: &TileLoadingConfig, sun: SunLocator) -> Arc<Self> {
        tile_loader.add_layers(&theme.layers);
        let decorator = MergedLayerDecorator::new(tile_loader.data_root().to_path_buf(), sun);
        decorator.set_show_tile_id(config.show_tile_id);
        let theme_hash = theme.hash();
        let mut themes = FxHashMap::default();
        themes.insert(theme_hash, theme);

        Arc::new_cyclic(|weak: &Weak<StackedTileLoader>| {
            let completed = weak.clone();
            tile_loader.set_tile_completed_callback(Arc::new(move |stacked_id, tile_id| {
                if let Some(loader) = completed.upgrade() {
                    loader.update_tile(stacked_id, tile_id);
                }
            }));
            let handler: Weak<dyn TileJobHandler> = weak.clone();

            Self {
                tile_loader,
                decorator,
                theme_hash,
                themes: RwLock::new(themes),
                max_levels: Mutex::new(FxHashMap::default()),
                containers: Mutex::new(Containers {
                    on_display: FxHashMap::default(),
                    cache: CostLruCache::new(config.volatile_cache_bytes() as usize),
                    building: FxHashMap::default(),
                }),
                built: Condvar::new(),
                subscribers: Mutex::new(Vec::new()),
                jobs: TileJobQueue::new(handler, TileJobQueueConfig::default()),
                download_usage: config.download_usage,
                background_merge: config.background_merge,
            }
        })
    }

    /// Loads `theme_id` below `data_root` and builds the whole loading stack for it
    pub fn open(
        data_root: impl Into<PathBuf>,
        theme_id: &str,
        download_manager: Arc<dyn DownloadManager>,
        options: &MapPerformanceOptions,
    ) -> Result<Arc<Self>> {
        let data_root = data_root.into();
        let theme = MapTheme::load(&data_root, theme_id)?;
        if !Self::base_tiles_available(&data_root, &theme) {
            log::warn!("theme {} lacks some of its level zero tiles", theme.id());
        }
        let tile_loader = Arc::new(
            TileLoader::new(data_root, download_manager).with_expire_override(options.tile_loader.expire_secs_override),
        );
        Ok(Self::new(
            tile_loader,
            theme,
            &options.tile_loader,
            SunLocator::new(&options.sun),
        ))
    }

    fn containers(&self) -> MutexGuard<'_, Containers> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tile_loader(&self) -> &Arc<TileLoader> {
        &self.tile_loader
    }

    pub fn decorator(&self) -> &MergedLayerDecorator {
        &self.decorator
    }

    /// Hash of the theme this loader was created for
    pub fn theme_hash(&self) -> u32 {
        self.theme_hash
    }

    pub fn theme(&self) -> Option<MapTheme> {
        self.theme_by_hash(self.theme_hash)
    }

    fn theme_by_hash(&self, hash: u32) -> Option<MapTheme> {
        self.themes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hash)
            .cloned()
    }

    /// Makes the stacked tiles of another theme loadable, such as a decoration dataset
    pub fn register_theme(&self, theme: MapTheme) {
        self.tile_loader.add_layers(&theme.layers);
        self.themes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(theme.hash(), theme);
    }

    /// Ground layer of the primary theme
    pub fn ground_layer(&self) -> Option<TextureLayer> {
        self.theme().and_then(|theme| theme.ground_layer().cloned())
    }

    /// Receives a [`TileUpdate`] whenever tiles change
    pub fn subscribe(&self) -> Receiver<TileUpdate> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    fn notify(&self, update: TileUpdate) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sender| sender.send(update).is_ok());
    }

    /// Marks every displayed tile unused, to be called before a render pass
    pub fn reset_tile_hash(&self) {
        for tile in self.containers().on_display.values() {
            tile.set_used(false);
        }
    }

    /// Moves displayed tiles not requested since the last reset into the cache
    pub fn cleanup_tile_hash(&self) {
        let mut containers = self.containers();
        let unused: Vec<TileId> = containers
            .on_display
            .iter()
            .filter(|(_, tile)| !tile.used())
            .map(|(id, _)| *id)
            .collect();

        for id in unused {
            if let Some(tile) = containers.on_display.remove(&id) {
                let cost = tile.num_bytes();
                if !containers.cache.insert(id, tile, cost) {
                    log::debug!("tile {} too large for the volatile cache, dropped", id);
                }
            }
        }
    }

    /// Returns the stacked tile for `id`, building it if it is neither displayed nor cached
    ///
    /// Only one caller builds a given tile, concurrent callers wait for it and
    /// share the result.
    pub fn load_tile(&self, id: TileId, for_merged_layer_decorator: bool) -> Result<Arc<StackedTile>> {
        if let Some(tile) = self.find_or_claim(id) {
            return Ok(tile);
        }

        log::debug!("building stacked tile {}", id);
        let built = self.build_tile(id, for_merged_layer_decorator);

        let mut containers = self.containers();
        let base_changed = containers.building.remove(&id).unwrap_or(false);
        self.built.notify_all();
        let tile = Arc::new(built?);
        tile.set_used(true);
        containers.on_display.insert(id, Arc::clone(&tile));
        drop(containers);

        if base_changed {
            log::debug!("base tiles of {} changed while building, merging again", id);
            self.remerge(&tile);
        }
        Ok(tile)
    }

    /// Revives a displayed or cached tile, or claims the right to build it
    fn find_or_claim(&self, id: TileId) -> Option<Arc<StackedTile>> {
        let mut containers = self.containers();
        loop {
            if let Some(tile) = containers.on_display.get(&id) {
                tile.set_used(true);
                return Some(Arc::clone(tile));
            }
            if let Some(tile) = containers.cache.take(&id) {
                if !tile.expired() {
                    tile.set_used(true);
                    containers.on_display.insert(id, Arc::clone(&tile));
                    return Some(tile);
                }
                log::debug!("cached tile {} expired, reloading", id);
            }
            if !containers.building.contains_key(&id) {
                containers.building.insert(id, false);
                return None;
            }
            containers = self.built.wait(containers).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Merges the base tiles of every texture layer covering `id` into a new stacked tile
    fn build_tile(&self, id: TileId, for_merged_layer_decorator: bool) -> Result<StackedTile> {
        let theme = self
            .theme_by_hash(id.theme_hash)
            .ok_or_else(|| MapError::UnknownTheme(format!("no theme registered for tile {}", id)))?;

        let mut tile = StackedTile::new(id);
        if for_merged_layer_decorator {
            tile.set_for_merged_layer_decorator();
        }

        for layer in &theme.layers {
            if let Some(max_level) = self.maximum_tile_level(layer) {
                if max_level < id.zoom_level {
                    continue;
                }
            }
            let base_id = layer.tile_id(id.zoom_level, id.x, id.y);
            let base = self.tile_loader.load_tile(id, base_id, self.download_usage)?;
            if tile.has_base_tiles() {
                base.set_merge_rule(MergeRule::Multiply);
            }
            tile.add_base_tile(base);
        }

        if !tile.has_base_tiles() {
            return Err(MapError::Config(format!(
                "no texture layer of {} provides level {}",
                theme.id(),
                id.zoom_level
            )));
        }

        if tile.state() != CompletionState::Empty {
            tile.init_result_tile();
        }
        if !for_merged_layer_decorator {
            if let Some(ground) = theme.ground_layer() {
                self.decorator.decorate(&tile, ground, self);
            }
        }
        Ok(tile)
    }

    /// Re-merges a displayed stacked tile after one of its base tiles was downloaded
    ///
    /// Cached copies are evicted instead, they are rebuilt on next use.
    pub fn update_tile(&self, stacked_id: TileId, tile_id: TileId) {
        log::debug!("base tile {} of {} updated", tile_id, stacked_id);
        if self.background_merge {
            self.jobs.add_merge_job(stacked_id, true);
        } else {
            self.merge_displayed(stacked_id);
        }
    }

    fn merge_displayed(&self, stacked_id: TileId) {
        let displayed = {
            let mut containers = self.containers();
            if let Some(base_changed) = containers.building.get_mut(&stacked_id) {
                // the builder merges again once the tile is on display
                *base_changed = true;
                return;
            }
            match containers.on_display.get(&stacked_id) {
                Some(tile) => Some(Arc::clone(tile)),
                None => {
                    containers.cache.take(&stacked_id);
                    None
                }
            }
        };
        if let Some(tile) = displayed {
            self.remerge(&tile);
        }
    }

    fn remerge(&self, tile: &StackedTile) {
        tile.derive_completion_state();
        tile.init_result_tile();
        if !tile.for_merged_layer_decorator() {
            if let Some(ground) = self
                .theme_by_hash(tile.id().theme_hash)
                .and_then(|theme| theme.ground_layer().cloned())
            {
                self.decorator.decorate(tile, &ground, self);
            }
        }
        self.notify(TileUpdate::Tile(tile.id()));
    }

    /// Queues the creation of a stacked tile on the background worker
    pub fn request_tile(&self, id: TileId, high_priority: bool) {
        self.jobs.add_tile_job(id, high_priority);
    }

    /// The background job queue, mainly to drain it synchronously
    pub fn job_queue(&self) -> &TileJobQueue {
        &self.jobs
    }

    /// Moves every displayed tile into the cache
    pub fn flush(&self) {
        let mut guard = self.containers();
        let containers = &mut *guard;
        for (id, tile) in containers.on_display.drain() {
            let cost = tile.num_bytes();
            if !containers.cache.insert(id, tile, cost) {
                log::debug!("tile {} too large for the volatile cache, dropped", id);
            }
        }
    }

    /// Forgets every tile so the next frame is rebuilt from the base tiles
    pub fn update(&self) {
        self.flush();
        self.containers().cache.clear();
        self.jobs.clear();
        self.notify(TileUpdate::Available);
    }

    /// Volatile cache limit in KiB, takes effect with the next insert
    pub fn set_volatile_cache_limit(&self, kilobytes: u64) {
        log::info!("setting volatile tile cache limit to {} KiB", kilobytes);
        let bytes = usize::try_from(kilobytes.saturating_mul(1024)).unwrap_or(usize::MAX);
        self.containers().cache.set_max_cost(bytes);
    }

    /// Volatile cache limit in KiB
    pub fn volatile_cache_limit(&self) -> u64 {
        (self.containers().cache.max_cost() / 1024) as u64
    }

    /// Volatile cache usage in KiB
    pub fn volatile_cache_usage(&self) -> u64 {
        (self.containers().cache.total_cost() / 1024) as u64
    }

    /// Bytes of tile files on disk below the source directories of every known theme
    pub fn persistent_cache_usage(&self) -> u64 {
        let maps = maps_dir(self.tile_loader.data_root());
        let mut sources: Vec<String> = self
            .themes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(|theme| theme.layers.iter().map(|layer| layer.source_dir.clone()))
            .collect();
        sources.sort();
        sources.dedup();
        sources.iter().map(|source| directory_size(&maps.join(source))).sum()
    }

    pub fn clear_volatile_tile_cache(&self) {
        log::debug!("clearing volatile tile cache");
        self.containers().cache.clear();
    }

    /// Ids of displayed tiles requested since the last reset
    pub fn tiles_on_display(&self) -> Vec<TileId> {
        self.containers()
            .on_display
            .iter()
            .filter(|(_, tile)| tile.used())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether `id` is in the in-display hash
    pub fn is_on_display(&self, id: &TileId) -> bool {
        self.containers().on_display.contains_key(id)
    }

    /// Whether `id` is in the volatile cache
    pub fn is_cached(&self, id: &TileId) -> bool {
        self.containers().cache.contains(id)
    }

    pub fn set_show_tile_id(&self, show: bool) {
        self.decorator.set_show_tile_id(show);
        self.update();
    }

    pub fn set_sun_locator(&self, sun: SunLocator) {
        self.decorator.set_sun_locator(sun);
        self.update();
    }

    /// Highest tile level of a layer: its configured maximum, else one past
    /// the highest numbered level directory on disk
    pub fn maximum_tile_level(&self, layer: &TextureLayer) -> Option<u32> {
        if let Some(level) = layer.max_tile_level {
            return Some(level);
        }
        let mut known = self.max_levels.lock().unwrap_or_else(PoisonError::into_inner);
        *known
            .entry(layer.source_hash())
            .or_insert_with(|| scan_maximum_tile_level(&maps_dir(self.tile_loader.data_root()).join(&layer.source_dir)))
    }

    /// Highest tile level of the primary theme's ground layer
    pub fn ground_maximum_tile_level(&self) -> Option<u32> {
        self.ground_layer().and_then(|layer| self.maximum_tile_level(&layer))
    }

    /// Whether every level zero tile of the theme's ground layer is on disk
    pub fn base_tiles_available(data_root: &Path, theme: &MapTheme) -> bool {
        let Some(layer) = theme.ground_layer() else {
            return false;
        };
        let maps = maps_dir(data_root);
        let columns = level_to_column(layer.level_zero_columns, 0);
        let rows = level_to_row(layer.level_zero_rows, 0);
        (0..columns).all(|x| {
            (0..rows).all(|y| {
                let path = maps.join(layer.relative_tile_file_name(&layer.tile_id(0, x, y)));
                let exists = path.is_file();
                if !exists {
                    log::warn!("base tile {} is missing", path.display());
                }
                exists
            })
        })
    }
}

impl TileJobHandler for StackedTileLoader {
    fn create_tile(&self, id: TileId) {
        {
            let mut containers = self.containers();
            if containers.on_display.contains_key(&id)
                || containers.cache.contains(&id)
                || containers.building.contains_key(&id)
            {
                return;
            }
            containers.building.insert(id, false);
        }
        let built = self.build_tile(id, false);

        let mut containers = self.containers();
        let base_changed = containers.building.remove(&id).unwrap_or(false);
        self.built.notify_all();
        let tile = match built {
            Ok(tile) => Arc::new(tile),
            Err(e) => {
                log::warn!("background creation of tile {} failed: {}", id, e);
                return;
            }
        };
        if base_changed {
            // a base tile was replaced after the merge, rebuild on next use
            log::debug!("base tiles of {} changed while building, not caching", id);
            return;
        }
        let cost = tile.num_bytes();
        if !containers.cache.insert(id, tile, cost) {
            log::debug!("tile {} too large for the volatile cache, dropped", id);
            return;
        }
        drop(containers);
        self.notify(TileUpdate::Tile(id));
    }

    fn merge_tile(&self, id: TileId) {
        self.merge_displayed(id);
    }
}

fn scan_maximum_tile_level(source: &Path) -> Option<u32> {
    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("cannot scan {}: {}", source.display(), e);
            return None;
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok()))
        .max()
        .map(|level| level + 1)
}

fn directory_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                directory_size(&path)
            } else {
                entry.metadata().map(|meta| meta.len()).unwrap_or(0)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::download::OfflineDownloadManager;
    use crate::tiles::image::{rgb, TileImage};
    use tempfile::TempDir;

    fn write_tile(root: &Path, layer: &TextureLayer, id: TileId, color: u32) {
        let path = maps_dir(root).join(layer.relative_tile_file_name(&id));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        TileImage::new_argb32(layer.tile_size.0, layer.tile_size.1, color)
            .to_rgba_image()
            .save(&path)
            .unwrap();
    }

    fn setup() -> (TempDir, Arc<StackedTileLoader>, MapTheme) {
        let dir = TempDir::new().unwrap();
        let ground = TextureLayer::new("ground", "earth/test")
            .with_file_format("png")
            .with_tile_size(4, 4)
            .with_level_zero(2, 1);
        for x in 0..2 {
            write_tile(dir.path(), &ground, ground.tile_id(0, x, 0), rgb(255, 0, 0));
        }
        let theme = MapTheme::new("earth", "test", vec![ground]);
        let tile_loader = Arc::new(TileLoader::new(dir.path(), Arc::new(OfflineDownloadManager)));
        let loader = StackedTileLoader::new(tile_loader, theme.clone(), &TileLoadingConfig::default(), SunLocator::default());
        (dir, loader, theme)
    }

    #[test]
    fn test_same_pass_returns_same_tile() {
        let (_dir, loader, theme) = setup();
        let id = TileId::new(theme.hash(), 0, 1, 0);
        let first = loader.load_tile(id, false).unwrap();
        let second = loader.load_tile(id, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.pixel(0, 0), rgb(255, 0, 0));
        assert_eq!(first.state(), CompletionState::Complete);
    }

    #[test]
    fn test_unknown_theme_is_an_error() {
        let (_dir, loader, _theme) = setup();
        assert!(matches!(
            loader.load_tile(TileId::new(12345, 0, 0, 0), false),
            Err(MapError::UnknownTheme(_))
        ));
    }

    #[test]
    fn test_maximum_tile_level_scans_disk() {
        let (_dir, loader, theme) = setup();
        let ground = theme.ground_layer().unwrap();
        assert_eq!(loader.maximum_tile_level(ground), Some(1));
        assert_eq!(loader.maximum_tile_level(&ground.clone().with_max_tile_level(7)), Some(7));
        assert_eq!(loader.maximum_tile_level(&TextureLayer::new("x", "earth/none")), None);
    }

    #[test]
    fn test_base_tiles_available() {
        let (dir, _loader, theme) = setup();
        assert!(StackedTileLoader::base_tiles_available(dir.path(), &theme));
        let wide = MapTheme::new(
            "earth",
            "wide",
            vec![theme.layers[0].clone().with_level_zero(4, 2)],
        );
        assert!(!StackedTileLoader::base_tiles_available(dir.path(), &wide));
    }

    #[test]
    fn test_subscribers_receive_updates() {
        let (_dir, loader, _theme) = setup();
        let updates = loader.subscribe();
        loader.update();
        assert_eq!(updates.try_recv(), Ok(TileUpdate::Available));
    }

    #[test]
    fn test_huge_cache_limit_saturates() {
        let (_dir, loader, _theme) = setup();
        loader.set_volatile_cache_limit(u64::MAX);
        assert_eq!(loader.volatile_cache_limit(), (usize::MAX / 1024) as u64);
        loader.set_volatile_cache_limit(2);
        assert_eq!(loader.volatile_cache_limit(), 2);
    }

    #[test]
    fn test_persistent_cache_usage_counts_tile_files() {
        let (_dir, loader, _theme) = setup();
        assert!(loader.persistent_cache_usage() > 0);
    }
}
