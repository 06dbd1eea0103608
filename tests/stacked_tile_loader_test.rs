use globelet::prelude::*;
use globelet::tiles::image::rgb;
use globelet::tiles::texture::maps_dir;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// End-to-end tests of the stacked tile pipeline against themes on disk
#[cfg(test)]
mod stacked_tile_loader_tests {
    use super::*;

    /// Keeps download jobs around so a test can finish them by hand
    #[derive(Default)]
    struct ManualDownloads {
        jobs: Mutex<Vec<DownloadJob>>,
    }

    impl DownloadManager for ManualDownloads {
        fn add_job(&self, job: DownloadJob) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    impl ManualDownloads {
        fn take(&self) -> Vec<DownloadJob> {
            std::mem::take(&mut *self.jobs.lock().unwrap())
        }
    }

    fn layer(name: &str) -> TextureLayer {
        TextureLayer::new(name, format!("earth/{}", name))
            .with_file_format("png")
            .with_tile_size(8, 8)
            .with_level_zero(1, 1)
            .with_max_tile_level(3)
            .with_download_url(format!("https://tiles.example.org/{}/{{zoom}}/{{x}}/{{y}}.png", name))
    }

    fn write_tile(root: &Path, layer: &TextureLayer, zoom: u32, x: u32, y: u32, color: u32) {
        let path = maps_dir(root).join(layer.relative_tile_file_name(&layer.tile_id(zoom, x, y)));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        TileImage::new_argb32(8, 8, color)
            .to_rgba_image()
            .save(&path)
            .unwrap();
    }

    /// Level zero plus the four level one tiles
    fn write_two_levels(root: &Path, layer: &TextureLayer, color: u32) {
        write_tile(root, layer, 0, 0, 0, color);
        for y in 0..2 {
            for x in 0..2 {
                write_tile(root, layer, 1, x, y, color);
            }
        }
    }

    fn png_bytes(color: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(TileImage::new_argb32(8, 8, color).to_rgba_image())
            .write_to(&mut bytes, image::ImageOutputFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn open(
        dir: &TempDir,
        layers: Vec<TextureLayer>,
        manager: Arc<dyn DownloadManager>,
    ) -> Arc<StackedTileLoader> {
        let theme = MapTheme::new("earth", "test", layers);
        let tile_loader = Arc::new(TileLoader::new(dir.path(), manager));
        StackedTileLoader::new(tile_loader, theme, &TileLoadingConfig::default(), SunLocator::default())
    }

    fn offline(dir: &TempDir, layers: Vec<TextureLayer>) -> Arc<StackedTileLoader> {
        open(dir, layers, Arc::new(OfflineDownloadManager))
    }

    fn ids(loader: &StackedTileLoader) -> Vec<TileId> {
        let hash = loader.theme_hash();
        let mut ids = vec![TileId::new(hash, 0, 0, 0)];
        for y in 0..2 {
            for x in 0..2 {
                ids.push(TileId::new(hash, 1, x, y));
            }
        }
        ids
    }

    /// A tile is never both on display and in the volatile cache
    #[test]
    fn test_cache_partition() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(200, 100, 50));
        let loader = offline(&dir, vec![ground]);
        let ids = ids(&loader);
        let check = |loader: &StackedTileLoader| {
            for id in &ids {
                assert!(!(loader.is_on_display(id) && loader.is_cached(id)), "{} in both tiers", id);
            }
        };

        loader.reset_tile_hash();
        loader.load_tile(ids[0], false).unwrap();
        loader.load_tile(ids[1], false).unwrap();
        loader.cleanup_tile_hash();
        check(&loader);

        loader.reset_tile_hash();
        loader.load_tile(ids[1], false).unwrap();
        loader.load_tile(ids[2], false).unwrap();
        loader.cleanup_tile_hash();
        check(&loader);
        assert!(loader.is_cached(&ids[0]));
        assert!(loader.is_on_display(&ids[1]));

        // reviving a cached tile takes it out of the cache
        loader.reset_tile_hash();
        loader.load_tile(ids[0], false).unwrap();
        check(&loader);
        assert!(loader.is_on_display(&ids[0]));
        assert!(!loader.is_cached(&ids[0]));
        loader.cleanup_tile_hash();
        check(&loader);
    }

    /// Asking for the same tile twice in one pass hands out the same tile
    #[test]
    fn test_same_pass_identity() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(1, 2, 3));
        let loader = offline(&dir, vec![ground]);
        let id = ids(&loader)[3];

        loader.reset_tile_hash();
        let first = loader.load_tile(id, false).unwrap();
        let second = loader.load_tile(id, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.tiles_on_display(), vec![id]);
    }

    /// A second cleanup without a render in between changes nothing
    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(1, 2, 3));
        let loader = offline(&dir, vec![ground]);
        let ids = ids(&loader);

        for id in &ids[..3] {
            loader.load_tile(*id, false).unwrap();
        }
        loader.reset_tile_hash();
        loader.load_tile(ids[0], false).unwrap();
        loader.cleanup_tile_hash();

        let usage = loader.volatile_cache_usage();
        let cached: Vec<bool> = ids.iter().map(|id| loader.is_cached(id)).collect();
        let displayed = loader.tiles_on_display();

        loader.cleanup_tile_hash();
        assert_eq!(loader.volatile_cache_usage(), usage);
        assert_eq!(ids.iter().map(|id| loader.is_cached(id)).collect::<Vec<_>>(), cached);
        assert_eq!(loader.tiles_on_display(), displayed);
        assert_eq!(cached, vec![false, true, true, false, false]);
    }

    /// The ground layer is copied, later layers brighten it by their red channel
    #[test]
    fn test_copy_then_multiply() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        let dark = layer("dark");
        let gray = layer("gray");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(255, 0, 0));
        write_tile(dir.path(), &dark, 0, 0, 0, rgb(0, 0, 0));
        write_tile(dir.path(), &gray, 0, 0, 0, rgb(128, 128, 128));

        let hash_of = |loader: &StackedTileLoader| TileId::new(loader.theme_hash(), 0, 0, 0);

        let copy_only = offline(&dir, vec![ground.clone(), dark]);
        let tile = copy_only.load_tile(hash_of(&copy_only), false).unwrap();
        assert_eq!(tile.state(), CompletionState::Complete);
        assert_eq!(tile.pixel(3, 3), rgb(255, 0, 0));

        let brightened = open(&dir, vec![ground, gray], Arc::new(OfflineDownloadManager));
        let tile = brightened.load_tile(hash_of(&brightened), false).unwrap();
        assert_eq!(tile.base_tiles().len(), 2);
        assert_eq!(tile.base_tiles()[1].merge_rule(), MergeRule::Multiply);
        // 0 + 255 * 128 / 255
        assert_eq!(tile.pixel(0, 0), rgb(255, 128, 128));
    }

    /// Bilinear sampling at the last pixel returns that pixel exactly
    #[test]
    fn test_pixel_f_at_corner() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(10, 20, 30));
        let loader = offline(&dir, vec![ground]);

        let tile = loader.load_tile(TileId::new(loader.theme_hash(), 0, 0, 0), false).unwrap();
        assert_eq!(tile.pixel_f(7.0, 7.0), tile.pixel(7, 7));
        assert_eq!(tile.pixel_f(7.0, 7.0), rgb(10, 20, 30));
    }

    /// A deep tile starts as a scaled placeholder and turns complete once downloaded
    #[test]
    fn test_placeholder_then_download() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(255, 0, 0));
        let downloads = Arc::new(ManualDownloads::default());
        let loader = open(&dir, vec![ground.clone()], downloads.clone());
        let updates = loader.subscribe();
        let id = TileId::new(loader.theme_hash(), 3, 5, 2);

        let tile = loader.load_tile(id, false).unwrap();
        assert_eq!(tile.state(), CompletionState::Partial);
        assert_eq!(tile.pixel(4, 4), rgb(255, 0, 0));
        assert!(tile.expired());

        let mut jobs = downloads.take();
        assert_eq!(jobs.len(), 1);
        let job = jobs.remove(0);
        assert_eq!(job.id, ground.tile_id(3, 5, 2));
        assert_eq!(job.url, "https://tiles.example.org/ground/3/5/2.png");

        job.complete(png_bytes(rgb(0, 0, 255)));

        assert_eq!(updates.recv_timeout(Duration::from_secs(5)).unwrap(), TileUpdate::Tile(id));
        assert_eq!(tile.state(), CompletionState::Complete);
        assert!(!tile.expired());
        assert_eq!(tile.pixel(4, 4), rgb(0, 0, 255));
        assert!(Arc::ptr_eq(&tile, &loader.load_tile(id, false).unwrap()));
    }

    /// Undecodable downloads leave the placeholder alone
    #[test]
    fn test_garbage_download_is_ignored() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(255, 0, 0));
        let downloads = Arc::new(ManualDownloads::default());
        let loader = open(&dir, vec![ground], downloads.clone());
        let updates = loader.subscribe();
        let id = TileId::new(loader.theme_hash(), 2, 1, 1);

        let tile = loader.load_tile(id, false).unwrap();
        for job in downloads.take() {
            job.complete(b"not an image".to_vec());
        }
        assert!(updates.try_recv().is_err());
        assert_eq!(tile.state(), CompletionState::Partial);
        assert_eq!(tile.pixel(0, 0), rgb(255, 0, 0));
    }

    /// With a zero cache every tile is dropped at the end of the frame
    #[test]
    fn test_zero_cache_limit_drops_every_tile() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(9, 9, 9));
        let loader = offline(&dir, vec![ground]);
        loader.set_volatile_cache_limit(0);
        assert_eq!(loader.volatile_cache_limit(), 0);
        let ids = ids(&loader);

        let first: Vec<Arc<StackedTile>> = ids.iter().map(|id| loader.load_tile(*id, false).unwrap()).collect();
        assert_eq!(loader.tiles_on_display().len(), 5);

        loader.reset_tile_hash();
        loader.cleanup_tile_hash();
        assert!(loader.tiles_on_display().is_empty());
        assert_eq!(loader.volatile_cache_usage(), 0);
        assert!(ids.iter().all(|id| !loader.is_cached(id) && !loader.is_on_display(id)));

        let again = loader.load_tile(ids[0], false).unwrap();
        assert!(!Arc::ptr_eq(&first[0], &again));
    }

    /// Tiles requested in the background end up in the volatile cache
    #[test]
    fn test_background_request() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(4, 5, 6));
        let loader = offline(&dir, vec![ground]);
        let updates = loader.subscribe();
        let id = ids(&loader)[2];

        loader.request_tile(id, true);
        assert_eq!(updates.recv_timeout(Duration::from_secs(5)).unwrap(), TileUpdate::Tile(id));

        let deadline = Instant::now() + Duration::from_secs(5);
        while loader.job_queue().is_worker_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(loader.is_cached(&id));
        assert!(!loader.is_on_display(&id));
        assert_eq!(loader.load_tile(id, false).unwrap().pixel(0, 0), rgb(4, 5, 6));
    }

    /// Clearing caches and stats
    #[test]
    fn test_update_forgets_everything() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_two_levels(dir.path(), &ground, rgb(4, 5, 6));
        let loader = offline(&dir, vec![ground]);
        let updates = loader.subscribe();
        let ids = ids(&loader);

        for id in &ids {
            loader.load_tile(*id, false).unwrap();
        }
        loader.flush();
        assert!(loader.tiles_on_display().is_empty());
        assert!(loader.volatile_cache_usage() > 0);
        assert!(loader.persistent_cache_usage() > 0);

        loader.update();
        assert_eq!(loader.volatile_cache_usage(), 0);
        assert_eq!(updates.try_recv().unwrap(), TileUpdate::Available);
        assert_eq!(loader.maximum_tile_level(&layer("ground")), Some(3));
    }

    /// Finishes every pending download as soon as a city lights tile is requested
    struct CompleteOnCityLights {
        jobs: Mutex<Vec<DownloadJob>>,
        payload: Vec<u8>,
    }

    impl DownloadManager for CompleteOnCityLights {
        fn add_job(&self, job: DownloadJob) {
            let complete = job.url.contains("citylights");
            let pending = {
                let mut jobs = self.jobs.lock().unwrap();
                jobs.push(job);
                if !complete {
                    return;
                }
                std::mem::take(&mut *jobs)
            };
            for job in pending {
                job.complete(self.payload.clone());
            }
        }
    }

    /// A download finishing while its stacked tile is still being decorated
    /// is merged once the tile is on display
    #[test]
    fn test_download_completed_during_build_is_merged() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(255, 0, 0));
        let lights = layer("citylights");
        write_tile(dir.path(), &lights, 0, 0, 0, rgb(255, 255, 0));
        MapTheme::new("earth", "citylights", vec![lights]).save(dir.path()).unwrap();

        let manager = Arc::new(CompleteOnCityLights {
            jobs: Mutex::new(Vec::new()),
            payload: png_bytes(rgb(0, 0, 255)),
        });
        let mut sun = SunLocator::default();
        sun.set_show(true);
        sun.set_citylights(true);
        let theme = MapTheme::new("earth", "test", vec![ground]);
        let tile_loader = Arc::new(TileLoader::new(dir.path(), manager));
        let loader = StackedTileLoader::new(tile_loader, theme, &TileLoadingConfig::default(), sun);
        let updates = loader.subscribe();

        // the decorator asks for the city lights after the ground merge, which
        // is when the ground download lands
        let id = TileId::new(loader.theme_hash(), 1, 1, 0);
        let tile = loader.load_tile(id, false).unwrap();

        assert_eq!(tile.base_tiles()[0].state(), TileState::Uptodate);
        assert_eq!(tile.state(), CompletionState::Complete);
        assert!(!tile.expired());
        // daylight near the subsolar point keeps the downloaded ground color
        assert_eq!(tile.pixel(0, 7), rgb(0, 0, 255));
        assert!(updates.try_iter().any(|update| update == TileUpdate::Tile(id)));

        loader.flush();
        let revived = loader.load_tile(id, false).unwrap();
        assert!(Arc::ptr_eq(&tile, &revived));
        assert_eq!(revived.pixel(0, 7), rgb(0, 0, 255));
    }

    /// Concurrent requests for a missing tile share one build and one download
    #[test]
    fn test_concurrent_loads_build_once() {
        let dir = TempDir::new().unwrap();
        let ground = layer("ground");
        write_tile(dir.path(), &ground, 0, 0, 0, rgb(255, 0, 0));
        let manager = Arc::new(ManualDownloads::default());
        let loader = open(&dir, vec![ground], manager.clone());
        let id = TileId::new(loader.theme_hash(), 2, 1, 1);

        let tiles: Vec<Arc<StackedTile>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| loader.load_tile(id, false).unwrap()))
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert!(tiles.iter().all(|tile| Arc::ptr_eq(tile, &tiles[0])));
        assert_eq!(manager.take().len(), 1);
        assert_eq!(loader.tiles_on_display(), vec![id]);
    }
}
