use globelet::prelude::*;
use globelet::rendering::mapper::MapperState;
use globelet::tiles::image::rgb;
use globelet::tiles::texture::maps_dir;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Renders small canvases from a two tile world: red west, blue east
#[cfg(test)]
mod texture_mapping_tests {
    use super::*;

    const WEST: u32 = 0xffff_0000;
    const EAST: u32 = 0xff00_00ff;

    fn world(dir: &TempDir) -> Arc<StackedTileLoader> {
        let layer = TextureLayer::new("ground", "earth/halves")
            .with_file_format("png")
            .with_tile_size(8, 8)
            .with_level_zero(2, 1)
            .with_max_tile_level(0);
        for (x, color) in [(0, rgb(255, 0, 0)), (1, rgb(0, 0, 255))] {
            let path = maps_dir(dir.path()).join(layer.relative_tile_file_name(&layer.tile_id(0, x, 0)));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            TileImage::new_argb32(8, 8, color)
                .to_rgba_image()
                .save(&path)
                .unwrap();
        }
        let theme = MapTheme::new("earth", "halves", vec![layer]);
        let tile_loader = Arc::new(TileLoader::new(dir.path(), Arc::new(OfflineDownloadManager)));
        StackedTileLoader::new(tile_loader, theme, &TileLoadingConfig::default(), SunLocator::default())
    }

    fn render_config(quality: MapQuality) -> RenderConfig {
        RenderConfig {
            quality,
            worker_threads: 3,
            interpolation_step: None,
        }
    }

    fn view(projection: Projection, quality: MapQuality) -> ViewParams {
        ViewParams::new(GeoPoint::default(), 40.0, 101, 101)
            .with_projection(projection)
            .with_quality(quality)
    }

    #[derive(Default)]
    struct CountingColorizer {
        calls: AtomicUsize,
    }

    impl TextureColorizer for CountingColorizer {
        fn colorize(&self, canvas: &mut CanvasImage, _view: &ViewParams) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            canvas.set_pixel(0, 0, 0xff12_3456);
        }
    }

    /// The orthographic globe shows both halves and leaves the corners alone
    #[test]
    fn test_spherical_render() {
        let dir = TempDir::new().unwrap();
        let loader = world(&dir);
        for quality in [MapQuality::LowQuality, MapQuality::Normal, MapQuality::HighQuality, MapQuality::PrintQuality] {
            let mut mapper = SphericalScanlineTextureMapper::new(Arc::clone(&loader), &render_config(quality)).unwrap();
            let view = view(Projection::Spherical, quality);
            mapper.render(&view).unwrap();

            let canvas = mapper.canvas();
            assert_eq!(canvas.size(), (101, 101));
            assert_eq!(canvas.pixel(30, 50), WEST, "{:?}", quality);
            assert_eq!(canvas.pixel(70, 50), EAST, "{:?}", quality);
            assert_eq!(canvas.pixel(0, 0), 0);
            assert_eq!(canvas.pixel(100, 100), 0);
            assert_eq!(mapper.state().tile_level(), Some(0));
        }
        assert_eq!(loader.tiles_on_display().len(), 2);
    }

    /// The gnomonic view covers the whole canvas
    #[test]
    fn test_gnomonic_render() {
        let dir = TempDir::new().unwrap();
        let loader = world(&dir);
        let mut mapper = GnomonicScanlineTextureMapper::new(loader, &render_config(MapQuality::Normal)).unwrap();
        mapper.render(&view(Projection::Gnomonic, MapQuality::Normal)).unwrap();

        let canvas = mapper.canvas();
        assert_eq!(canvas.pixel(20, 50), WEST);
        assert_eq!(canvas.pixel(80, 50), EAST);
        assert_eq!(canvas.pixel(0, 0), WEST);
        assert_eq!(canvas.pixel(100, 100), EAST);
        assert!(canvas.pixels().iter().all(|p| *p == WEST || *p == EAST));
    }

    /// Repaints happen only when asked for or when tiles changed
    #[test]
    fn test_map_texture_repaints_on_demand() {
        let dir = TempDir::new().unwrap();
        let loader = world(&dir);
        let mut mapper =
            create_mapper(Projection::Spherical, Arc::clone(&loader), &render_config(MapQuality::Normal)).unwrap();
        let counter = CountingColorizer::default();
        let colorizer: &dyn TextureColorizer = &counter;
        let view = view(Projection::Spherical, MapQuality::Normal);
        let mut target = CanvasImage::new(101, 101);

        mapper
            .map_texture(&mut target, &view, Rect::new(0, 0, 101, 101), Some(colorizer))
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(target.pixel(0, 0), 0xff12_3456);
        assert_eq!(target.pixel(30, 50), WEST);

        mapper
            .map_texture(&mut target, &view, Rect::new(0, 0, 101, 101), Some(colorizer))
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        mapper.set_repaint_needed();
        mapper
            .map_texture(&mut target, &view, Rect::new(0, 0, 101, 101), Some(colorizer))
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);

        loader.update();
        mapper
            .map_texture(&mut target, &view, Rect::new(0, 0, 101, 101), Some(colorizer))
            .unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    }

    /// Records whether a tile left over from an earlier frame is still displayed
    struct DisplayWatcher {
        loader: Arc<StackedTileLoader>,
        watched: TileId,
        seen: std::sync::Mutex<Vec<bool>>,
    }

    impl TextureColorizer for DisplayWatcher {
        fn colorize(&self, _canvas: &mut CanvasImage, _view: &ViewParams) {
            self.seen.lock().unwrap().push(self.loader.is_on_display(&self.watched));
        }
    }

    /// The colorizer runs before the frame's unused tiles leave the display
    #[test]
    fn test_colorize_precedes_tile_hash_cleanup() {
        let dir = TempDir::new().unwrap();
        let loader = world(&dir);
        let mut other = loader.theme().unwrap();
        other.theme = "other".to_string();
        loader.register_theme(other);
        let leftover = TileId::new(theme_hash("earth/other"), 0, 0, 0);
        loader.load_tile(leftover, false).unwrap();

        let watcher = DisplayWatcher {
            loader: Arc::clone(&loader),
            watched: leftover,
            seen: std::sync::Mutex::new(Vec::new()),
        };
        let colorizer: &dyn TextureColorizer = &watcher;
        let mut mapper =
            SphericalScanlineTextureMapper::new(Arc::clone(&loader), &render_config(MapQuality::Normal)).unwrap();
        let view = view(Projection::Spherical, MapQuality::Normal);
        let mut target = CanvasImage::new(101, 101);

        mapper
            .map_texture(&mut target, &view, Rect::new(0, 0, 101, 101), Some(colorizer))
            .unwrap();
        assert_eq!(*watcher.seen.lock().unwrap(), vec![true]);
        assert!(!loader.is_on_display(&leftover));
        assert!(loader.is_cached(&leftover));
        assert!(!mapper.state().repaint_needed());
    }

    /// Only the dirty rectangle reaches the target
    #[test]
    fn test_dirty_rect_blit() {
        let dir = TempDir::new().unwrap();
        let mut mapper = SphericalScanlineTextureMapper::new(world(&dir), &render_config(MapQuality::Normal)).unwrap();
        let view = view(Projection::Spherical, MapQuality::Normal);
        let mut target = CanvasImage::new(101, 101);
        target.fill(0xff00_ff00);

        mapper
            .map_texture(&mut target, &view, Rect::new(60, 40, 20, 20), None)
            .unwrap();
        assert_eq!(target.pixel(70, 50), EAST);
        assert_eq!(target.pixel(30, 50), 0xff00_ff00);
    }

    /// The worker pool is owned by the mapper and sized from the config
    #[test]
    fn test_owned_worker_pool() {
        let dir = TempDir::new().unwrap();
        let state = MapperState::new(world(&dir), &render_config(MapQuality::Normal)).unwrap();
        assert_eq!(state.threads(), 3);
        assert!(state.repaint_needed());
    }

    /// A theme whose ground data is gone reports the broken installation
    #[test]
    fn test_missing_level_zero_fails_render() {
        let dir = TempDir::new().unwrap();
        let loader = world(&dir);
        std::fs::remove_dir_all(maps_dir(dir.path()).join("earth/halves")).unwrap();
        let mut mapper = SphericalScanlineTextureMapper::new(loader, &render_config(MapQuality::Normal)).unwrap();

        let result = mapper.render(&view(Projection::Spherical, MapQuality::Normal));
        assert!(matches!(result, Err(MapError::MissingLevelZeroTile(_))));
    }
}
