use crate::core::config::RenderConfig;
use crate::rendering::canvas::{CanvasImage, Rect};
use crate::rendering::context::{interpolation_step, tile_zoom_level, ScanlineTextureMapperContext};
use crate::rendering::view::ViewParams;
use crate::tiles::stacked_loader::{StackedTileLoader, TileUpdate};
use crate::{MapError, Result};
use crossbeam_channel::Receiver;
use rayon::prelude::*;
use std::sync::Arc;

/// Post-processing applied to a freshly rendered canvas
pub trait TextureColorizer: Send + Sync {
    fn colorize(&self, canvas: &mut CanvasImage, view: &ViewParams);
}

/// Projects the stacked tiles of a theme onto a canvas one scanline at a time
pub trait ScanlineTextureMapper {
    fn state(&self) -> &MapperState;

    fn state_mut(&mut self) -> &mut MapperState;

    /// Renders the whole canvas for `view`
    ///
    /// Resets the loader's tile hash but leaves the cleanup to the caller,
    /// [`Self::map_texture`] does it once the frame is colorized.
    fn render(&mut self, view: &ViewParams) -> Result<()>;

    /// Re-renders if needed, then copies `dirty_rect` of the canvas onto `target`
    fn map_texture(
        &mut self,
        target: &mut CanvasImage,
        view: &ViewParams,
        dirty_rect: Rect,
        colorizer: Option<&dyn TextureColorizer>,
    ) -> Result<()> {
        self.state_mut().poll_tile_updates();
        if self.state().needs_repaint(view) {
            let rendered = self.render(view);
            if rendered.is_ok() {
                if let Some(colorizer) = colorizer {
                    colorizer.colorize(self.state_mut().canvas_mut(), view);
                }
                self.state_mut().repaint_needed = false;
            }
            self.state().loader().cleanup_tile_hash();
            rendered?;
        }
        target.draw_image(self.state().canvas(), dirty_rect);
        Ok(())
    }

    fn set_repaint_needed(&mut self) {
        self.state_mut().repaint_needed = true;
    }

    fn canvas(&self) -> &CanvasImage {
        self.state().canvas()
    }
}

/// Canvas, worker pool and bookkeeping shared by the mapper implementations
pub struct MapperState {
    loader: Arc<StackedTileLoader>,
    pool: rayon::ThreadPool,
    threads: usize,
    canvas: CanvasImage,
    repaint_needed: bool,
    interpolation_override: Option<usize>,
    tile_level: Option<u32>,
    updates: Receiver<TileUpdate>,
}

impl MapperState {
    pub fn new(loader: Arc<StackedTileLoader>, config: &RenderConfig) -> Result<Self> {
        let threads = config.worker_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("globelet-scanline-{}", i))
            .build()
            .map_err(|e| MapError::Render(format!("cannot build scanline worker pool: {}", e)))?;
        let updates = loader.subscribe();
        Ok(Self {
            loader,
            pool,
            threads,
            canvas: CanvasImage::default(),
            repaint_needed: true,
            interpolation_override: config.interpolation_step.filter(|n| *n > 0),
            tile_level: None,
            updates,
        })
    }

    pub fn loader(&self) -> &Arc<StackedTileLoader> {
        &self.loader
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn canvas(&self) -> &CanvasImage {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut CanvasImage {
        &mut self.canvas
    }

    pub fn repaint_needed(&self) -> bool {
        self.repaint_needed
    }

    /// Tile level used by the last render
    pub fn tile_level(&self) -> Option<u32> {
        self.tile_level
    }

    /// Horizontal interpolation step for `view`, honoring the configured override
    pub fn interpolation_step(&self, view: &ViewParams) -> usize {
        if view.quality.is_print_quality() {
            return 1;
        }
        self.interpolation_override
            .unwrap_or_else(|| interpolation_step(view))
    }

    fn needs_repaint(&self, view: &ViewParams) -> bool {
        self.repaint_needed || self.canvas.size() != (view.width, view.height)
    }

    /// Any tile change since the last frame invalidates the canvas
    fn poll_tile_updates(&mut self) {
        if self.updates.try_iter().count() > 0 {
            self.repaint_needed = true;
        }
    }

    /// Makes the canvas match the view, `true` when it was reallocated
    pub(crate) fn prepare_canvas(&mut self, view: &ViewParams) -> bool {
        if self.canvas.size() == (view.width, view.height) {
            return false;
        }
        self.canvas = CanvasImage::new(view.width, view.height);
        true
    }

    /// Renders `view` in horizontal bands on the worker pool
    ///
    /// The loader's tile hash is reset before any band starts. `render_row` fills one canvas row; with an
    /// interlaced quality every other row is a copy of the one above, never
    /// crossing a band boundary.
    pub(crate) fn render_bands<F>(&mut self, view: &ViewParams, render_row: F) -> Result<()>
    where
        F: Fn(&mut ScanlineTextureMapperContext<'_>, &mut [u32], u32) + Sync,
    {
        if !view.is_valid() {
            return Err(MapError::Render(format!(
                "invalid view {}x{} radius {}",
                view.width, view.height, view.radius
            )));
        }
        self.prepare_canvas(view);

        let Self {
            loader,
            pool,
            threads,
            canvas,
            tile_level,
            ..
        } = self;
        let loader: &StackedTileLoader = loader;
        let ground = loader
            .ground_layer()
            .ok_or_else(|| MapError::UnknownTheme(format!("theme {:#x} has no texture layer", loader.theme_hash())))?;
        let level = tile_zoom_level(view, &ground, loader.ground_maximum_tile_level());
        *tile_level = Some(level);

        let width = view.width as usize;
        let height = view.height as usize;
        let band_rows = height.div_ceil(*threads).max(1);
        let interlaced = view.quality.is_interlaced();
        log::debug!(
            "rendering {}x{} at tile level {} in bands of {} rows",
            width,
            height,
            level,
            band_rows
        );

        loader.reset_tile_hash();
        pool.install(|| {
            canvas
                .pixels_mut()
                .par_chunks_mut(width * band_rows)
                .enumerate()
                .try_for_each(|(band, rows)| {
                    let mut context = ScanlineTextureMapperContext::new(loader, &ground, level);
                    let first_row = band * band_rows;
                    let row_count = rows.len() / width;
                    let mut r = 0;
                    while r < row_count {
                        let (row, below) = rows[r * width..].split_at_mut(width);
                        render_row(&mut context, row, (first_row + r) as u32);
                        if interlaced && r + 1 < row_count {
                            below[..width].copy_from_slice(row);
                            r += 1;
                        }
                        r += 1;
                    }
                    match context.take_error() {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                })
        })
    }
}

/// Fills `row[start..end]`, computing every `n`th pixel exactly and the
/// pixels in between by interpolation along the texture
pub(crate) fn fill_span<G>(
    context: &mut ScanlineTextureMapperContext<'_>,
    row: &mut [u32],
    start: usize,
    end: usize,
    n: usize,
    view: &ViewParams,
    geo_coordinates: G,
) where
    G: Fn(usize) -> (f64, f64),
{
    if end <= start {
        return;
    }
    let bilinear = view.quality.is_high_quality();
    let interpolate = n > 1 && !view.quality.is_print_quality();
    let len = (end - start) as i64;
    let max_interpolation_x = start as i64 + n as i64 * (len / n as i64 - 1) + 1;

    let mut x = start;
    while x < end {
        let jump = interpolate && x > start && x as i64 <= max_interpolation_x;
        if jump {
            x += n - 1;
        }
        let (lon, lat) = geo_coordinates(x);
        if jump {
            let gap = &mut row[x + 1 - n..x];
            if bilinear {
                context.pixel_value_approx_f(lon, lat, gap);
            } else {
                context.pixel_value_approx(lon, lat, gap);
            }
        }
        if x < end {
            row[x] = if bilinear {
                context.pixel_value_f(lon, lat)
            } else {
                context.pixel_value(lon, lat)
            };
        }
        x += 1;
    }
}
