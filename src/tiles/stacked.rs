use crate::core::geo::TileId;
use crate::tiles::base::{MergeRule, TextureTile, TileState};
use crate::tiles::image::{blue, gray, green, red, rgb, JumpTable, PixelBuffer, TileImage};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// How much of a stacked tile is backed by current data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Every base tile is empty
    Empty,
    /// Some base tiles are expired or empty
    Partial,
    /// Every base tile is up to date
    Complete,
}

impl CompletionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Empty,
            1 => Self::Partial,
            _ => Self::Complete,
        }
    }
}

/// Merged pixels of a stacked tile together with the jump table addressing them
///
/// Built once and never mutated, so a renderer holding an `Arc` to it can
/// sample without locking while the tile is re-merged elsewhere.
#[derive(Debug)]
pub struct ResultRaster {
    image: TileImage,
    jump_table: Option<JumpTable>,
    depth: u32,
    grayscale: bool,
}

impl ResultRaster {
    pub fn new(image: TileImage) -> Self {
        let jump_table = JumpTable::from_image(&image);
        if jump_table.is_none() {
            log::warn!("an essential tile is missing, the merged tile has no pixels");
        }
        let depth = image.depth();
        let grayscale = image.is_grayscale();
        Self {
            image,
            jump_table,
            depth,
            grayscale,
        }
    }

    pub fn null() -> Self {
        Self {
            image: TileImage::null(),
            jump_table: None,
            depth: 0,
            grayscale: false,
        }
    }

    pub fn image(&self) -> &TileImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_grayscale(&self) -> bool {
        self.grayscale
    }

    pub fn is_null(&self) -> bool {
        self.jump_table.is_none()
    }

    /// ARGB value of a pixel, 0 when there are no pixels
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let Some(table) = &self.jump_table else {
            return 0;
        };
        let row = table.row(y as usize);
        match self.image.pixels() {
            PixelBuffer::Argb32(data) => data[row + x as usize],
            PixelBuffer::Indexed8(data) => {
                let index = data[row + x as usize] as u32;
                if self.grayscale {
                    gray(index)
                } else {
                    self.image.color(index)
                }
            }
            PixelBuffer::Mono1(data) => {
                let byte = data[row + x as usize / 8];
                self.image.color(((byte >> (7 - x % 8)) & 1) as u32)
            }
        }
    }

    /// Bilinearly interpolated ARGB value at a sub-pixel position
    pub fn pixel_f(&self, x: f64, y: f64) -> u32 {
        if self.is_null() {
            return 0;
        }
        let ix = (x.max(0.0) as u32).min(self.width() - 1);
        let iy = (y.max(0.0) as u32).min(self.height() - 1);
        self.pixel_f_from(x, y, ix, iy, self.pixel(ix, iy))
    }

    /// Same as [`Self::pixel_f`] with the top left neighbour already looked up
    pub fn pixel_f_with(&self, x: f64, y: f64, top_left: u32) -> u32 {
        if self.is_null() {
            return 0;
        }
        let ix = (x.max(0.0) as u32).min(self.width() - 1);
        let iy = (y.max(0.0) as u32).min(self.height() - 1);
        self.pixel_f_from(x, y, ix, iy, top_left)
    }

    fn pixel_f_from(&self, x: f64, y: f64, ix: u32, iy: u32, top_left: u32) -> u32 {
        let fx = (x - ix as f64).clamp(0.0, 1.0);
        let fy = (y - iy as f64).clamp(0.0, 1.0);
        let has_right = ix + 1 < self.width();

        if iy + 1 < self.height() {
            let bottom_left = self.pixel(ix, iy + 1);
            let left = blend(top_left, bottom_left, fy);
            if has_right {
                let top_right = self.pixel(ix + 1, iy);
                let bottom_right = self.pixel(ix + 1, iy + 1);
                let right = blend(top_right, bottom_right, fy);
                return pack(mix(left, right, fx));
            }
            return pack(left);
        }

        if has_right {
            if fx == 0.0 {
                return top_left;
            }
            let top_right = self.pixel(ix + 1, iy);
            return pack(blend(top_left, top_right, fx));
        }
        top_left
    }
}

#[inline]
fn channels(argb: u32) -> [f64; 3] {
    [red(argb) as f64, green(argb) as f64, blue(argb) as f64]
}

#[inline]
fn blend(a: u32, b: u32, t: f64) -> [f64; 3] {
    mix(channels(a), channels(b), t)
}

#[inline]
fn mix(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    [
        (1.0 - t) * a[0] + t * b[0],
        (1.0 - t) * a[1] + t * b[1],
        (1.0 - t) * a[2] + t * b[2],
    ]
}

#[inline]
fn pack(c: [f64; 3]) -> u32 {
    rgb(c[0] as u32, c[1] as u32, c[2] as u32)
}

/// Brightens `target` by the red channel of `mask`, `false` if the sizes differ
fn merge_multiply(target: &mut TileImage, mask: &TileImage) -> bool {
    if target.size() != mask.size() {
        return false;
    }
    if target.depth() != 32 {
        *target = target.to_argb32();
    }
    let (width, height) = target.size();
    for y in 0..height {
        for x in 0..width {
            let c = red(mask.pixel(x, y)) as f64 / 255.0;
            let old = target.pixel(x, y);
            let lift = |v: u32| (v as f64 + (255 - v) as f64 * c) as u32;
            target.set_pixel(x, y, rgb(lift(red(old)), lift(green(old)), lift(blue(old))));
        }
    }
    true
}

/// The composite of all base tiles covering one tile position of a theme
#[derive(Debug)]
pub struct StackedTile {
    id: TileId,
    base_tiles: Vec<Arc<TextureTile>>,
    state: AtomicU8,
    result: RwLock<Arc<ResultRaster>>,
    used: AtomicBool,
    for_merged_layer_decorator: bool,
}

impl StackedTile {
    pub fn new(id: TileId) -> Self {
        Self {
            id,
            base_tiles: Vec::new(),
            state: AtomicU8::new(CompletionState::Empty as u8),
            result: RwLock::new(Arc::new(ResultRaster::null())),
            used: AtomicBool::new(false),
            for_merged_layer_decorator: false,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn add_base_tile(&mut self, tile: Arc<TextureTile>) {
        self.base_tiles.push(tile);
        self.derive_completion_state();
    }

    pub fn base_tiles(&self) -> &[Arc<TextureTile>] {
        &self.base_tiles
    }

    pub fn has_base_tiles(&self) -> bool {
        !self.base_tiles.is_empty()
    }

    /// Recounts the base tile states, needed after a base tile changed
    pub fn derive_completion_state(&self) {
        let state = Self::completion_of(&self.base_tiles);
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn completion_of(tiles: &[Arc<TextureTile>]) -> CompletionState {
        let states: Vec<TileState> = tiles.iter().map(|t| t.state()).collect();
        if states.iter().all(|s| *s == TileState::Uptodate) {
            CompletionState::Complete
        } else if states.iter().all(|s| *s == TileState::Empty) {
            CompletionState::Empty
        } else {
            CompletionState::Partial
        }
    }

    /// Completion as of the last [`Self::derive_completion_state`]
    pub fn state(&self) -> CompletionState {
        CompletionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn expired(&self) -> bool {
        self.base_tiles.iter().any(|t| t.is_expired())
    }

    pub fn used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn set_used(&self, used: bool) {
        self.used.store(used, Ordering::Relaxed);
    }

    pub fn for_merged_layer_decorator(&self) -> bool {
        self.for_merged_layer_decorator
    }

    pub fn set_for_merged_layer_decorator(&mut self) {
        self.for_merged_layer_decorator = true;
    }

    /// Merges all non-empty base tiles into a fresh result raster
    pub fn init_result_tile(&self) {
        debug_assert!(self.has_base_tiles());
        let mut merged: Option<TileImage> = None;

        for tile in &self.base_tiles {
            if tile.state() == TileState::Empty {
                continue;
            }
            let image = tile.image();
            match tile.merge_rule() {
                MergeRule::Copy => merged = Some((*image).clone()),
                MergeRule::Multiply => {
                    let applied = merged
                        .as_mut()
                        .map(|target| merge_multiply(target, &image))
                        .unwrap_or(false);
                    if !applied {
                        log::warn!(
                            "skipping multiply merge of {} onto {}: sizes differ",
                            tile.id(),
                            self.id
                        );
                    }
                }
            }
        }

        self.set_result_image(merged.unwrap_or_else(TileImage::null));
    }

    /// Swaps in a new result image and rebuilds its jump table
    pub fn set_result_image(&self, image: TileImage) {
        let raster = Arc::new(ResultRaster::new(image));
        *self.result.write().unwrap_or_else(PoisonError::into_inner) = raster;
    }

    /// The current result raster, stays valid after the tile is re-merged
    pub fn result(&self) -> Arc<ResultRaster> {
        Arc::clone(&self.result.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.result().pixel(x, y)
    }

    pub fn pixel_f(&self, x: f64, y: f64) -> u32 {
        self.result().pixel_f(x, y)
    }

    pub fn depth(&self) -> u32 {
        self.result().depth()
    }

    pub fn is_grayscale(&self) -> bool {
        self.result().is_grayscale()
    }

    /// Bytes held by the result raster, the cost of this tile in the cache
    pub fn num_bytes(&self) -> usize {
        self.result().image().num_bytes()
    }
}
