use crate::tiles::image::{alpha, blue, green, red};
use crate::Result;
use image::RgbaImage;
use std::path::Path;

/// Axis aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlap of two rectangles, empty if they do not touch
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        if right <= left || bottom <= top {
            return Rect::default();
        }
        Rect::new(left, top, right - left, bottom - top)
    }
}

/// 32-bit ARGB drawing surface, rows stored back to back
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanvasImage {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl CanvasImage {
    /// A transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn fill(&mut self, argb: u32) {
        self.pixels.fill(argb);
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, argb: u32) {
        let width = self.width as usize;
        self.pixels[y as usize * width + x as usize] = argb;
    }

    pub fn scan_line(&self, y: u32) -> &[u32] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Copies the `rect` part of `source` onto the same position of this canvas
    pub fn draw_image(&mut self, source: &CanvasImage, rect: Rect) {
        let rect = rect.intersect(&self.rect()).intersect(&source.rect());
        if rect.is_empty() {
            return;
        }
        let (x0, x1) = (rect.x as usize, (rect.x + rect.width) as usize);
        for y in rect.y..rect.y + rect.height {
            let target = y as usize * self.width as usize;
            let from = y as usize * source.width as usize;
            self.pixels[target + x0..target + x1].copy_from_slice(&source.pixels[from + x0..from + x1]);
        }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            image::Rgba([red(p) as u8, green(p) as u8, blue(p) as u8, alpha(p) as u8])
        })
    }

    /// Encodes the canvas, the format follows the file extension
    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_rgba_image().save(path)?;
        Ok(())
    }
}
