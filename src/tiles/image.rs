//! Tile rasters with the three pixel layouts the merge pipeline understands
//!
//! Pixels are stored as 32-bit ARGB words, 8-bit palette indices or packed
//! 1-bit indices. Rows of the 8-bit and 1-bit layouts are padded to 32-bit
//! boundaries, so addressing always goes through a row stride and the jump
//! tables built from it.

use crate::Result;
use image::{DynamicImage, RgbaImage};
use std::path::Path;

/// Alpha channel of an opaque ARGB word
const OPAQUE: u32 = 0xff00_0000;

#[inline]
pub fn red(argb: u32) -> u32 {
    (argb >> 16) & 0xff
}

#[inline]
pub fn green(argb: u32) -> u32 {
    (argb >> 8) & 0xff
}

#[inline]
pub fn blue(argb: u32) -> u32 {
    argb & 0xff
}

#[inline]
pub fn alpha(argb: u32) -> u32 {
    argb >> 24
}

/// Packs an opaque ARGB word, clamping every channel to 0..=255
#[inline]
pub fn rgb(r: u32, g: u32, b: u32) -> u32 {
    OPAQUE | (r.min(255) << 16) | (g.min(255) << 8) | b.min(255)
}

#[inline]
pub fn gray(value: u32) -> u32 {
    rgb(value, value, value)
}

/// Raw pixel storage of a [`TileImage`]
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    /// One ARGB word per pixel
    Argb32(Vec<u32>),
    /// One palette index per pixel
    Indexed8(Vec<u8>),
    /// Eight palette indices per byte, most significant bit first
    Mono1(Vec<u8>),
}

/// Decoded tile image
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    width: u32,
    height: u32,
    /// Row stride in elements of the underlying buffer (words or bytes)
    stride: usize,
    pixels: PixelBuffer,
    color_table: Vec<u32>,
}

impl TileImage {
    /// An image without pixels, used when nothing could be merged
    pub fn null() -> Self {
        Self {
            width: 0,
            height: 0,
            stride: 0,
            pixels: PixelBuffer::Argb32(Vec::new()),
            color_table: Vec::new(),
        }
    }

    /// A 32-bit image filled with `fill`
    pub fn new_argb32(width: u32, height: u32, fill: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            stride: width as usize,
            pixels: PixelBuffer::Argb32(vec![fill; len]),
            color_table: Vec::new(),
        }
    }

    /// Wraps an existing row-major ARGB buffer, `None` if its length does not match
    pub fn from_argb32(width: u32, height: u32, data: Vec<u32>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            stride: width as usize,
            pixels: PixelBuffer::Argb32(data),
            color_table: Vec::new(),
        })
    }

    /// An 8-bit palette image with every index set to 0
    pub fn new_indexed8(width: u32, height: u32, color_table: Vec<u32>) -> Self {
        let stride = (width as usize + 3) & !3;
        Self {
            width,
            height,
            stride,
            pixels: PixelBuffer::Indexed8(vec![0; stride * height as usize]),
            color_table,
        }
    }

    /// An 8-bit image whose palette is the identity gray ramp
    pub fn new_grayscale8(width: u32, height: u32) -> Self {
        Self::new_indexed8(width, height, (0..256).map(gray).collect())
    }

    /// A 1-bit image with every bit cleared
    pub fn new_mono(width: u32, height: u32, color_table: Vec<u32>) -> Self {
        let stride = ((width as usize + 31) / 32) * 4;
        Self {
            width,
            height,
            stride,
            pixels: PixelBuffer::Mono1(vec![0; stride * height as usize]),
            color_table,
        }
    }

    /// Decodes an image file from disk
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_dynamic(image::open(path)?))
    }

    /// Decodes an encoded image held in memory
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(Self::from_dynamic(image::load_from_memory(data)?))
    }

    /// Converts a decoded image: 8-bit gray stays 8-bit, everything else becomes ARGB
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(luma) => {
                let (width, height) = luma.dimensions();
                let mut result = Self::new_grayscale8(width, height);
                for (x, y, pixel) in luma.enumerate_pixels() {
                    result.set_index(x, y, pixel[0]);
                }
                result
            }
            other => {
                let rgba = other.to_rgba8();
                let (width, height) = rgba.dimensions();
                let data = rgba
                    .pixels()
                    .map(|p| {
                        ((p[3] as u32) << 24) | ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32
                    })
                    .collect();
                Self {
                    width,
                    height,
                    stride: width as usize,
                    pixels: PixelBuffer::Argb32(data),
                    color_table: Vec::new(),
                }
            }
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

    pub fn is_null(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bits per pixel, 0 for a null image
    pub fn depth(&self) -> u32 {
        if self.is_null() {
            return 0;
        }
        match self.pixels {
            PixelBuffer::Argb32(_) => 32,
            PixelBuffer::Indexed8(_) => 8,
            PixelBuffer::Mono1(_) => 1,
        }
    }

    /// Row stride in elements of the underlying buffer
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes_per_line(&self) -> usize {
        match self.pixels {
            PixelBuffer::Argb32(_) => self.stride * 4,
            PixelBuffer::Indexed8(_) | PixelBuffer::Mono1(_) => self.stride,
        }
    }

    /// Memory held by the pixel rows
    pub fn num_bytes(&self) -> usize {
        self.bytes_per_line() * self.height as usize
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn color_table(&self) -> &[u32] {
        &self.color_table
    }

    /// True for 8-bit images whose palette is the identity gray ramp, so the
    /// index itself is the gray value
    pub fn is_grayscale(&self) -> bool {
        match self.pixels {
            PixelBuffer::Indexed8(_) => {
                !self.color_table.is_empty()
                    && self
                        .color_table
                        .iter()
                        .enumerate()
                        .all(|(i, &c)| c & 0x00ff_ffff == gray(i as u32) & 0x00ff_ffff)
            }
            _ => false,
        }
    }

    /// Color lookup through the palette, black for indices outside it
    #[inline]
    pub fn color(&self, index: u32) -> u32 {
        self.color_table.get(index as usize).copied().unwrap_or(OPAQUE)
    }

    /// Reads one pixel as ARGB without a jump table
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let row = y as usize * self.stride;
        match &self.pixels {
            PixelBuffer::Argb32(data) => data[row + x as usize],
            PixelBuffer::Indexed8(data) => self.color(data[row + x as usize] as u32),
            PixelBuffer::Mono1(data) => {
                let byte = data[row + x as usize / 8];
                self.color(((byte >> (7 - x % 8)) & 1) as u32)
            }
        }
    }

    /// Writes one ARGB pixel, converting the image to 32-bit first if needed
    pub fn set_pixel(&mut self, x: u32, y: u32, argb: u32) {
        if !matches!(self.pixels, PixelBuffer::Argb32(_)) {
            *self = self.to_argb32();
        }
        let row = y as usize * self.stride;
        if let PixelBuffer::Argb32(data) = &mut self.pixels {
            data[row + x as usize] = argb;
        }
    }

    /// Writes a palette index into an 8-bit or 1-bit image, ignored for 32-bit images
    pub fn set_index(&mut self, x: u32, y: u32, index: u8) {
        let row = y as usize * self.stride;
        match &mut self.pixels {
            PixelBuffer::Indexed8(data) => data[row + x as usize] = index,
            PixelBuffer::Mono1(data) => {
                let byte = &mut data[row + x as usize / 8];
                let mask = 1u8 << (7 - x % 8);
                if index & 1 == 1 {
                    *byte |= mask;
                } else {
                    *byte &= !mask;
                }
            }
            PixelBuffer::Argb32(_) => {}
        }
    }

    /// A 32-bit copy of this image
    pub fn to_argb32(&self) -> TileImage {
        if let PixelBuffer::Argb32(_) = self.pixels {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(self.pixel(x, y));
            }
        }
        TileImage {
            width: self.width,
            height: self.height,
            stride: self.width as usize,
            pixels: PixelBuffer::Argb32(data),
            color_table: Vec::new(),
        }
    }

    /// Copies a sub-rectangle into a new 32-bit image, clipped to the image bounds
    pub fn copy(&self, x: u32, y: u32, width: u32, height: u32) -> TileImage {
        let x_end = (x + width).min(self.width);
        let y_end = (y + height).min(self.height);
        if x >= x_end || y >= y_end {
            return TileImage::null();
        }
        let mut data = Vec::with_capacity(((x_end - x) * (y_end - y)) as usize);
        for row in y..y_end {
            for column in x..x_end {
                data.push(self.pixel(column, row));
            }
        }
        TileImage {
            width: x_end - x,
            height: y_end - y,
            stride: (x_end - x) as usize,
            pixels: PixelBuffer::Argb32(data),
            color_table: Vec::new(),
        }
    }

    /// Nearest-neighbour rescale into a new 32-bit image
    pub fn scaled(&self, width: u32, height: u32) -> TileImage {
        if self.is_null() || width == 0 || height == 0 {
            return TileImage::null();
        }
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let source_y = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let source_x = (x as u64 * self.width as u64 / width as u64) as u32;
                data.push(self.pixel(source_x, source_y));
            }
        }
        TileImage {
            width,
            height,
            stride: width as usize,
            pixels: PixelBuffer::Argb32(data),
            color_table: Vec::new(),
        }
    }

    /// Converts into an RGBA buffer suitable for encoding
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            image::Rgba([red(p) as u8, green(p) as u8, blue(p) as u8, alpha(p) as u8])
        })
    }
}

/// Precomputed row start offsets into a pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTable {
    rows: Box<[usize]>,
}

impl JumpTable {
    /// Builds the table for an image, `None` for images without pixel rows
    pub fn from_image(image: &TileImage) -> Option<Self> {
        if image.is_null() {
            return None;
        }
        let stride = image.stride();
        let rows = (0..image.height() as usize).map(|y| y * stride).collect();
        Some(Self { rows })
    }

    #[inline]
    pub fn row(&self, y: usize) -> usize {
        self.rows[y]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_helpers() {
        let c = rgb(10, 20, 30);
        assert_eq!(red(c), 10);
        assert_eq!(green(c), 20);
        assert_eq!(blue(c), 30);
        assert_eq!(alpha(c), 255);
        assert_eq!(rgb(300, 0, 0), rgb(255, 0, 0));
    }

    #[test]
    fn test_strides_are_padded() {
        let indexed = TileImage::new_grayscale8(5, 2);
        assert_eq!(indexed.stride(), 8);
        assert_eq!(indexed.num_bytes(), 16);
        assert_eq!(indexed.depth(), 8);

        let mono = TileImage::new_mono(33, 2, vec![rgb(0, 0, 0), rgb(255, 255, 255)]);
        assert_eq!(mono.stride(), 8);
        assert_eq!(mono.depth(), 1);

        let argb = TileImage::new_argb32(3, 2, 0);
        assert_eq!(argb.bytes_per_line(), 12);
        assert_eq!(argb.num_bytes(), 24);
    }

    #[test]
    fn test_grayscale_detection() {
        assert!(TileImage::new_grayscale8(2, 2).is_grayscale());
        let palette = TileImage::new_indexed8(2, 2, vec![rgb(255, 0, 0), rgb(0, 255, 0)]);
        assert!(!palette.is_grayscale());
        assert!(!TileImage::new_argb32(2, 2, 0).is_grayscale());
    }

    #[test]
    fn test_mono_bits_are_msb_first() {
        let mut mono = TileImage::new_mono(10, 1, vec![rgb(0, 0, 0), rgb(255, 255, 255)]);
        mono.set_index(0, 0, 1);
        mono.set_index(9, 0, 1);
        assert_eq!(mono.pixel(0, 0), rgb(255, 255, 255));
        assert_eq!(mono.pixel(1, 0), rgb(0, 0, 0));
        assert_eq!(mono.pixel(9, 0), rgb(255, 255, 255));
        if let PixelBuffer::Mono1(data) = mono.pixels() {
            assert_eq!(data[0], 0b1000_0000);
            assert_eq!(data[1], 0b0100_0000);
        }
    }

    #[test]
    fn test_copy_and_scale() {
        let mut image = TileImage::new_argb32(4, 4, rgb(0, 0, 0));
        image.set_pixel(2, 2, rgb(255, 0, 0));
        image.set_pixel(3, 3, rgb(0, 255, 0));

        let part = image.copy(2, 2, 2, 2);
        assert_eq!(part.size(), (2, 2));
        assert_eq!(part.pixel(0, 0), rgb(255, 0, 0));
        assert_eq!(part.pixel(1, 1), rgb(0, 255, 0));

        let scaled = part.scaled(4, 4);
        assert_eq!(scaled.pixel(0, 0), rgb(255, 0, 0));
        assert_eq!(scaled.pixel(1, 1), rgb(255, 0, 0));
        assert_eq!(scaled.pixel(3, 3), rgb(0, 255, 0));
        assert!(image.copy(4, 4, 2, 2).is_null());
    }

    #[test]
    fn test_decode_png_round_trip_keeps_gray_as_eight_bit() {
        let gray_image = image::GrayImage::from_fn(3, 2, |x, _| image::Luma([(x * 100) as u8]));
        let mut encoded = Vec::new();
        DynamicImage::ImageLuma8(gray_image)
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = TileImage::from_bytes(&encoded).unwrap();
        assert_eq!(decoded.depth(), 8);
        assert!(decoded.is_grayscale());
        assert_eq!(decoded.pixel(2, 0), gray(200));
    }

    #[test]
    fn test_jump_table_rows_follow_stride() {
        let image = TileImage::new_grayscale8(5, 3);
        let table = JumpTable::from_image(&image).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.row(2), 16);
        assert!(JumpTable::from_image(&TileImage::null()).is_none());
    }
}
