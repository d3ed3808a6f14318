//! Pixel buffers with shared-storage clones
//!
//! A buffer handle either shares its backing storage with other handles
//! (`clone`) or owns an independent duplicate (`deep_copy`). Storage is
//! reference counted and freed when the last handle goes away, so releasing
//! one clone never invalidates another.

use std::path::Path;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use parking_lot::RwLock;

use crate::error::{OcrError, Result};
use crate::geometry::Rect;

/// Bit depths the pixel model supports
pub const SUPPORTED_DEPTHS: [u32; 3] = [1, 8, 32];

/// Backing pixel storage, shared between handles
struct PixelStorage {
    width: u32,
    height: u32,
    depth: u32,
    pixels: RwLock<Vec<u32>>,
}

impl PixelStorage {
    fn mask(&self) -> u32 {
        match self.depth {
            1 => 0x1,
            8 => 0xFF,
            _ => u32::MAX,
        }
    }
}

/// A handle to a pixel buffer.
///
/// `Clone` produces a new handle over the same backing storage: writes made
/// through either handle are visible through the other. [`ImageBuffer::deep_copy`]
/// produces a handle with isolated storage instead. Dropping or releasing a
/// handle decrements the storage reference count; the pixels are freed when
/// the count reaches zero.
pub struct ImageBuffer {
    storage: Arc<PixelStorage>,
}

impl Clone for ImageBuffer {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.storage.width)
            .field("height", &self.storage.height)
            .field("depth", &self.storage.depth)
            .field("storage_refs", &self.storage_refs())
            .finish()
    }
}

impl ImageBuffer {
    /// Create a zero-initialized buffer
    pub fn new(width: u32, height: u32, depth: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(OcrError::InvalidDimensions { width, height });
        }
        if !SUPPORTED_DEPTHS.contains(&depth) {
            return Err(OcrError::UnsupportedDepth(depth));
        }

        let pixels = vec![0u32; (width as usize) * (height as usize)];
        Ok(Self {
            storage: Arc::new(PixelStorage {
                width,
                height,
                depth,
                pixels: RwLock::new(pixels),
            }),
        })
    }

    /// Buffer width in pixels
    pub fn width(&self) -> u32 {
        self.storage.width
    }

    /// Buffer height in pixels
    pub fn height(&self) -> u32 {
        self.storage.height
    }

    /// Bit depth (1, 8 or 32)
    pub fn depth(&self) -> u32 {
        self.storage.depth
    }

    /// Full-image bounds rectangle
    pub fn bounds(&self) -> Rect {
        Rect::of_size(self.storage.width, self.storage.height)
    }

    /// Number of live handles sharing this buffer's backing storage
    pub fn storage_refs(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Duplicate the backing storage into an independent buffer
    pub fn deep_copy(&self) -> Self {
        let pixels = self.storage.pixels.read().clone();
        Self {
            storage: Arc::new(PixelStorage {
                width: self.storage.width,
                height: self.storage.height,
                depth: self.storage.depth,
                pixels: RwLock::new(pixels),
            }),
        }
    }

    /// Read one pixel, bounds-checked
    pub fn pixel(&self, x: u32, y: u32) -> Result<u32> {
        self.index(x, y)
            .map(|i| self.storage.pixels.read()[i])
    }

    /// Write one pixel, bounds-checked. The value is masked to the buffer depth.
    pub fn set_pixel(&self, x: u32, y: u32, value: u32) -> Result<()> {
        let i = self.index(x, y)?;
        self.storage.pixels.write()[i] = value & self.storage.mask();
        Ok(())
    }

    /// Release this handle.
    ///
    /// Consumes the handle, so a released buffer cannot be touched again.
    /// The backing storage is freed once every handle sharing it has been
    /// released or dropped.
    pub fn release(self) {
        drop(self);
    }

    /// Build a 32-bit buffer from decoded RGBA pixels
    pub fn from_rgba(img: &RgbaImage) -> Result<Self> {
        let buffer = Self::new(img.width(), img.height(), 32)?;
        {
            let mut pixels = buffer.storage.pixels.write();
            for (i, Rgba([r, g, b, a])) in img.pixels().enumerate() {
                pixels[i] = u32::from_be_bytes([*a, *r, *g, *b]);
            }
        }
        Ok(buffer)
    }

    /// Decode a raster file into a 32-bit buffer
    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| OcrError::InputRead {
                reason: e.to_string(),
            })?
            .to_rgba8();
        Self::from_rgba(&img)
    }

    /// Render the buffer as RGBA pixels.
    ///
    /// 8-bit buffers expand to grayscale, 1-bit buffers to black and white.
    pub fn to_rgba(&self) -> RgbaImage {
        let pixels = self.storage.pixels.read();
        let mut img = RgbaImage::new(self.storage.width, self.storage.height);
        for (i, out) in img.pixels_mut().enumerate() {
            *out = match self.storage.depth {
                1 => {
                    let v = if pixels[i] == 0 { 0u8 } else { 255u8 };
                    Rgba([v, v, v, 255])
                }
                8 => {
                    let v = pixels[i] as u8;
                    Rgba([v, v, v, 255])
                }
                _ => {
                    let [a, r, g, b] = pixels[i].to_be_bytes();
                    Rgba([r, g, b, a])
                }
            };
        }
        img
    }

    fn index(&self, x: u32, y: u32) -> Result<usize> {
        if x >= self.storage.width || y >= self.storage.height {
            return Err(OcrError::OutOfBounds {
                x,
                y,
                width: self.storage.width,
                height: self.storage.height,
            });
        }
        Ok((y as usize) * (self.storage.width as usize) + (x as usize))
    }
}
