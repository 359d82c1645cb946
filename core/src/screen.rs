use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

impl ScreenSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Closed bounds: the right and bottom edges are still on screen.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && x <= self.width && y >= 0 && y <= self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.width > 0
            && self.height > 0
            && x >= self.left
            && x < self.left + self.width
            && y >= self.top
            && y < self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// A decoded screenshot, detached from whatever buffer the platform handed us.
#[derive(Clone)]
pub struct Screenshot {
    image: Arc<RgbaImage>,
}

impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screenshot")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Screenshot {
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self { image: Arc::new(image) }
    }

    /// Decodes an encoded frame (PNG from screencap, JPEG, ...).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("Failed to decode screenshot")?;
        Ok(Self::from_rgba(img.to_rgba8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> ScreenSize {
        ScreenSize::new(self.width() as i32, self.height() as i32)
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    /// JPEG + base64 for the decision request. Frames wider than `max_dim`
    /// are downscaled first.
    pub fn to_jpeg_base64(&self, max_dim: u32, quality: u8) -> Result<String> {
        let img = DynamicImage::ImageRgba8((*self.image).clone());
        let resized = if img.width() > max_dim || img.height() > max_dim {
            img.resize(max_dim, max_dim, image::imageops::FilterType::Triangle)
        } else {
            img
        };

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_to(&mut buffer, image::ImageOutputFormat::Jpeg(quality))
            .context("Failed to encode screenshot")?;
        Ok(general_purpose::STANDARD.encode(buffer.get_ref()))
    }
}
