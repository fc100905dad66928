//! Frame sources for screen capture.
//!
//! This module provides a unified interface for the places a frame can come
//! from:
//! - `DisplayCapture` grabs the primary monitor through `xcap`
//! - `VirtualDisplay` is an in-memory screen for tests and offline probing

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{DynamicImage, ImageBuffer, RgbImage, RgbaImage};

use super::types::{ScreenError, ScreenResult};

/// Trait for frame sources
///
/// Implementations return the full visible screen as an RGBA image:
/// - `DisplayCapture` for the live desktop
/// - `VirtualDisplay` for tests with programmatic drawing
pub trait FrameSource {
    /// Capture the current frame
    fn grab(&mut self) -> ScreenResult<RgbaImage>;

    /// Get the source type identifier (e.g., "display", "virtual")
    fn source_type(&self) -> &str;
}

/// Captures the primary monitor
pub struct DisplayCapture {
    monitor: xcap::Monitor,
}

impl DisplayCapture {
    /// Select the primary monitor, or the first one reported
    pub fn primary() -> ScreenResult<Self> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| ScreenError::Capture(format!("Failed to list monitors: {}", e)))?;

        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                return Ok(Self { monitor });
            }
            if fallback.is_none() {
                fallback = Some(monitor);
            }
        }

        fallback
            .map(|monitor| Self { monitor })
            .ok_or_else(|| ScreenError::Capture("No monitor available".to_string()))
    }
}

impl FrameSource for DisplayCapture {
    fn grab(&mut self) -> ScreenResult<RgbaImage> {
        self.monitor
            .capture_image()
            .map_err(|e| ScreenError::Capture(format!("Failed to capture monitor: {}", e)))
    }

    fn source_type(&self) -> &str {
        "display"
    }
}

/// An in-memory screen for testing and programmatic drawing
///
/// Provides a drawing API for building fixtures:
/// - `fill()` - Fill entire buffer with a color
/// - `draw_rect()` - Draw a filled rectangle
/// - `draw_text()` - Draw text using font8x8 glyphs
/// - `paste()` / `crop()` - Move image regions in and out
#[derive(Debug, Clone)]
pub struct VirtualDisplay {
    width: u32,
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl VirtualDisplay {
    /// Create a new display with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        let buffer = vec![0u8; (width * height * 3) as usize];
        Self {
            width,
            height,
            buffer,
        }
    }

    /// Create a display initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut display = Self::new(width, height);
        display.fill(color);
        display
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the entire display with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs
    ///
    /// Each character is 8x8 pixels. Text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
            if cursor_x >= self.width {
                break;
            }
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let is_fg = (row >> bit) & 1 == 1;
                self.set_pixel(px, py, if is_fg { fg } else { bg });
            }
        }
    }

    /// Copy an image onto the display with its top-left corner at (x, y)
    pub fn paste(&mut self, x: u32, y: u32, img: &RgbImage) {
        for (px, py, pixel) in img.enumerate_pixels() {
            self.set_pixel(x + px, y + py, pixel.0);
        }
    }

    /// Cut a region out of the display, clamped to its bounds
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
        let w = w.min(self.width.saturating_sub(x));
        let h = h.min(self.height.saturating_sub(y));
        ImageBuffer::from_fn(w, h, |px, py| image::Rgb(self.get_pixel(x + px, y + py)))
    }

    /// Get the color of a pixel
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    /// Set the color of a pixel
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    /// Convert to an RGB image
    pub fn to_image(&self) -> RgbImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| image::Rgb(self.get_pixel(x, y)))
    }
}

impl FrameSource for VirtualDisplay {
    fn grab(&mut self) -> ScreenResult<RgbaImage> {
        Ok(DynamicImage::ImageRgb8(self.to_image()).to_rgba8())
    }

    fn source_type(&self) -> &str {
        "virtual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_display_new() {
        let display = VirtualDisplay::new(100, 50);
        assert_eq!(display.width(), 100);
        assert_eq!(display.height(), 50);
        assert_eq!(display.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(display.get_pixel(99, 49), [0, 0, 0]);
    }

    #[test]
    fn test_virtual_display_draw_rect() {
        let mut display = VirtualDisplay::new(20, 20);
        display.draw_rect(5, 5, 10, 10, [255, 0, 0]);

        assert_eq!(display.get_pixel(4, 4), [0, 0, 0]);
        assert_eq!(display.get_pixel(5, 5), [255, 0, 0]);
        assert_eq!(display.get_pixel(14, 14), [255, 0, 0]);
        assert_eq!(display.get_pixel(15, 15), [0, 0, 0]);
    }

    #[test]
    fn test_virtual_display_draw_text() {
        let mut display = VirtualDisplay::new(80, 16);
        display.draw_text(0, 0, "Hi", [255, 255, 255], [0, 0, 0]);

        let has_white = (0..8).any(|y| (0..8).any(|x| display.get_pixel(x, y) == [255, 255, 255]));
        assert!(has_white, "Character 'H' should have some foreground pixels");
    }

    #[test]
    fn test_crop_and_paste() {
        let mut source = VirtualDisplay::with_color(30, 30, [10, 20, 30]);
        source.draw_rect(10, 10, 5, 5, [255, 255, 0]);
        let patch = source.crop(10, 10, 5, 5);
        assert_eq!(patch.dimensions(), (5, 5));

        let mut target = VirtualDisplay::new(40, 40);
        target.paste(30, 2, &patch);
        assert_eq!(target.get_pixel(30, 2), [255, 255, 0]);
        assert_eq!(target.get_pixel(34, 6), [255, 255, 0]);
        assert_eq!(target.get_pixel(29, 2), [0, 0, 0]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let display = VirtualDisplay::new(10, 10);
        assert_eq!(display.crop(8, 8, 5, 5).dimensions(), (2, 2));
    }

    #[test]
    fn test_grab_matches_drawing() {
        let mut display = VirtualDisplay::with_color(16, 16, [100, 150, 200]);
        let frame = display.grab().unwrap();
        assert_eq!(frame.dimensions(), (16, 16));
        assert_eq!(frame.get_pixel(3, 3).0, [100, 150, 200, 255]);
    }
}
