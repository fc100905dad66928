// Core types shared by screen capture, template matching and diagnostics

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A screen coordinate in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A template located on a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Center of the matched region
    pub center: Point,
    /// Match quality in `0.0..=1.0`
    pub score: f32,
}

/// Result type for screen operations
pub type ScreenResult<T> = Result<T, ScreenError>;

/// Error types for screen operations
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    /// The screen could not be captured
    #[error("Capture error: {0}")]
    Capture(String),

    /// A template file could not be loaded
    #[error("Template {path} unusable: {reason}")]
    Template { path: PathBuf, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScreenError {
    /// Whether this error concerns a single template rather than the screen itself
    pub fn is_template_fault(&self) -> bool {
        matches!(self, ScreenError::Template { .. })
    }
}
