use chrono::Local;
use image::RgbaImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::types::ScreenResult;

/// Generate a timestamp string in YYYYMMDD_HHMMSS format
pub fn generate_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Generate the filename of a diagnostic screenshot for a target
pub fn diagnostic_filename(target: &str, timestamp: &str) -> String {
    format!("debug_{}_{}.png", sanitize_name(target), timestamp)
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Manifest written next to each diagnostic screenshot
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticManifest<'a> {
    pub target: &'a str,
    pub timestamp: &'a str,
    pub width: u32,
    pub height: u32,
    pub candidates: &'a [PathBuf],
    pub attempts: u32,
}

/// Save a full-screen diagnostic image and its JSON manifest into `dir`
pub fn write_diagnostic(
    dir: &Path,
    frame: &RgbaImage,
    target: &str,
    candidates: &[PathBuf],
    attempts: u32,
) -> ScreenResult<PathBuf> {
    fs::create_dir_all(dir)?;

    let timestamp = generate_timestamp();
    let image_path = dir.join(diagnostic_filename(target, &timestamp));
    frame.save(&image_path)?;

    let manifest = DiagnosticManifest {
        target,
        timestamp: &timestamp,
        width: frame.width(),
        height: frame.height(),
        candidates,
        attempts,
    };
    fs::write(
        image_path.with_extension("json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    Ok(image_path)
}
