//! Session management for run outputs.
//!
//! Every run gets its own directory holding:
//! - `.session.json` metadata
//! - `run.log`, the append-only structured log
//! - diagnostic screenshots and their manifests
//! - `summary.json`, the serialized [`RunSummary`]

use std::fs;
use std::path::{Path, PathBuf};

use crate::runner::RunSummary;
use crate::screen::generate_timestamp;

/// Name of the run log inside a session directory
pub const LOG_FILE: &str = "run.log";

/// Name of the serialized summary inside a session directory
pub const SUMMARY_FILE: &str = "summary.json";

/// A run session with organized file management
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
}

impl Session {
    /// Create a session named `run_<timestamp>` under `base`
    pub fn new(base: impl AsRef<Path>) -> Self {
        let id = format!("run_{}", generate_timestamp());
        let dir = unique_dir(base.as_ref(), &id);
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(id);
        Self { id, dir }
    }

    /// Use an exact directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("run_{}", generate_timestamp()));
        Self { id, dir }
    }

    /// Create the directory and write session metadata
    pub fn init(&self, accounts: usize) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Local::now().to_rfc3339(),
            "accounts": accounts,
            "version": env!("CARGO_PKG_VERSION"),
        });

        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Where diagnostic screenshots go
    pub fn diagnostics_dir(&self) -> PathBuf {
        self.dir.clone()
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Serialize the run summary into the session
    pub fn write_summary(&self, summary: &RunSummary) -> std::io::Result<PathBuf> {
        let path = self.summary_path();
        fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        Ok(path)
    }

    /// List the diagnostic screenshots written so far
    pub fn list_diagnostics(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                let is_png = path.extension().map(|e| e == "png").unwrap_or(false);
                let is_debug = path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with("debug_"))
                    .unwrap_or(false);
                if is_png && is_debug {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

/// `base/id`, or `base/id_<n>` when two runs start within the same second
fn unique_dir(base: &Path, id: &str) -> PathBuf {
    let mut dir = base.join(id);
    let mut n = 1;
    while dir.exists() {
        dir = base.join(format!("{}_{}", id, n));
        n += 1;
    }
    dir
}
