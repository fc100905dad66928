//! Optional confirmation that an export actually produced a file.
//!
//! The portal saves the statement through the browser, so the only evidence
//! of a completed export is a new file in the download directory. The watch
//! lists the directory before the export is confirmed, polls it a bounded
//! number of times afterwards and files the first new, finished download
//! under `<file_stem>_<YYYYMMDD>.<ext>`.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::input::Desktop;

use super::types::FailureReason;

/// Extensions browsers use while a download is still in progress
pub const PARTIAL_EXTENSIONS: [&str; 3] = ["crdownload", "part", "tmp"];

/// Default interval between directory polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watches a download directory for the file an export produces
#[derive(Debug, Clone)]
pub struct DownloadWatch {
    dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl DownloadWatch {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of polls after the first look
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        (self.timeout.as_millis() / interval).min(u128::from(u32::MAX)) as u32
    }

    /// Files present right now
    pub fn snapshot(&self) -> HashSet<PathBuf> {
        match fs::read_dir(&self.dir) {
            Ok(entries) => entries.filter_map(Result::ok).map(|e| e.path()).collect(),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list download directory");
                HashSet::new()
            }
        }
    }

    /// Newest finished file not present in `baseline`
    pub fn find_new(&self, baseline: &HashSet<PathBuf>) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|path| !baseline.contains(path) && is_finished_download(path))
            .max_by_key(|path| {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            })
    }

    /// Poll for the exported file and file it under the account's name
    pub fn await_artifact(
        &self,
        desktop: &mut Desktop,
        baseline: &HashSet<PathBuf>,
        file_stem: &str,
        date: NaiveDate,
    ) -> Result<PathBuf, FailureReason> {
        let polls = self.max_polls();
        for poll in 0..=polls {
            if let Some(found) = self.find_new(baseline) {
                debug!(path = %found.display(), poll, "download detected");
                return self.archive(&found, file_stem, date);
            }
            if poll < polls {
                desktop.pause(self.poll_interval);
            }
        }

        Err(FailureReason::ArtifactMissing {
            dir: self.dir.clone(),
            waited_secs: self.timeout.as_secs(),
        })
    }

    fn archive(
        &self,
        found: &Path,
        file_stem: &str,
        date: NaiveDate,
    ) -> Result<PathBuf, FailureReason> {
        let ext = found
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut dest = self.dir.join(archive_name(file_stem, date, &ext, 0));
        let mut n = 1;
        while dest.exists() && dest != found {
            dest = self.dir.join(archive_name(file_stem, date, &ext, n));
            n += 1;
        }

        fs::rename(found, &dest).map_err(|e| FailureReason::Unexpected {
            message: format!("could not rename {}: {}", found.display(), e),
        })?;
        info!(from = %found.display(), to = %dest.display(), "statement saved");
        Ok(dest)
    }
}

/// `Sicoob_41930_20250314.xls`, with `_<n>` appended for n > 0
pub fn archive_name(file_stem: &str, date: NaiveDate, ext: &str, n: u32) -> String {
    let mut name = format!("{}_{}", file_stem, date.format("%Y%m%d"));
    if n > 0 {
        name.push_str(&format!("_{}", n));
    }
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// A regular, non-empty, non-hidden file without a partial-download extension
pub fn is_finished_download(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    let partial = path
        .extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            PARTIAL_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false);
    let complete = fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);
    !hidden && !partial && complete
}
