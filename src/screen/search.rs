//! The screen seam used by the resolver.
//!
//! [`Screen`] is the black box the rest of the crate talks to: "is this
//! template visible at this confidence, and where". [`LiveScreen`] implements
//! it by grabbing a fresh frame from a [`FrameSource`] and handing it to a
//! [`TemplateMatcher`].

use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::backend::FrameSource;
use super::matcher::TemplateMatcher;
use super::types::{Hit, ScreenError, ScreenResult};

/// Visual search against the current screen
pub trait Screen {
    /// Look for `template` on a fresh frame, requiring at least `confidence`
    fn find(&mut self, template: &Path, confidence: f32) -> ScreenResult<Option<Hit>>;

    /// Capture the full screen, for diagnostics
    fn capture(&mut self) -> ScreenResult<RgbaImage>;
}

/// Searches frames from a live source with a template matcher
pub struct LiveScreen<S, M> {
    source: S,
    matcher: M,
    templates: HashMap<PathBuf, RgbaImage>,
}

impl<S: FrameSource, M: TemplateMatcher> LiveScreen<S, M> {
    pub fn new(source: S, matcher: M) -> Self {
        Self {
            source,
            matcher,
            templates: HashMap::new(),
        }
    }

    fn load_template(&mut self, path: &Path) -> ScreenResult<()> {
        if !self.templates.contains_key(path) {
            let img = image::open(path).map_err(|e| ScreenError::Template {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            self.templates.insert(path.to_path_buf(), img.to_rgba8());
        }
        Ok(())
    }
}

impl<S: FrameSource, M: TemplateMatcher> Screen for LiveScreen<S, M> {
    fn find(&mut self, template: &Path, confidence: f32) -> ScreenResult<Option<Hit>> {
        self.load_template(template)?;
        let frame = self.source.grab()?;
        let hit = self
            .matcher
            .best_match(&frame, &self.templates[template], confidence);
        trace!(
            source = self.source.source_type(),
            template = %template.display(),
            confidence,
            found = hit.is_some(),
            "template search"
        );
        Ok(hit)
    }

    fn capture(&mut self) -> ScreenResult<RgbaImage> {
        self.source.grab()
    }
}
