//! Target resolution: find a named control on the live screen.
//!
//! A lookup walks every validated candidate file for the target, and for each
//! one descends a confidence ladder from the requested floor to a hard
//! minimum, trying each rung `tries` times with a delay in between. The first
//! hit wins. Exhausting everything yields [`Lookup::NotFound`] plus a
//! diagnostic screenshot; a target with no usable file at all yields
//! [`Lookup::NoCandidate`]. Only screen-level faults are returned as errors.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::catalog::AssetCatalog;
use crate::config::DEFAULT_MIN_CONFIDENCE;
use crate::input::Desktop;
use crate::screen::{Point, ScreenResult, write_diagnostic};

/// How hard to look for one target
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Confidence floor the ladder starts at
    pub confidence: f32,
    /// Attempts per (candidate, rung)
    pub tries: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(confidence: f32, tries: u32, delay: Duration) -> Self {
        Self {
            confidence,
            tries,
            delay,
        }
    }
}

/// Descending confidence thresholds, bounded below by a hard minimum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceLadder {
    pub minimum: f32,
    pub step: f32,
}

impl ConfidenceLadder {
    pub const fn new(minimum: f32, step: f32) -> Self {
        Self { minimum, step }
    }

    /// Rungs from `floor` down to the minimum; a floor below the minimum is raised to it.
    ///
    /// Rungs are rounded to [`RUNG_RESOLUTION`] and never repeat. A step that
    /// is not a positive number yields the single starting rung.
    pub fn rungs(&self, floor: f32) -> Vec<f32> {
        let minimum = if self.minimum.is_finite() {
            self.minimum.clamp(0.0, 1.0)
        } else {
            DEFAULT_MIN_CONFIDENCE
        };
        let floor = if floor.is_finite() { floor } else { minimum };
        let start = round3(floor.clamp(minimum, 1.0));
        if !(self.step.is_finite() && self.step > 0.0) {
            return vec![start];
        }

        let step = self.step.max(RUNG_RESOLUTION);
        let mut rungs = vec![start];
        for i in 1.. {
            let level = round3(start - step * i as f32);
            if level < minimum - 1e-4 {
                break;
            }
            let level = level.max(minimum);
            if rungs.last() != Some(&level) {
                rungs.push(level);
            }
        }
        rungs
    }
}

/// Finest distinction between two rungs
pub const RUNG_RESOLUTION: f32 = 0.001;

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// A successful lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenMatch {
    pub target: String,
    pub location: Point,
    /// Ladder rung the hit was accepted at
    pub confidence: f32,
    /// Score reported by the matcher
    pub score: f32,
    pub candidate: PathBuf,
    pub attempts: u32,
}

/// An exhausted lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Miss {
    pub target: String,
    pub candidates: Vec<PathBuf>,
    pub attempts: u32,
    pub lowest_confidence: f32,
    pub diagnostic: Option<PathBuf>,
}

/// Outcome of [`Resolver::locate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Lookup {
    Found(ScreenMatch),
    /// Candidates exist but none was seen on screen
    NotFound(Miss),
    /// No usable template file exists for the target
    NoCandidate { target: String },
}

impl Lookup {
    pub fn found(&self) -> Option<&ScreenMatch> {
        match self {
            Lookup::Found(m) => Some(m),
            _ => None,
        }
    }
}

/// Locates catalog targets on the screen
#[derive(Debug)]
pub struct Resolver {
    catalog: AssetCatalog,
    ladder: ConfidenceLadder,
    diagnostics_dir: Option<PathBuf>,
}

impl Resolver {
    pub fn new(catalog: AssetCatalog, ladder: ConfidenceLadder) -> Self {
        Self {
            catalog,
            ladder,
            diagnostics_dir: None,
        }
    }

    /// Save a screenshot into `dir` whenever a lookup is exhausted
    pub fn with_diagnostics(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    pub fn ladder(&self) -> ConfidenceLadder {
        self.ladder
    }

    #[instrument(
        name = "locate",
        skip(self, desktop, policy),
        fields(floor = policy.confidence, tries = policy.tries)
    )]
    pub fn locate(
        &self,
        desktop: &mut Desktop,
        target: &str,
        policy: &RetryPolicy,
    ) -> ScreenResult<Lookup> {
        let candidates = self.catalog.resolve_candidates(target);
        if candidates.is_empty() {
            warn!(target_name = target, "no usable template file for target");
            return Ok(Lookup::NoCandidate {
                target: target.to_string(),
            });
        }

        let rungs = self.ladder.rungs(policy.confidence);
        let tries = policy.tries.max(1);
        let mut attempts = 0u32;

        'candidates: for candidate in &candidates {
            for &confidence in &rungs {
                for attempt in 1..=tries {
                    if attempts > 0 {
                        desktop.pause(policy.delay);
                    }
                    attempts += 1;
                    debug!(
                        target_name = target,
                        candidate = %candidate.display(),
                        confidence,
                        attempt,
                        "searching"
                    );

                    match desktop.screen().find(candidate, confidence) {
                        Ok(Some(hit)) if hit.score >= confidence => {
                            info!(
                                target_name = target,
                                candidate = %candidate.display(),
                                confidence,
                                score = hit.score,
                                x = hit.center.x,
                                y = hit.center.y,
                                attempts,
                                "target located"
                            );
                            return Ok(Lookup::Found(ScreenMatch {
                                target: target.to_string(),
                                location: hit.center,
                                confidence,
                                score: hit.score,
                                candidate: candidate.clone(),
                                attempts,
                            }));
                        }
                        Ok(_) => {}
                        Err(e) if e.is_template_fault() => {
                            warn!(target_name = target, error = %e, "skipping candidate");
                            continue 'candidates;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let lowest_confidence = rungs.last().copied().unwrap_or(policy.confidence);
        warn!(
            target_name = target,
            attempts,
            lowest_confidence,
            candidates = ?candidates,
            "target not found on screen"
        );

        let diagnostic = self.save_diagnostic(desktop, target, &candidates, attempts);
        Ok(Lookup::NotFound(Miss {
            target: target.to_string(),
            candidates,
            attempts,
            lowest_confidence,
            diagnostic,
        }))
    }

    /// Failures here are logged and swallowed; the miss is what matters
    fn save_diagnostic(
        &self,
        desktop: &mut Desktop,
        target: &str,
        candidates: &[PathBuf],
        attempts: u32,
    ) -> Option<PathBuf> {
        let dir = self.diagnostics_dir.as_ref()?;
        let saved = desktop
            .screen()
            .capture()
            .and_then(|frame| write_diagnostic(dir, &frame, target, candidates, attempts));
        match saved {
            Ok(path) => {
                info!(target_name = target, path = %path.display(), "saved diagnostic screenshot");
                Some(path)
            }
            Err(e) => {
                warn!(target_name = target, error = %e, "could not save diagnostic screenshot");
                None
            }
        }
    }
}
