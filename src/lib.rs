//! Statement Pilot - visual automation of statement exports from a banking portal.
//!
//! The portal has no API, so everything happens through the screen: template
//! images are located on the live display and clicked with a synthetic
//! pointer. This crate provides:
//! - An asset catalog that maps logical target names to template files
//! - A resolver that searches the screen with retries and a confidence ladder
//! - Logged interaction primitives (click, offset click, scroll, wait)
//! - A per-account workflow state machine and a run orchestrator
//! - Session directories holding the run log, diagnostics and summary
//!
//! # Example
//!
//! ```rust,no_run
//! use statement_pilot::{AccountDescriptor, AssetCatalog, Config, ConfidenceLadder, Orchestrator, Resolver};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let catalog = AssetCatalog::new(config.assets.clone());
//!     let ladder = ConfidenceLadder::new(config.matching.min_confidence, config.matching.ladder_step);
//!     let orchestrator = Orchestrator::new(&config, Resolver::new(catalog, ladder));
//!
//!     let mut desktop = statement_pilot::live_desktop()?;
//!     let accounts = vec![AccountDescriptor::new("Conta 41930-3", "41930", "Sicoob_41930")];
//!     let summary = orchestrator.run(&mut desktop, &accounts)?;
//!     println!("{} of {} exported", summary.succeeded, summary.attempted);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod input;
pub mod logging;
pub mod resolver;
pub mod runner;
pub mod screen;
pub mod session;
pub mod workflow;

// Re-export configuration
pub use config::{Config, ConfigError, load_accounts};

// Re-export the catalog
pub use catalog::{AssetCatalog, CatalogAudit};

// Re-export screen and input seams
pub use input::{
    Desktop, EnigoDevice, InputDevice, InputError, Offset, Pacer, ThreadPacer, offset_action,
};
pub use screen::{
    DisplayCapture, FrameSource, Hit, LiveScreen, PixelMatcher, Point, Screen, ScreenError,
    ScreenResult, TemplateMatcher, VirtualDisplay,
};

// Re-export resolution, workflow and orchestration
pub use resolver::{ConfidenceLadder, Lookup, Miss, Resolver, RetryPolicy, ScreenMatch};
pub use runner::{CancelToken, FailedAccount, Orchestrator, RunError, RunSummary};
pub use session::Session;
pub use workflow::{
    AccountDescriptor, AccountFailure, AccountReport, AccountWorkflow, DownloadWatch,
    FailureReason, WorkflowPlan, WorkflowState, WorkflowStep,
};

/// The real desktop: primary monitor, system pointer, thread sleeps
pub fn live_desktop() -> Result<Desktop, LiveDesktopError> {
    let screen = LiveScreen::new(DisplayCapture::primary()?, PixelMatcher);
    let input = EnigoDevice::new()?;
    Ok(Desktop::new(
        Box::new(screen),
        Box::new(input),
        Box::new(ThreadPacer),
    ))
}

/// Errors opening the live desktop
#[derive(Debug, thiserror::Error)]
pub enum LiveDesktopError {
    #[error(transparent)]
    Screen(#[from] ScreenError),

    #[error(transparent)]
    Input(#[from] InputError),
}
