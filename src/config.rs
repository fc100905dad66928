//! Configuration management with environment variable support.
//!
//! This module provides the settings for a statement export run, supporting:
//! - Environment variables for all configurable values
//! - Defaults that match the timings the portal was observed to need
//! - Loading the account list from a JSON file
//!
//! Nothing here is global: `main` builds a [`Config`] once and hands it to the
//! catalog, resolver, workflow plan and orchestrator.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STATEMENT_PILOT_ASSET_DIR` | Root of the template image tree | `img_automacao` |
//! | `STATEMENT_PILOT_LABEL_PREFIX` | On-screen prefix of account labels | `Conta` |
//! | `STATEMENT_PILOT_MAX_CANDIDATES` | Candidate files tried per target | `3` |
//! | `STATEMENT_PILOT_CONFIDENCE` | Confidence floor for control targets | `0.9` |
//! | `STATEMENT_PILOT_ACCOUNT_CONFIDENCE` | Confidence floor for account labels | `0.7` |
//! | `STATEMENT_PILOT_MIN_CONFIDENCE` | Hard minimum of the confidence ladder | `0.7` |
//! | `STATEMENT_PILOT_LADDER_STEP` | Confidence decrement per ladder rung | `0.1` |
//! | `STATEMENT_PILOT_TRIES` | Attempts per candidate and rung | `3` |
//! | `STATEMENT_PILOT_RETRY_DELAY_MS` | Delay between attempts (ms) | `1000` |
//! | `STATEMENT_PILOT_OPEN_OFFSET_X` | Horizontal offset of the open-account control | `400` |
//! | `STATEMENT_PILOT_SCROLL` | Scroll amount before export (negative = down) | `-500` |
//! | `STATEMENT_PILOT_INTER_ACCOUNT_MS` | Pause between accounts (ms) | `3000` |
//! | `STATEMENT_PILOT_COUNTDOWN` | Seconds to wait before the first click | `10` |
//! | `STATEMENT_PILOT_OUTPUT_DIR` | Base directory for run sessions | `automation_runs` |
//! | `STATEMENT_PILOT_DOWNLOAD_DIR` | Watch this directory for exported files | unset |
//! | `STATEMENT_PILOT_DOWNLOAD_TIMEOUT` | Download watch timeout (seconds) | `30` |
//! | `STATEMENT_PILOT_MAX_FAULTS` | Consecutive input faults that halt the run | `2` |
//!
//! # Example
//!
//! ```bash
//! export STATEMENT_PILOT_ASSET_DIR="$HOME/portal-assets"
//! export STATEMENT_PILOT_DOWNLOAD_DIR="$HOME/Downloads"
//! statement-pilot run --accounts accounts.json
//! ```

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::catalog::name_variants;
use crate::workflow::AccountDescriptor;

// ============================================================================
// Default Values
// ============================================================================

/// Default root of the template image tree
pub const DEFAULT_ASSET_DIR: &str = "img_automacao";

/// Default prefix shown before the account number on screen
pub const DEFAULT_LABEL_PREFIX: &str = "Conta";

/// Default number of validated candidate files handed to the resolver
pub const DEFAULT_MAX_CANDIDATES: usize = 3;

/// Default image extensions searched for each variant, in priority order
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Default confidence floor for fixed control targets
pub const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Default confidence floor for account labels
pub const DEFAULT_ACCOUNT_CONFIDENCE: f32 = 0.7;

/// Default hard minimum of the confidence ladder
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;

/// Default confidence decrement between ladder rungs
pub const DEFAULT_LADDER_STEP: f32 = 0.1;

/// Default attempts per (candidate, rung)
pub const DEFAULT_TRIES: u32 = 3;

/// Default delay between attempts (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default attempts for calendar day targets
pub const DEFAULT_DAY_TRIES: u32 = 5;

/// Default delay between calendar attempts (milliseconds)
pub const DEFAULT_DAY_DELAY_MS: u64 = 2000;

/// Default attempts for the switch-account control
pub const DEFAULT_SWITCH_TRIES: u32 = 5;

/// Default delay between switch-account attempts (milliseconds)
pub const DEFAULT_SWITCH_DELAY_MS: u64 = 3000;

/// Default horizontal offset from an account label to its open control
pub const DEFAULT_OPEN_OFFSET_X: i32 = 400;

/// Default settle time after opening an account (milliseconds)
pub const DEFAULT_OPEN_SETTLE_MS: u64 = 5000;

/// Default scroll amount before the export controls (negative scrolls down)
pub const DEFAULT_SCROLL: i32 = -500;

/// Default settle time after scrolling (milliseconds)
pub const DEFAULT_SCROLL_SETTLE_MS: u64 = 2000;

/// Default fixed wait standing in for download completion (milliseconds)
pub const DEFAULT_DOWNLOAD_WAIT_MS: u64 = 5000;

/// Default pause between accounts (milliseconds)
pub const DEFAULT_INTER_ACCOUNT_MS: u64 = 3000;

/// Default countdown before the run starts (seconds)
pub const DEFAULT_COUNTDOWN_SECS: u64 = 10;

/// Default base directory for run sessions
pub const DEFAULT_OUTPUT_DIR: &str = "automation_runs";

/// Default download watch timeout (seconds)
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Default consecutive interaction faults tolerated before halting
pub const DEFAULT_MAX_FAULTS: u32 = 2;

/// Default account list file
pub const DEFAULT_ACCOUNTS_FILE: &str = "accounts.json";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_ASSET_DIR: &str = "STATEMENT_PILOT_ASSET_DIR";
pub const ENV_LABEL_PREFIX: &str = "STATEMENT_PILOT_LABEL_PREFIX";
pub const ENV_MAX_CANDIDATES: &str = "STATEMENT_PILOT_MAX_CANDIDATES";
pub const ENV_CONFIDENCE: &str = "STATEMENT_PILOT_CONFIDENCE";
pub const ENV_ACCOUNT_CONFIDENCE: &str = "STATEMENT_PILOT_ACCOUNT_CONFIDENCE";
pub const ENV_MIN_CONFIDENCE: &str = "STATEMENT_PILOT_MIN_CONFIDENCE";
pub const ENV_LADDER_STEP: &str = "STATEMENT_PILOT_LADDER_STEP";
pub const ENV_TRIES: &str = "STATEMENT_PILOT_TRIES";
pub const ENV_RETRY_DELAY: &str = "STATEMENT_PILOT_RETRY_DELAY_MS";
pub const ENV_OPEN_OFFSET_X: &str = "STATEMENT_PILOT_OPEN_OFFSET_X";
pub const ENV_SCROLL: &str = "STATEMENT_PILOT_SCROLL";
pub const ENV_INTER_ACCOUNT: &str = "STATEMENT_PILOT_INTER_ACCOUNT_MS";
pub const ENV_COUNTDOWN: &str = "STATEMENT_PILOT_COUNTDOWN";
pub const ENV_OUTPUT_DIR: &str = "STATEMENT_PILOT_OUTPUT_DIR";
pub const ENV_DOWNLOAD_DIR: &str = "STATEMENT_PILOT_DOWNLOAD_DIR";
pub const ENV_DOWNLOAD_TIMEOUT: &str = "STATEMENT_PILOT_DOWNLOAD_TIMEOUT";
pub const ENV_MAX_FAULTS: &str = "STATEMENT_PILOT_MAX_FAULTS";

// ============================================================================
// Settings
// ============================================================================

/// Centralized configuration for a run
#[derive(Debug, Clone)]
pub struct Config {
    /// Where template images live and how names map to files
    pub assets: AssetSettings,
    /// Confidence ladder and retry defaults
    pub matching: MatchSettings,
    /// Fixed delays and pointer geometry of the workflow
    pub workflow: WorkflowSettings,
    /// Run-level behavior
    pub run: RunSettings,
}

/// Template asset locations
#[derive(Debug, Clone)]
pub struct AssetSettings {
    /// Generic controls (buttons, radio buttons)
    pub controls_dir: PathBuf,
    /// Calendar day numbers
    pub days_dir: PathBuf,
    /// Account labels
    pub accounts_dir: PathBuf,
    /// Prefix stripped from on-screen account labels
    pub label_prefix: String,
    /// Maximum validated candidates per target
    pub max_candidates: usize,
    /// Extensions tried for each name variant
    pub extensions: Vec<String>,
}

/// Matching thresholds and retry defaults
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub confidence: f32,
    pub account_confidence: f32,
    /// Ladder never goes below this
    pub min_confidence: f32,
    pub ladder_step: f32,
    pub tries: u32,
    pub retry_delay: Duration,
    pub day_tries: u32,
    pub day_delay: Duration,
    pub switch_tries: u32,
    pub switch_delay: Duration,
}

/// Workflow geometry and settle times
#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub open_offset_x: i32,
    pub open_settle: Duration,
    pub scroll_amount: i32,
    pub scroll_settle: Duration,
    pub download_wait: Duration,
}

/// Run-level settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub inter_account_delay: Duration,
    pub countdown: Duration,
    pub output_dir: PathBuf,
    /// Enables the download watch when set
    pub download_dir: Option<PathBuf>,
    pub download_timeout: Duration,
    pub max_consecutive_faults: u32,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            assets: AssetSettings::from_env(),
            matching: MatchSettings::from_env(),
            workflow: WorkflowSettings::from_env(),
            run: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            assets: AssetSettings::defaults(),
            matching: MatchSettings::defaults(),
            workflow: WorkflowSettings::defaults(),
            run: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AssetSettings {
    pub fn from_env() -> Self {
        let root = env::var(ENV_ASSET_DIR).unwrap_or_else(|_| DEFAULT_ASSET_DIR.to_string());
        Self {
            label_prefix: env::var(ENV_LABEL_PREFIX)
                .unwrap_or_else(|_| DEFAULT_LABEL_PREFIX.to_string()),
            max_candidates: env_or(ENV_MAX_CANDIDATES, DEFAULT_MAX_CANDIDATES),
            ..Self::under(root)
        }
    }

    pub fn defaults() -> Self {
        Self::under(DEFAULT_ASSET_DIR)
    }

    /// Standard layout below `root`: `botoes/`, `botoes/contas/`, `dias/`
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let controls_dir = root.join("botoes");
        Self {
            accounts_dir: controls_dir.join("contas"),
            controls_dir,
            days_dir: root.join("dias"),
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl MatchSettings {
    pub fn from_env() -> Self {
        Self {
            confidence: env_checked(ENV_CONFIDENCE, DEFAULT_CONFIDENCE, is_confidence),
            account_confidence: env_checked(
                ENV_ACCOUNT_CONFIDENCE,
                DEFAULT_ACCOUNT_CONFIDENCE,
                is_confidence,
            ),
            min_confidence: env_checked(ENV_MIN_CONFIDENCE, DEFAULT_MIN_CONFIDENCE, is_confidence),
            ladder_step: env_checked(ENV_LADDER_STEP, DEFAULT_LADDER_STEP, is_ladder_step),
            tries: env_or(ENV_TRIES, DEFAULT_TRIES),
            retry_delay: Duration::from_millis(env_or(ENV_RETRY_DELAY, DEFAULT_RETRY_DELAY_MS)),
            ..Self::defaults()
        }
    }

    pub fn defaults() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            account_confidence: DEFAULT_ACCOUNT_CONFIDENCE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            ladder_step: DEFAULT_LADDER_STEP,
            tries: DEFAULT_TRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            day_tries: DEFAULT_DAY_TRIES,
            day_delay: Duration::from_millis(DEFAULT_DAY_DELAY_MS),
            switch_tries: DEFAULT_SWITCH_TRIES,
            switch_delay: Duration::from_millis(DEFAULT_SWITCH_DELAY_MS),
        }
    }
}

impl WorkflowSettings {
    pub fn from_env() -> Self {
        Self {
            open_offset_x: env_or(ENV_OPEN_OFFSET_X, DEFAULT_OPEN_OFFSET_X),
            scroll_amount: env_or(ENV_SCROLL, DEFAULT_SCROLL),
            ..Self::defaults()
        }
    }

    pub fn defaults() -> Self {
        Self {
            open_offset_x: DEFAULT_OPEN_OFFSET_X,
            open_settle: Duration::from_millis(DEFAULT_OPEN_SETTLE_MS),
            scroll_amount: DEFAULT_SCROLL,
            scroll_settle: Duration::from_millis(DEFAULT_SCROLL_SETTLE_MS),
            download_wait: Duration::from_millis(DEFAULT_DOWNLOAD_WAIT_MS),
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            inter_account_delay: Duration::from_millis(env_or(
                ENV_INTER_ACCOUNT,
                DEFAULT_INTER_ACCOUNT_MS,
            )),
            countdown: Duration::from_secs(env_or(ENV_COUNTDOWN, DEFAULT_COUNTDOWN_SECS)),
            output_dir: env::var(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            download_dir: env::var(ENV_DOWNLOAD_DIR)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            download_timeout: Duration::from_secs(env_or(
                ENV_DOWNLOAD_TIMEOUT,
                DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            )),
            max_consecutive_faults: env_or(ENV_MAX_FAULTS, DEFAULT_MAX_FAULTS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            inter_account_delay: Duration::from_millis(DEFAULT_INTER_ACCOUNT_MS),
            countdown: Duration::from_secs(DEFAULT_COUNTDOWN_SECS),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            download_dir: None,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_consecutive_faults: DEFAULT_MAX_FAULTS,
        }
    }
}

// ============================================================================
// Account list
// ============================================================================

/// Errors loading the account list
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read account list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("account list {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("account list is empty")]
    Empty,

    #[error("account label '{0}' appears more than once")]
    DuplicateLabel(String),

    #[error("labels '{first}' and '{second}' map to the same template name '{name}'")]
    AmbiguousTarget {
        first: String,
        second: String,
        name: String,
    },
}

/// Load and validate the ordered account list from a JSON array
pub fn load_accounts(
    path: &Path,
    label_prefix: &str,
) -> Result<Vec<AccountDescriptor>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let accounts: Vec<AccountDescriptor> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_accounts(&accounts, label_prefix)?;
    Ok(accounts)
}

/// Each label must be unique and must determine exactly one template name
pub fn validate_accounts(
    accounts: &[AccountDescriptor],
    label_prefix: &str,
) -> Result<(), ConfigError> {
    if accounts.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut labels = HashSet::new();
    // every spelling the catalog may try, with the label that owns it
    let mut spellings: Vec<(String, &str)> = Vec::new();
    for account in accounts {
        if !labels.insert(account.label.as_str()) {
            return Err(ConfigError::DuplicateLabel(account.label.clone()));
        }
        let variants = name_variants(&account.target_name(label_prefix));
        for variant in &variants {
            if let Some((_, first)) = spellings.iter().find(|(s, _)| s == variant) {
                return Err(ConfigError::AmbiguousTarget {
                    first: first.to_string(),
                    second: account.label.clone(),
                    name: variant.clone(),
                });
            }
        }
        spellings.extend(variants.into_iter().map(|v| (v, account.label.as_str())));
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Like [`env_or`], but values rejected by `valid` also fall back, with a warning
fn env_checked<T>(name: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + fmt::Display,
{
    checked(name, env::var(name).ok().as_deref(), default, valid)
}

fn checked<T>(name: &str, raw: Option<&str>, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            warn!(variable = name, %value, %default, "setting out of range; using default");
            default
        }
        Err(_) => {
            warn!(variable = name, raw, %default, "setting is not a number; using default");
            default
        }
    }
}

/// A finite match score in `0.0..=1.0`
fn is_confidence(value: &f32) -> bool {
    (0.0..=1.0).contains(value)
}

/// A finite, positive decrement no larger than the whole scale
fn is_ladder_step(value: &f32) -> bool {
    *value > 0.0 && *value <= 1.0
}
