// Types describing one account's export workflow and its outcome

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::account_target_name;
use crate::config::Config;
use crate::input::{InputError, Offset};
use crate::resolver::{RetryPolicy, ScreenMatch};

/// Statement tab
pub const TARGET_STATEMENT: &str = "extrato";
/// Period tab
pub const TARGET_PERIOD: &str = "periodo";
/// First day of the calendar widget
pub const TARGET_START_DAY: &str = "1";
/// Export button below the statement
pub const TARGET_EXPORT: &str = "exportar-extrato";
/// Spreadsheet format radio button
pub const TARGET_FORMAT: &str = "radio-button-xls";
/// Export confirmation button
pub const TARGET_CONFIRM: &str = "exportar-extrato-final";
/// Switch-account control that returns to the list
pub const TARGET_SWITCH_ACCOUNT: &str = "trocar-conta";

/// Position of one account in its export workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    LocateAccount,
    OpenAccount,
    OpenStatement,
    OpenPeriod,
    SelectStartDay,
    SelectEndDay,
    ScrollToExport,
    OpenExport,
    SelectFormat,
    ConfirmExport,
    AwaitDownload,
    ReturnToList,
    Done,
    Aborted,
}

impl WorkflowState {
    /// The linear path from the initial state to `Done`
    pub const SEQUENCE: [WorkflowState; 13] = [
        WorkflowState::LocateAccount,
        WorkflowState::OpenAccount,
        WorkflowState::OpenStatement,
        WorkflowState::OpenPeriod,
        WorkflowState::SelectStartDay,
        WorkflowState::SelectEndDay,
        WorkflowState::ScrollToExport,
        WorkflowState::OpenExport,
        WorkflowState::SelectFormat,
        WorkflowState::ConfirmExport,
        WorkflowState::AwaitDownload,
        WorkflowState::ReturnToList,
        WorkflowState::Done,
    ];

    /// Successor on the success path; `None` for terminal states
    pub fn next(self) -> Option<Self> {
        let idx = Self::SEQUENCE.iter().position(|s| *s == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::LocateAccount => "LOCATE_ACCOUNT",
            WorkflowState::OpenAccount => "OPEN_ACCOUNT",
            WorkflowState::OpenStatement => "OPEN_STATEMENT",
            WorkflowState::OpenPeriod => "OPEN_PERIOD",
            WorkflowState::SelectStartDay => "SELECT_START_DAY",
            WorkflowState::SelectEndDay => "SELECT_END_DAY",
            WorkflowState::ScrollToExport => "SCROLL_TO_EXPORT",
            WorkflowState::OpenExport => "OPEN_EXPORT",
            WorkflowState::SelectFormat => "SELECT_FORMAT",
            WorkflowState::ConfirmExport => "CONFIRM_EXPORT",
            WorkflowState::AwaitDownload => "AWAIT_DOWNLOAD",
            WorkflowState::ReturnToList => "RETURN_TO_LIST",
            WorkflowState::Done => "DONE",
            WorkflowState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One account to export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDescriptor {
    /// Label exactly as the portal renders it, e.g. "Conta 41930-3"
    pub label: String,
    /// Internal identifier
    pub id: String,
    /// Stem of the exported file name, e.g. "Sicoob_41930"
    pub file_stem: String,
    /// Company the account belongs to, for reports only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl AccountDescriptor {
    pub fn new(
        label: impl Into<String>,
        id: impl Into<String>,
        file_stem: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
            file_stem: file_stem.into(),
            company: None,
        }
    }

    /// Logical template name of this account's on-screen label
    pub fn target_name(&self, label_prefix: &str) -> String {
        account_target_name(&self.label, label_prefix)
    }
}

/// What a step looks for on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    /// The current account's label
    AccountLabel,
    /// A fixed control
    Named(String),
    /// Today's day number in the calendar widget, with naming fallbacks
    CurrentDay,
}

impl StepTarget {
    pub fn named(name: &str) -> Self {
        StepTarget::Named(name.to_string())
    }

    /// Logical names to try, in order
    pub fn names(
        &self,
        account: &AccountDescriptor,
        label_prefix: &str,
        today: NaiveDate,
    ) -> Vec<String> {
        match self {
            StepTarget::AccountLabel => vec![account.target_name(label_prefix)],
            StepTarget::Named(name) => vec![name.clone()],
            StepTarget::CurrentDay => end_day_names(today.day()),
        }
    }
}

/// Names tried for a calendar day: plain, zero-padded, `_alt`, `dia_` prefix
pub fn end_day_names(day: u32) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(4);
    for name in [
        day.to_string(),
        format!("{:02}", day),
        format!("{}_alt", day),
        format!("dia_{}", day),
    ] {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// What a step does once entered
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Resolve the target and remember where it is
    Locate(StepTarget),
    /// Click at a fixed offset from the last located anchor
    ClickAnchor(Offset),
    /// Resolve the target and click it
    Click(StepTarget),
    /// Scroll by a fixed amount, unverified
    Scroll(i32),
    /// Fixed wait, or the download watch when one is configured
    AwaitDownload,
}

/// One ordered unit of the per-account sequence
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub state: WorkflowState,
    pub action: StepAction,
    /// Confidence, tries and delay for steps that resolve a target
    pub policy: RetryPolicy,
    /// Wait after the action completes
    pub settle: Duration,
    /// Failure aborts the account when set; otherwise it is only a warning
    pub fatal: bool,
}

impl WorkflowStep {
    pub fn target(&self) -> Option<&StepTarget> {
        match &self.action {
            StepAction::Locate(target) | StepAction::Click(target) => Some(target),
            _ => None,
        }
    }
}

/// The step template every account runs through
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPlan {
    pub steps: Vec<WorkflowStep>,
    pub label_prefix: String,
}

impl WorkflowPlan {
    /// Build the standard export sequence from the run configuration
    pub fn from_config(config: &Config) -> Self {
        let steps = WorkflowState::SEQUENCE
            .iter()
            .filter(|state| !state.is_terminal())
            .map(|state| step_for(*state, config))
            .collect();
        Self {
            steps,
            label_prefix: config.assets.label_prefix.clone(),
        }
    }

    pub fn step(&self, state: WorkflowState) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.state == state)
    }

    /// Fixed targets whose absence makes every account fail
    pub fn required_targets(&self) -> Vec<String> {
        self.named_targets(true)
    }

    /// Fixed targets of best-effort steps
    pub fn optional_targets(&self) -> Vec<String> {
        self.named_targets(false)
    }

    fn named_targets(&self, fatal: bool) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| step.fatal == fatal)
            .filter_map(|step| match step.target() {
                Some(StepTarget::Named(name)) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

fn step_for(state: WorkflowState, config: &Config) -> WorkflowStep {
    let m = &config.matching;
    let w = &config.workflow;
    let control = RetryPolicy::new(m.confidence, m.tries, m.retry_delay);
    let calendar = RetryPolicy::new(m.confidence, m.day_tries, m.day_delay);

    let (action, policy, settle, fatal) = match state {
        WorkflowState::LocateAccount => (
            StepAction::Locate(StepTarget::AccountLabel),
            RetryPolicy::new(m.account_confidence, m.tries, m.retry_delay),
            Duration::ZERO,
            true,
        ),
        WorkflowState::OpenAccount => (
            StepAction::ClickAnchor(Offset::horizontal(w.open_offset_x)),
            control,
            w.open_settle,
            true,
        ),
        WorkflowState::OpenStatement => click(TARGET_STATEMENT, control),
        WorkflowState::OpenPeriod => click(TARGET_PERIOD, control),
        WorkflowState::SelectStartDay => click(TARGET_START_DAY, calendar),
        WorkflowState::SelectEndDay => (
            StepAction::Click(StepTarget::CurrentDay),
            calendar,
            calendar.delay,
            true,
        ),
        WorkflowState::ScrollToExport => (
            StepAction::Scroll(w.scroll_amount),
            control,
            w.scroll_settle,
            true,
        ),
        WorkflowState::OpenExport => click(TARGET_EXPORT, control),
        WorkflowState::SelectFormat => click(TARGET_FORMAT, control),
        WorkflowState::ConfirmExport => click(TARGET_CONFIRM, control),
        WorkflowState::AwaitDownload => (StepAction::AwaitDownload, control, w.download_wait, true),
        WorkflowState::ReturnToList | WorkflowState::Done | WorkflowState::Aborted => {
            let switch = RetryPolicy::new(m.confidence, m.switch_tries, m.switch_delay);
            let (action, policy, settle, _) = click(TARGET_SWITCH_ACCOUNT, switch);
            (action, policy, settle, false)
        }
    };

    WorkflowStep {
        state,
        action,
        policy,
        settle,
        fatal,
    }
}

/// Resolve-and-click step that settles for its retry delay afterwards
fn click(name: &str, policy: RetryPolicy) -> (StepAction, RetryPolicy, Duration, bool) {
    (
        StepAction::Click(StepTarget::named(name)),
        policy,
        policy.delay,
        true,
    )
}

/// Why an account's workflow stopped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The account label was not found, or has no template file
    AccountNotVisible { no_candidate: bool },
    /// A control's template exists but was not seen on screen
    TargetNotFound {
        target: String,
        lowest_confidence: f32,
        diagnostic: Option<PathBuf>,
    },
    /// A control has no usable template file
    MissingAsset { target: String },
    /// The input device or screen capture failed
    InteractionFault { message: String },
    /// The download watch saw no exported file in time
    ArtifactMissing { dir: PathBuf, waited_secs: u64 },
    /// Anything else, including panics
    Unexpected { message: String },
}

impl FailureReason {
    pub fn is_interaction_fault(&self) -> bool {
        matches!(self, FailureReason::InteractionFault { .. })
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AccountNotVisible { no_candidate } => {
                write!(f, "account not visible")?;
                if *no_candidate {
                    write!(f, " (no template asset)")?;
                }
                Ok(())
            }
            FailureReason::TargetNotFound {
                target,
                lowest_confidence,
                ..
            } => write!(
                f,
                "target '{}' not found on screen (down to confidence {:.2})",
                target, lowest_confidence
            ),
            FailureReason::MissingAsset { target } => {
                write!(f, "no usable template file for '{}'", target)
            }
            FailureReason::InteractionFault { message } => {
                write!(f, "interaction fault: {}", message)
            }
            FailureReason::ArtifactMissing { dir, waited_secs } => write!(
                f,
                "no exported file appeared in {} within {}s",
                dir.display(),
                waited_secs
            ),
            FailureReason::Unexpected { message } => write!(f, "unexpected fault: {}", message),
        }
    }
}

impl From<InputError> for FailureReason {
    fn from(e: InputError) -> Self {
        FailureReason::InteractionFault {
            message: e.to_string(),
        }
    }
}

/// A fatal step failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountFailure {
    /// State the workflow was in when it aborted
    pub state: WorkflowState,
    pub reason: FailureReason,
}

impl fmt::Display for AccountFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.reason)
    }
}

/// Result of running one account through the workflow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account: AccountDescriptor,
    /// `Done` or `Aborted`
    pub final_state: WorkflowState,
    pub failure: Option<AccountFailure>,
    /// Best-effort step failures
    pub warnings: Vec<String>,
    /// Exported file, when the download watch is enabled
    pub artifact: Option<PathBuf>,
    /// Every target hit, in order
    pub matches: Vec<ScreenMatch>,
}

impl AccountReport {
    pub fn new(account: AccountDescriptor) -> Self {
        Self {
            account,
            final_state: WorkflowState::LocateAccount,
            failure: None,
            warnings: Vec::new(),
            artifact: None,
            matches: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_state == WorkflowState::Done && self.failure.is_none()
    }
}
