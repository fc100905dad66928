//! The run orchestrator: every configured account, one after another.
//!
//! Failures never cross the account boundary. Whatever happens inside one
//! account's workflow (a missing control, a dead input device, a panic) is
//! recorded in the [`RunSummary`] and the next account is attempted. Only the
//! pre-flight asset check, operator cancellation and a streak of interaction
//! faults stop a run early.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::input::Desktop;
use crate::resolver::Resolver;
use crate::workflow::{
    AccountDescriptor, AccountFailure, AccountReport, AccountWorkflow, DownloadWatch,
    FailureReason, WorkflowPlan, WorkflowState, end_day_names,
};

/// Errors that stop a run before or outside the account loop
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Required targets have no usable template file
    #[error("missing template assets for: {}", .missing.join(", "))]
    ConfigurationDefect { missing: Vec<String> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cooperative cancellation flag, checked between accounts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One failed account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAccount {
    pub account: AccountDescriptor,
    pub state: WorkflowState,
    pub reason: FailureReason,
    /// Human-readable reason
    pub message: String,
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedAccount>,
    /// Best-effort step failures, prefixed with the account label
    pub warnings: Vec<String>,
    pub reports: Vec<AccountReport>,
    /// Stopped early by the operator
    pub cancelled: bool,
    /// Why the run was halted, if it was
    pub halted: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            reports: Vec::new(),
            cancelled: false,
            halted: None,
            started_at: Local::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, report: AccountReport) {
        self.attempted += 1;
        for warning in &report.warnings {
            self.warnings.push(format!("{}: {}", report.account.label, warning));
        }
        match (&report.failure, report.is_success()) {
            (None, true) => self.succeeded += 1,
            (failure, _) => {
                self.failed += 1;
                let failure = failure.clone().unwrap_or(AccountFailure {
                    state: report.final_state,
                    reason: FailureReason::Unexpected {
                        message: "workflow ended without reaching DONE".to_string(),
                    },
                });
                self.failures.push(FailedAccount {
                    account: report.account.clone(),
                    state: failure.state,
                    message: failure.reason.to_string(),
                    reason: failure.reason,
                });
            }
        }
        self.reports.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled && self.halted.is_none()
    }

    /// Emit the end-of-run report
    pub fn log(&self) {
        info!(
            attempted = self.attempted,
            succeeded = self.succeeded,
            failed = self.failed,
            cancelled = self.cancelled,
            "run finished"
        );
        for failure in &self.failures {
            warn!(
                account = %failure.account.label,
                state = %failure.state,
                reason = %failure.message,
                "account failed"
            );
        }
        for warning in &self.warnings {
            warn!(%warning, "run warning");
        }
        if let Some(reason) = &self.halted {
            error!(%reason, "run halted");
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequences accounts through the workflow
pub struct Orchestrator {
    plan: WorkflowPlan,
    resolver: Resolver,
    download: Option<DownloadWatch>,
    inter_account_delay: Duration,
    max_consecutive_faults: u32,
    cancel: CancelToken,
    clock: Box<dyn Fn() -> NaiveDate>,
}

impl Orchestrator {
    pub fn new(config: &Config, resolver: Resolver) -> Self {
        let download = config
            .run
            .download_dir
            .as_ref()
            .map(|dir| DownloadWatch::new(dir, config.run.download_timeout));
        Self {
            plan: WorkflowPlan::from_config(config),
            resolver,
            download,
            inter_account_delay: config.run.inter_account_delay,
            max_consecutive_faults: config.run.max_consecutive_faults,
            cancel: CancelToken::new(),
            clock: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the wall clock used to pick the calendar end day
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_download_watch(mut self, watch: Option<DownloadWatch>) -> Self {
        self.download = watch;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &WorkflowPlan {
        &self.plan
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Fail when any required control has no usable template file
    pub fn preflight(&self) -> Result<(), RunError> {
        let catalog = self.resolver.catalog();
        let missing: Vec<String> = self
            .plan
            .required_targets()
            .into_iter()
            .filter(|name| catalog.resolve_candidates(name).is_empty())
            .collect();

        for name in self.plan.optional_targets() {
            if catalog.resolve_candidates(&name).is_empty() {
                warn!(target_name = %name, "best-effort target has no template file");
            }
        }

        let today = (self.clock)();
        let day_names = end_day_names(today.day());
        if day_names.iter().all(|name| catalog.resolve_candidates(name).is_empty()) {
            warn!(names = ?day_names, "no template for today's calendar day; every account will fail at SELECT_END_DAY");
        }

        if missing.is_empty() {
            info!("pre-flight asset check passed");
            Ok(())
        } else {
            error!(missing = ?missing, "pre-flight asset check failed");
            Err(RunError::ConfigurationDefect { missing })
        }
    }

    /// Run every account in order and report the aggregate outcome
    #[instrument(name = "run", skip_all, fields(accounts = accounts.len()))]
    pub fn run(
        &self,
        desktop: &mut Desktop,
        accounts: &[AccountDescriptor],
    ) -> Result<RunSummary, RunError> {
        self.preflight()?;

        let mut summary = RunSummary::new();
        let mut consecutive_faults = 0u32;

        for (idx, account) in accounts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = accounts.len() - idx, "run cancelled by operator");
                summary.cancelled = true;
                break;
            }
            if idx > 0 {
                desktop.wait(self.inter_account_delay);
            }

            info!(account = %account.label, position = idx + 1, total = accounts.len(), "processing account");
            let report = self.run_account(desktop, account);

            let fault = report
                .failure
                .as_ref()
                .is_some_and(|f| f.reason.is_interaction_fault());
            consecutive_faults = if fault { consecutive_faults + 1 } else { 0 };
            summary.record(report);

            if self.max_consecutive_faults > 0
                && consecutive_faults >= self.max_consecutive_faults
            {
                let reason = format!(
                    "{} consecutive accounts hit interaction faults; the input or capture device looks unusable",
                    consecutive_faults
                );
                error!(%reason, "halting run");
                summary.halted = Some(reason);
                break;
            }
        }

        summary.finish();
        summary.log();
        Ok(summary)
    }

    /// One account, with panics turned into an `Unexpected` failure
    fn run_account(&self, desktop: &mut Desktop, account: &AccountDescriptor) -> AccountReport {
        let today = (self.clock)();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            AccountWorkflow::new(&self.plan, &self.resolver, account, today)
                .with_download_watch(self.download.as_ref())
                .run(desktop)
        }));

        outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(account = %account.label, %message, "workflow panicked");
            let mut report = AccountReport::new(account.clone());
            report.final_state = WorkflowState::Aborted;
            report.failure = Some(AccountFailure {
                state: WorkflowState::Aborted,
                reason: FailureReason::Unexpected { message },
            });
            report
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report(label: &str, failure: Option<AccountFailure>) -> AccountReport {
        let mut report = AccountReport::new(AccountDescriptor::new(label, label, "out"));
        report.final_state = if failure.is_some() {
            WorkflowState::Aborted
        } else {
            WorkflowState::Done
        };
        report.failure = failure;
        report
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::new();
        summary.record(report("Conta 1", None));
        summary.record(report(
            "Conta 2",
            Some(AccountFailure {
                state: WorkflowState::LocateAccount,
                reason: FailureReason::AccountNotVisible { no_candidate: false },
            }),
        ));

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].message, "account not visible");
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_collects_warnings() {
        let mut ok = report("Conta 1", None);
        ok.warnings.push("RETURN_TO_LIST: target not found".to_string());
        let mut summary = RunSummary::new();
        summary.record(ok);

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.warnings, vec!["Conta 1: RETURN_TO_LIST: target not found"]);
    }

    #[test]
    fn test_summary_serializes() {
        let mut summary = RunSummary::new();
        summary.record(report("Conta 1", None));
        summary.finish();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["attempted"], 1);
        assert!(json["finished_at"].is_string());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[test]
    fn test_configuration_defect_message() {
        let err = RunError::ConfigurationDefect {
            missing: vec!["extrato".to_string(), "periodo".to_string()],
        };
        assert_eq!(err.to_string(), "missing template assets for: extrato, periodo");
    }
}
