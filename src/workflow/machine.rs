//! The per-account state machine.
//!
//! An [`AccountWorkflow`] walks the plan's steps strictly in order. A fatal
//! step failure moves the machine to `ABORTED` and nothing after it runs, so
//! no click is ever issued past an abort. A best-effort step failure is kept
//! as a warning. Each account gets a fresh machine.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::input::Desktop;
use crate::resolver::{Lookup, Resolver, ScreenMatch};
use crate::screen::Point;

use super::download::DownloadWatch;
use super::types::{
    AccountDescriptor, AccountFailure, AccountReport, FailureReason, StepAction, StepTarget,
    WorkflowPlan, WorkflowState, WorkflowStep,
};

/// Runs one account through a [`WorkflowPlan`]
pub struct AccountWorkflow<'a> {
    plan: &'a WorkflowPlan,
    resolver: &'a Resolver,
    download: Option<&'a DownloadWatch>,
    today: NaiveDate,
    state: WorkflowState,
    anchor: Option<Point>,
    baseline: HashSet<PathBuf>,
    report: AccountReport,
}

impl<'a> AccountWorkflow<'a> {
    /// `today` picks the calendar end day; callers read the clock per account
    pub fn new(
        plan: &'a WorkflowPlan,
        resolver: &'a Resolver,
        account: &AccountDescriptor,
        today: NaiveDate,
    ) -> Self {
        Self {
            plan,
            resolver,
            download: None,
            today,
            state: WorkflowState::LocateAccount,
            anchor: None,
            baseline: HashSet::new(),
            report: AccountReport::new(account.clone()),
        }
    }

    /// Confirm exports by watching the download directory
    pub fn with_download_watch(mut self, watch: Option<&'a DownloadWatch>) -> Self {
        self.download = watch;
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Drive the account to `DONE` or `ABORTED`
    #[instrument(name = "account", skip_all, fields(account = %self.report.account.label))]
    pub fn run(mut self, desktop: &mut Desktop) -> AccountReport {
        info!(today = %self.today, "starting account workflow");
        match self.drive(desktop) {
            Ok(()) => {
                self.transition(WorkflowState::Done);
                info!(warnings = self.report.warnings.len(), "account exported");
            }
            Err(failure) => {
                warn!(state = %failure.state, reason = %failure.reason, "account aborted");
                self.transition(WorkflowState::Aborted);
                self.report.failure = Some(failure);
            }
        }
        self.report.final_state = self.state;
        self.report
    }

    fn drive(&mut self, desktop: &mut Desktop) -> Result<(), AccountFailure> {
        let plan = self.plan;
        for step in &plan.steps {
            self.transition(step.state);
            match self.execute(desktop, step) {
                Ok(()) => {}
                Err(reason) if !step.fatal => {
                    warn!(state = %step.state, %reason, "best-effort step failed; continuing");
                    self.report.warnings.push(format!("{}: {}", step.state, reason));
                }
                Err(reason) => {
                    return Err(AccountFailure {
                        state: step.state,
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    fn transition(&mut self, to: WorkflowState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "state transition");
        }
        self.state = to;
    }

    fn execute(&mut self, desktop: &mut Desktop, step: &WorkflowStep) -> Result<(), FailureReason> {
        if step.state == WorkflowState::ConfirmExport {
            if let Some(watch) = self.download {
                self.baseline = watch.snapshot();
            }
        }

        match &step.action {
            StepAction::Locate(target) => {
                let hit = self.resolve(desktop, step, target)?;
                self.anchor = Some(hit.location);
            }
            StepAction::ClickAnchor(offset) => {
                let anchor = self.anchor.ok_or_else(|| FailureReason::Unexpected {
                    message: format!("{} reached without a located anchor", step.state),
                })?;
                desktop.click_offset(anchor, *offset)?;
            }
            StepAction::Click(target) => {
                let hit = self.resolve(desktop, step, target)?;
                desktop.click(hit.location)?;
            }
            StepAction::Scroll(amount) => desktop.scroll(*amount)?,
            StepAction::AwaitDownload => {
                if let Some(watch) = self.download {
                    let saved = watch.await_artifact(
                        desktop,
                        &self.baseline,
                        &self.report.account.file_stem,
                        self.today,
                    )?;
                    self.report.artifact = Some(saved);
                    return Ok(());
                }
            }
        }

        desktop.wait(step.settle);
        Ok(())
    }

    /// Try each name the target expands to; the first hit wins
    fn resolve(
        &mut self,
        desktop: &mut Desktop,
        step: &WorkflowStep,
        target: &StepTarget,
    ) -> Result<ScreenMatch, FailureReason> {
        let names = target.names(&self.report.account, &self.plan.label_prefix, self.today);
        let primary = names.first().cloned().unwrap_or_default();
        let mut last_miss = None;

        for name in &names {
            match self.resolver.locate(desktop, name, &step.policy) {
                Ok(Lookup::Found(hit)) => {
                    if *name != primary {
                        info!(target_name = %primary, fallback = %name, "matched through fallback name");
                    }
                    self.report.matches.push(hit.clone());
                    return Ok(hit);
                }
                Ok(Lookup::NotFound(miss)) => last_miss = Some(miss),
                Ok(Lookup::NoCandidate { .. }) => {}
                Err(e) => {
                    return Err(FailureReason::InteractionFault {
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(match (target, last_miss) {
            (StepTarget::AccountLabel, miss) => FailureReason::AccountNotVisible {
                no_candidate: miss.is_none(),
            },
            (_, Some(miss)) => FailureReason::TargetNotFound {
                target: primary,
                lowest_confidence: miss.lowest_confidence,
                diagnostic: miss.diagnostic,
            },
            (_, None) => FailureReason::MissingAsset { target: primary },
        })
    }
}
