pub mod download;
pub mod machine;
pub mod types;

pub use download::{DownloadWatch, archive_name, is_finished_download};
pub use machine::AccountWorkflow;
pub use types::{
    AccountDescriptor, AccountFailure, AccountReport, FailureReason, StepAction, StepTarget,
    WorkflowPlan, WorkflowState, WorkflowStep, end_day_names,
};
