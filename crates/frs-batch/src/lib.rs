#![deny(missing_docs)]
#![doc = "Batch dispatch, stage gating and resubmission planning."]

/// Persisted submission descriptors.
pub mod descriptor;
/// Grouping and submission of synthesized tasks.
pub mod dispatch;
pub mod gate;
pub mod resubmit;
pub mod scheduler;

pub use descriptor::{
    load_descriptors, ResourceSpec, SubmissionDescriptor, SubmissionRow, SubmitSettings,
    SUBMISSIONS_DIR,
};
pub use dispatch::{dispatch, group_tasks, ClusterSubmission, DispatchReceipt, DispatchedTask};
pub use gate::{StageGate, StageProgress, TaskState};
pub use resubmit::{
    execute, plan_all, plan_resubmission, recover_arguments, rotated_path, RecoveredTask,
    RecoverySkip, ResubmissionPlan, ResubmissionReceipt,
};
pub use scheduler::{
    render_condor_submit, render_qsub_script, write_job_script, CancelOutcome, ClusterId,
    CondorScheduler, DryRunScheduler, QsubScheduler, Scheduler, SchedulerEvent, SchedulerSpec,
};
