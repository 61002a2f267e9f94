//! Scheduler backends.
//!
//! The core only submits and cancels; it never waits for a task to finish.
//! Every backend reports rejected or unreachable submissions as
//! [`FrsError::SchedulerUnavailable`] and never retries them.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use frs_core::{io_error, stable_hash_string, ErrorInfo, FrsError};
use frs_logs::{LogConvention, LogStream, TaskIds};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::descriptor::{SubmissionDescriptor, SubmissionRow};

static CONDOR_SUBMITTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<count>\d+) job\(s\) submitted to cluster (?P<cluster>\d+)")
        .expect("condor submit pattern")
});

static QSUB_TERSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?P<job>\d+)").expect("qsub job pattern"));

/// Identifier the scheduler assigns to one submission. Legacy schedulers
/// assign one per task and use it as the job id.
pub type ClusterId = u64;

/// Result of asking the scheduler to remove a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// The job was queued or running and has been removed.
    Removed,
    /// The scheduler no longer knows the job (it already left the queue).
    NotFound,
}

/// A batch scheduler the core can hand work to.
pub trait Scheduler {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Naming convention of the logs this scheduler writes.
    fn convention(&self) -> LogConvention;

    /// Cluster schedulers take many tasks in one submission; legacy ones
    /// take exactly one.
    fn supports_clusters(&self) -> bool {
        self.convention() == LogConvention::Cluster
    }

    /// Submits every row of `descriptor`. Row `i` becomes process `i`.
    /// Rows that already own log ids must write to exactly those files.
    fn submit(
        &mut self,
        descriptor: &SubmissionDescriptor,
        submit_dir: &Path,
    ) -> Result<ClusterId, FrsError>;

    /// Number of processes the scheduler accepted for `cluster`.
    fn process_count(&self, cluster: ClusterId) -> Result<usize, FrsError>;

    /// Removes one job from the queue.
    fn cancel(&mut self, job: TaskIds) -> Result<CancelOutcome, FrsError>;
}

/// Which backend a run uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchedulerSpec {
    /// HTCondor via `condor_submit` / `condor_rm`.
    Condor {
        /// Submit binary.
        #[serde(default = "SchedulerSpec::default_condor_submit")]
        submit_command: String,
        /// Removal binary.
        #[serde(default = "SchedulerSpec::default_condor_rm")]
        remove_command: String,
    },
    /// Grid Engine style `qsub` / `qdel`, one job per task.
    Qsub {
        /// Submit binary.
        #[serde(default = "SchedulerSpec::default_qsub")]
        submit_command: String,
        /// Removal binary.
        #[serde(default = "SchedulerSpec::default_qdel")]
        remove_command: String,
    },
    /// Records submissions without running anything.
    DryRun {
        /// Convention the recorded submissions pretend to follow.
        #[serde(default = "SchedulerSpec::default_dry_convention")]
        convention: LogConvention,
        /// First cluster id handed out.
        #[serde(default = "SchedulerSpec::default_first_cluster")]
        first_cluster: ClusterId,
    },
}

impl Default for SchedulerSpec {
    fn default() -> Self {
        SchedulerSpec::Condor {
            submit_command: Self::default_condor_submit(),
            remove_command: Self::default_condor_rm(),
        }
    }
}

impl SchedulerSpec {
    fn default_condor_submit() -> String {
        "condor_submit".to_string()
    }

    fn default_condor_rm() -> String {
        "condor_rm".to_string()
    }

    fn default_qsub() -> String {
        "qsub".to_string()
    }

    fn default_qdel() -> String {
        "qdel".to_string()
    }

    fn default_dry_convention() -> LogConvention {
        LogConvention::Cluster
    }

    fn default_first_cluster() -> ClusterId {
        1000
    }

    /// Instantiates the configured backend.
    pub fn build(&self) -> Box<dyn Scheduler> {
        match self {
            SchedulerSpec::Condor {
                submit_command,
                remove_command,
            } => Box::new(CondorScheduler::new(submit_command, remove_command)),
            SchedulerSpec::Qsub {
                submit_command,
                remove_command,
            } => Box::new(QsubScheduler::new(submit_command, remove_command)),
            SchedulerSpec::DryRun {
                convention,
                first_cluster,
            } => Box::new(DryRunScheduler::new(*convention, *first_cluster)),
        }
    }
}

/// Writes the wrapper every job runs: environment bootstrap, then the
/// executable with the job's arguments.
///
/// The file name carries a digest of the executable and environment, so
/// queued jobs of an earlier submission keep their own wrapper.
pub fn write_job_script(
    descriptor: &SubmissionDescriptor,
    submit_dir: &Path,
) -> Result<PathBuf, FrsError> {
    fs::create_dir_all(submit_dir).map_err(|err| io_error("submit_dir", submit_dir, err))?;
    let digest = stable_hash_string(&(&descriptor.executable, &descriptor.settings.environment))?;
    let path = submit_dir.join(format!("{}_{}.job.sh", descriptor.basename, &digest[..12]));
    let mut script = String::from("#!/bin/bash\n");
    for line in &descriptor.settings.environment {
        script.push_str(line);
        script.push('\n');
    }
    let _ = writeln!(script, "exec {} \"$@\"", descriptor.executable);
    fs::write(&path, script).map_err(|err| io_error("job_script", &path, err))?;
    make_executable(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), FrsError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|err| io_error("job_script_mode", path, err))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), FrsError> {
    Ok(())
}

/// Renders an HTCondor submit file queueing one process per row.
///
/// Fresh rows let the scheduler name logs after `$(Cluster)_$(Process)`;
/// rows that already own log ids are pinned to those files.
pub fn render_condor_submit(descriptor: &SubmissionDescriptor, job_script: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# frscan submission: {}", descriptor.basename);
    let _ = writeln!(out, "universe = vanilla");
    let _ = writeln!(out, "executable = {}", job_script.display());
    let _ = writeln!(out, "should_transfer_files = NO");
    let resources = &descriptor.settings.resources;
    if let Some(memory) = resources.memory_mb {
        let _ = writeln!(out, "request_memory = {memory}");
    }
    if let Some(cpus) = resources.cpus {
        let _ = writeln!(out, "request_cpus = {cpus}");
    }
    if let Some(runtime) = resources.max_runtime_s {
        let _ = writeln!(out, "+MaxRuntime = {runtime}");
    }
    for (key, value) in &resources.extra {
        let _ = writeln!(out, "{key} = {value}");
    }

    let pinned = descriptor.pins_logs();
    let ids = if pinned {
        "$(logids)"
    } else {
        "$(Cluster)_$(Process)"
    };
    for (key, stream) in [
        ("output", LogStream::Out),
        ("error", LogStream::Err),
        ("log", LogStream::Log),
    ] {
        let _ = writeln!(out, "{key} = logs/$(stem)_{}_{ids}", stream.as_str());
    }
    if pinned {
        let _ = writeln!(out, "queue initialdir, stem, logids, arguments from (");
    } else {
        let _ = writeln!(out, "queue initialdir, stem, arguments from (");
    }
    for row in &descriptor.rows {
        let mut line = format!("{}, {}", row.work_dir.display(), row.basename);
        if let (true, Some(ids)) = (pinned, row.log_ids) {
            let _ = write!(line, ", {}_{}", ids.cluster, ids.process);
        }
        let _ = writeln!(out, "{line}, {}", row.arguments.join(" "));
    }
    out.push_str(")\n");
    out
}

/// Renders a Grid Engine job script for a single row.
pub fn render_qsub_script(
    descriptor: &SubmissionDescriptor,
    row: &SubmissionRow,
) -> String {
    let mut out = String::from("#!/bin/bash\n");
    let _ = writeln!(out, "#$ -N {}", row.basename);
    let _ = writeln!(out, "#$ -wd {}", row.work_dir.display());
    match row.log_paths(LogConvention::Legacy) {
        Some(paths) => {
            let _ = writeln!(out, "#$ -o {}", paths.out.display());
            let _ = writeln!(out, "#$ -e {}", paths.err.display());
        }
        None => {
            let _ = writeln!(out, "#$ -o {}", row.log_dir().display());
            let _ = writeln!(out, "#$ -e {}", row.log_dir().display());
        }
    }
    let resources = &descriptor.settings.resources;
    if let Some(memory) = resources.memory_mb {
        let _ = writeln!(out, "#$ -l h_vmem={memory}M");
    }
    if let Some(runtime) = resources.max_runtime_s {
        let _ = writeln!(out, "#$ -l h_rt={runtime}");
    }
    for (key, value) in &resources.extra {
        let _ = writeln!(out, "#$ -l {key}={value}");
    }
    for line in &descriptor.settings.environment {
        out.push_str(line);
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "exec {} {}",
        descriptor.executable,
        row.arguments.join(" ")
    );
    out
}

fn run_command(program: &str, args: &[String], cwd: &Path) -> Result<Output, FrsError> {
    debug!(program, ?args, "invoking scheduler");
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|err| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("scheduler_spawn", err.to_string())
                    .with_context("program", program)
                    .with_hint("check that the scheduler client is installed and on PATH"),
            )
        })
}

fn rejected(program: &str, output: &Output) -> FrsError {
    FrsError::SchedulerUnavailable(
        ErrorInfo::new("scheduler_rejected", String::from_utf8_lossy(&output.stderr).trim())
            .with_context("program", program)
            .with_context("status", output.status.to_string()),
    )
}

fn looks_not_found(output: &Output) -> bool {
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
    .to_lowercase();
    text.contains("not found") || text.contains("couldn't find") || text.contains("does not exist")
}

fn rename_submit_file(pending: &Path, dir: &Path, basename: &str, cluster: ClusterId, ext: &str) {
    let target = dir.join(format!("{basename}_{cluster}.{ext}"));
    // The pending name is still usable if the rename fails.
    if let Err(err) = fs::rename(pending, &target) {
        debug!(error = %err, file = %pending.display(), "kept pending submit file name");
    }
}

/// HTCondor backend.
#[derive(Debug, Clone)]
pub struct CondorScheduler {
    submit_command: String,
    remove_command: String,
    accepted: BTreeMap<ClusterId, usize>,
}

impl CondorScheduler {
    /// Backend invoking the given binaries.
    pub fn new(submit_command: &str, remove_command: &str) -> Self {
        Self {
            submit_command: submit_command.to_string(),
            remove_command: remove_command.to_string(),
            accepted: BTreeMap::new(),
        }
    }

    /// Parses `N job(s) submitted to cluster C.` into `(C, N)`.
    pub fn parse_submit_output(stdout: &str) -> Option<(ClusterId, usize)> {
        let caps = CONDOR_SUBMITTED_RE.captures(stdout)?;
        Some((caps["cluster"].parse().ok()?, caps["count"].parse().ok()?))
    }
}

impl Scheduler for CondorScheduler {
    fn name(&self) -> &'static str {
        "condor"
    }

    fn convention(&self) -> LogConvention {
        LogConvention::Cluster
    }

    fn submit(
        &mut self,
        descriptor: &SubmissionDescriptor,
        submit_dir: &Path,
    ) -> Result<ClusterId, FrsError> {
        let script = write_job_script(descriptor, submit_dir)?;
        let pending = submit_dir.join(format!("{}_pending.sub", descriptor.basename));
        fs::write(&pending, render_condor_submit(descriptor, &script))
            .map_err(|err| io_error("submit_file", &pending, err))?;
        let output = run_command(
            &self.submit_command,
            &[pending.display().to_string()],
            submit_dir,
        )?;
        if !output.status.success() {
            return Err(rejected(&self.submit_command, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (cluster, count) = Self::parse_submit_output(&stdout).ok_or_else(|| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("scheduler_reply", "could not find a cluster id in the reply")
                    .with_context("program", self.submit_command.as_str())
                    .with_context("stdout", stdout.trim()),
            )
        })?;
        rename_submit_file(&pending, submit_dir, &descriptor.basename, cluster, "sub");
        self.accepted.insert(cluster, count);
        info!(cluster, processes = count, executable = %descriptor.executable, "condor accepted submission");
        Ok(cluster)
    }

    fn process_count(&self, cluster: ClusterId) -> Result<usize, FrsError> {
        self.accepted.get(&cluster).copied().ok_or_else(|| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("cluster_unknown", "cluster was not submitted by this run")
                    .with_context("cluster", cluster.to_string()),
            )
        })
    }

    fn cancel(&mut self, job: TaskIds) -> Result<CancelOutcome, FrsError> {
        let output = run_command(&self.remove_command, &[job.to_string()], Path::new("."))?;
        if output.status.success() {
            return Ok(CancelOutcome::Removed);
        }
        if looks_not_found(&output) {
            return Ok(CancelOutcome::NotFound);
        }
        Err(rejected(&self.remove_command, &output))
    }
}

/// Grid Engine backend. Each submission carries exactly one row and the
/// returned id is the job id.
#[derive(Debug, Clone)]
pub struct QsubScheduler {
    submit_command: String,
    remove_command: String,
    accepted: BTreeMap<ClusterId, usize>,
}

impl QsubScheduler {
    /// Backend invoking the given binaries.
    pub fn new(submit_command: &str, remove_command: &str) -> Self {
        Self {
            submit_command: submit_command.to_string(),
            remove_command: remove_command.to_string(),
            accepted: BTreeMap::new(),
        }
    }

    /// Parses the job id printed by `qsub -terse`.
    pub fn parse_submit_output(stdout: &str) -> Option<ClusterId> {
        QSUB_TERSE_RE.captures(stdout)?["job"].parse().ok()
    }
}

impl Scheduler for QsubScheduler {
    fn name(&self) -> &'static str {
        "qsub"
    }

    fn convention(&self) -> LogConvention {
        LogConvention::Legacy
    }

    fn submit(
        &mut self,
        descriptor: &SubmissionDescriptor,
        submit_dir: &Path,
    ) -> Result<ClusterId, FrsError> {
        let [row] = descriptor.rows.as_slice() else {
            return Err(frs_core::config_error(
                "qsub_rows",
                format!(
                    "legacy submissions carry one task, got {}",
                    descriptor.rows.len()
                ),
            ));
        };
        fs::create_dir_all(submit_dir).map_err(|err| io_error("submit_dir", submit_dir, err))?;
        let pending = submit_dir.join(format!("{}_pending.qsub", descriptor.basename));
        fs::write(&pending, render_qsub_script(descriptor, row))
            .map_err(|err| io_error("submit_file", &pending, err))?;
        let output = run_command(
            &self.submit_command,
            &["-terse".to_string(), pending.display().to_string()],
            submit_dir,
        )?;
        if !output.status.success() {
            return Err(rejected(&self.submit_command, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job = Self::parse_submit_output(&stdout).ok_or_else(|| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("scheduler_reply", "could not find a job id in the reply")
                    .with_context("program", self.submit_command.as_str())
                    .with_context("stdout", stdout.trim()),
            )
        })?;
        rename_submit_file(&pending, submit_dir, &descriptor.basename, job, "qsub");
        self.accepted.insert(job, 1);
        info!(job, point = %row.point_id, "qsub accepted job");
        Ok(job)
    }

    fn process_count(&self, cluster: ClusterId) -> Result<usize, FrsError> {
        self.accepted.get(&cluster).copied().ok_or_else(|| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("job_unknown", "job was not submitted by this run")
                    .with_context("job", cluster.to_string()),
            )
        })
    }

    fn cancel(&mut self, job: TaskIds) -> Result<CancelOutcome, FrsError> {
        let output = run_command(
            &self.remove_command,
            &[job.cluster.to_string()],
            Path::new("."),
        )?;
        if output.status.success() {
            return Ok(CancelOutcome::Removed);
        }
        if looks_not_found(&output) {
            return Ok(CancelOutcome::NotFound);
        }
        Err(rejected(&self.remove_command, &output))
    }
}

/// Something a [`DryRunScheduler`] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A descriptor was accepted under the given cluster id.
    Submitted(ClusterId),
    /// A job was cancelled.
    Cancelled(TaskIds),
}

/// In-memory backend for rehearsals and tests. Hands out sequential cluster
/// ids and remembers every call.
#[derive(Debug, Clone)]
pub struct DryRunScheduler {
    convention: LogConvention,
    next_cluster: ClusterId,
    reject: bool,
    accepted: BTreeMap<ClusterId, usize>,
    /// Accepted descriptors with their cluster id filled in.
    pub submissions: Vec<SubmissionDescriptor>,
    /// Calls in the order they happened.
    pub events: Vec<SchedulerEvent>,
}

impl DryRunScheduler {
    /// Backend following `convention`, starting at `first_cluster`.
    pub fn new(convention: LogConvention, first_cluster: ClusterId) -> Self {
        Self {
            convention,
            next_cluster: first_cluster,
            reject: false,
            accepted: BTreeMap::new(),
            submissions: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Backend that refuses every submission.
    pub fn unavailable() -> Self {
        Self {
            reject: true,
            ..Self::new(LogConvention::Cluster, 1)
        }
    }
}

impl Scheduler for DryRunScheduler {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn convention(&self) -> LogConvention {
        self.convention
    }

    fn submit(
        &mut self,
        descriptor: &SubmissionDescriptor,
        _submit_dir: &Path,
    ) -> Result<ClusterId, FrsError> {
        if self.reject {
            return Err(FrsError::SchedulerUnavailable(
                ErrorInfo::new("scheduler_rejected", "dry-run scheduler refuses submissions")
                    .with_context("executable", descriptor.executable.as_str()),
            ));
        }
        let cluster = self.next_cluster;
        self.next_cluster += 1;
        let mut recorded = descriptor.clone();
        recorded.cluster = Some(cluster);
        self.accepted.insert(cluster, descriptor.rows.len());
        self.submissions.push(recorded);
        self.events.push(SchedulerEvent::Submitted(cluster));
        info!(cluster, rows = descriptor.rows.len(), "dry-run submission recorded");
        Ok(cluster)
    }

    fn process_count(&self, cluster: ClusterId) -> Result<usize, FrsError> {
        self.accepted.get(&cluster).copied().ok_or_else(|| {
            FrsError::SchedulerUnavailable(
                ErrorInfo::new("cluster_unknown", "cluster was not submitted by this run")
                    .with_context("cluster", cluster.to_string()),
            )
        })
    }

    fn cancel(&mut self, job: TaskIds) -> Result<CancelOutcome, FrsError> {
        self.events.push(SchedulerEvent::Cancelled(job));
        Ok(CancelOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SubmitSettings;
    use frs_grid::Stage;

    fn descriptor(pinned: bool) -> SubmissionDescriptor {
        let mut settings = SubmitSettings::default();
        settings.resources.memory_mb = Some(2000);
        settings.environment = vec!["source /opt/setup.sh".to_string()];
        SubmissionDescriptor {
            executable: "run_fill".to_string(),
            basename: "fill".to_string(),
            convention: LogConvention::Cluster,
            settings,
            rows: vec![SubmissionRow {
                point_id: "threshold1=0.4".to_string(),
                stage: Stage::MeasurementFill,
                basename: "fill".to_string(),
                work_dir: PathBuf::from("/grid/threshold1=0.4"),
                arguments: vec!["threshold1".to_string(), "0.4".to_string()],
                log_ids: pinned.then(|| TaskIds::new(41, 3)),
                job: None,
                attempts: 0,
            }],
            cluster: None,
            resubmission_of: None,
        }
    }

    #[test]
    fn condor_reply_parses() {
        let reply = "Submitting job(s)...\n3 job(s) submitted to cluster 4312.\n";
        assert_eq!(CondorScheduler::parse_submit_output(reply), Some((4312, 3)));
        assert_eq!(CondorScheduler::parse_submit_output("ERROR: no such file"), None);
    }

    #[test]
    fn qsub_terse_reply_parses() {
        assert_eq!(QsubScheduler::parse_submit_output("5531\n"), Some(5531));
        assert_eq!(QsubScheduler::parse_submit_output("5532.1-4:1\n"), Some(5532));
    }

    #[test]
    fn fresh_submit_file_uses_scheduler_ids() {
        let text = render_condor_submit(&descriptor(false), Path::new("/s/fill.job.sh"));
        assert!(text.contains("error = logs/$(stem)_err_$(Cluster)_$(Process)"));
        assert!(text.contains("request_memory = 2000"));
        assert!(text.contains("/grid/threshold1=0.4, fill, threshold1 0.4\n"));
    }

    #[test]
    fn pinned_submit_file_reuses_log_ids() {
        let text = render_condor_submit(&descriptor(true), Path::new("/s/fill.job.sh"));
        assert!(text.contains("error = logs/$(stem)_err_$(logids)"));
        assert!(text.contains("/grid/threshold1=0.4, fill, 41_3, threshold1 0.4\n"));
    }

    #[test]
    fn qsub_script_pins_legacy_logs() {
        let mut descriptor = descriptor(true);
        descriptor.convention = LogConvention::Legacy;
        let row = descriptor.rows[0].clone();
        let text = render_qsub_script(&descriptor, &row);
        assert!(text.contains("#$ -e /grid/threshold1=0.4/logs/fill.e41"));
        assert!(text.contains("source /opt/setup.sh\nexec run_fill threshold1 0.4"));
    }

    #[test]
    fn dry_run_hands_out_sequential_clusters() {
        let mut scheduler = DryRunScheduler::new(LogConvention::Cluster, 7);
        let dir = Path::new("unused");
        assert_eq!(scheduler.submit(&descriptor(false), dir).unwrap(), 7);
        assert_eq!(scheduler.submit(&descriptor(false), dir).unwrap(), 8);
        assert_eq!(scheduler.process_count(8).unwrap(), 1);
        assert!(scheduler.process_count(9).is_err());
    }

    #[test]
    fn job_scripts_do_not_clobber_other_executables() {
        let temp = tempfile::tempdir().unwrap();
        let fill = descriptor(false);
        let mut other = descriptor(false);
        other.executable = "run_fill_v2".to_string();

        let first = write_job_script(&fill, temp.path()).unwrap();
        let second = write_job_script(&other, temp.path()).unwrap();
        assert_ne!(first, second);
        assert!(fs::read_to_string(&first).unwrap().contains("exec run_fill \"$@\""));
        assert!(fs::read_to_string(&second).unwrap().contains("exec run_fill_v2 \"$@\""));
        assert_eq!(write_job_script(&fill, temp.path()).unwrap(), first);
    }

    #[test]
    fn unavailable_scheduler_rejects() {
        let err = DryRunScheduler::unavailable()
            .submit(&descriptor(false), Path::new("unused"))
            .unwrap_err();
        assert!(matches!(err, FrsError::SchedulerUnavailable(_)));
    }
}
