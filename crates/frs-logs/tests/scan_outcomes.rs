use std::fs;
use std::path::Path;

use frs_core::FrsError;
use frs_logs::naming::{cluster_log_name, legacy_log_name, LogStream, TaskIds};
use frs_logs::protocol::{DONE_MARKER, START_MARKER};
use frs_logs::{scan, LogOutcome, Protocol, ScanOptions, UnfinishedReason};

fn write_cluster(dir: &Path, basename: &str, ids: TaskIds, stream: LogStream, text: &str) {
    fs::write(dir.join(cluster_log_name(basename, stream, ids)), text).expect("write log");
}

fn completed() -> String {
    format!("{START_MARKER}\nfilled 412 events\n{DONE_MARKER}\n")
}

#[test]
fn classifies_every_error_log_and_counts_variants() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let logs = temp.path().join("a=1").join("logs");
    fs::create_dir_all(&logs).unwrap();

    write_cluster(&logs, "fill", TaskIds::new(10, 0), LogStream::Err, &completed());
    write_cluster(&logs, "fill", TaskIds::new(10, 0), LogStream::Out, "- a 1\n");
    write_cluster(&logs, "fill", TaskIds::new(10, 1), LogStream::Err, START_MARKER);
    write_cluster(&logs, "fill", TaskIds::new(10, 2), LogStream::Err, "");
    write_cluster(&logs, "fill", TaskIds::new(10, 3), LogStream::Err, &completed());
    write_cluster(
        &logs,
        "fill",
        TaskIds::new(10, 3),
        LogStream::Log,
        "009 (010.003.000) Job was aborted.\n",
    );
    fs::write(
        logs.join(legacy_log_name("maps", LogStream::Err, 5531).unwrap()),
        completed(),
    )
    .unwrap();
    fs::write(logs.join("point.json"), "{}").unwrap();

    let report = scan(temp.path(), &ScanOptions::default(), &Protocol::default()).expect("scan");
    let summary = report.summary();
    assert_eq!(summary.scanned, 5);
    assert_eq!(summary.clean, 2);
    assert_eq!(summary.unfinished, 2);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.failed(), 3);

    let never_started = report
        .entries
        .iter()
        .find(|entry| entry.name.ids == TaskIds::new(10, 2))
        .unwrap();
    assert_eq!(
        never_started.outcome,
        Ok(LogOutcome::Unfinished {
            reason: UnfinishedReason::NeverStarted
        })
    );
    assert!(matches!(
        never_started.task_error(),
        Some(FrsError::TaskUnfinished(_))
    ));

    let errors: Vec<_> = report.entries.iter().map(|entry| entry.task_error()).collect();
    assert_eq!(errors.iter().filter(|error| error.is_none()).count(), 2);
    let aborted = report
        .entries
        .iter()
        .find(|entry| entry.name.ids == TaskIds::new(10, 3))
        .and_then(|entry| entry.task_error())
        .expect("aborted task");
    assert!(matches!(aborted, FrsError::TaskErrored(_)));
    assert_eq!(aborted.info().code, "task_errored");
}

#[test]
fn naming_conventions_are_toggled_independently() {
    let temp = tempfile::tempdir().expect("tmp dir");
    write_cluster(temp.path(), "fill", TaskIds::new(3, 0), LogStream::Err, "");
    fs::write(temp.path().join("fill.e77"), "").unwrap();

    let only_legacy = ScanOptions {
        check_cluster_logs: false,
        ..ScanOptions::default()
    };
    let report = scan(temp.path(), &only_legacy, &Protocol::default()).unwrap();
    assert_eq!(report.scanned, 1);
    assert!(report.entries[0].log.ends_with("fill.e77"));

    let only_cluster = ScanOptions {
        check_qsub_logs: false,
        ..ScanOptions::default()
    };
    let report = scan(temp.path(), &only_cluster, &Protocol::default()).unwrap();
    assert_eq!(report.scanned, 1);
    assert!(report.entries[0].log.ends_with("fill_err_3_0"));
}

#[test]
fn scanning_leaves_logs_untouched() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let ids = TaskIds::new(8, 0);
    write_cluster(temp.path(), "closure", ids, LogStream::Err, START_MARKER);
    let path = temp.path().join(cluster_log_name("closure", LogStream::Err, ids));
    let before = fs::read(&path).unwrap();
    let first = scan(temp.path(), &ScanOptions::default(), &Protocol::default()).unwrap();
    let second = scan(temp.path(), &ScanOptions::default(), &Protocol::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(first, second);
}

#[test]
fn missing_root_is_a_configuration_error() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let err = scan(
        &temp.path().join("absent"),
        &ScanOptions::default(),
        &Protocol::default(),
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[cfg(unix)]
#[test]
fn unreadable_directories_are_reported() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().expect("tmp dir");
    let open = temp.path().join("a=1").join("logs");
    let locked = temp.path().join("a=2").join("logs");
    fs::create_dir_all(&open).unwrap();
    fs::create_dir_all(&locked).unwrap();
    write_cluster(&open, "fill", TaskIds::new(3, 0), LogStream::Err, &completed());
    write_cluster(&locked, "fill", TaskIds::new(4, 0), LogStream::Err, START_MARKER);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Permission bits do not bind this user.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = scan(temp.path(), &ScanOptions::default(), &Protocol::default());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let report = report.expect("scan");
    let summary = report.summary();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.skipped, 1);
    assert!(report.skipped[0].message.contains("a=2"));
}
