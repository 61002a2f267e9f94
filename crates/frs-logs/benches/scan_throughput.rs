use std::fs;

use criterion::{criterion_group, criterion_main, Criterion};
use frs_logs::naming::{cluster_log_name, LogStream, TaskIds};
use frs_logs::protocol::{DONE_MARKER, START_MARKER};
use frs_logs::{scan, Protocol, ScanOptions};
use tempfile::tempdir;

fn populate(dir: &std::path::Path, tasks: u32) {
    let body = "Processing entry 1000 of 250000\n".repeat(200);
    for process in 0..tasks {
        let ids = TaskIds::new(9001, process);
        let err = format!("{START_MARKER}\n{body}{DONE_MARKER}\n");
        fs::write(dir.join(cluster_log_name("fill", LogStream::Err, ids)), err)
            .expect("write err log");
        fs::write(dir.join(cluster_log_name("fill", LogStream::Out, ids)), &body)
            .expect("write out log");
    }
}

fn bench_scan(c: &mut Criterion) {
    let dir = tempdir().expect("bench dir");
    populate(dir.path(), 256);
    let protocol = Protocol::default();
    let options = ScanOptions::default();

    c.bench_function("scan_throughput", |b| {
        b.iter(|| {
            let report = scan(dir.path(), &options, &protocol).expect("scan");
            assert_eq!(report.scanned, 256);
        });
    });
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
