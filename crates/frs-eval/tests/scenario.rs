use std::fs;
use std::path::Path;

use frs_batch::{
    dispatch, execute, load_descriptors, plan_all, DryRunScheduler, StageGate, SubmitSettings,
    SUBMISSIONS_DIR,
};
use frs_eval::{
    evaluate, write_scoreboard, ArtifactLayout, ArtifactStore, BinnedArtifact, DimensionKey,
    Dimensions, EvalSpec, HeatmapConfig, JsonArtifactStore, Metric,
};
use frs_grid::{
    generate, provision, synthesize, FixedShards, GridPoint, GridSpec, ParameterAxis, Stage,
    StageSpec, StageTable,
};
use frs_logs::naming::header_line;
use frs_logs::protocol::{DONE_MARKER, START_MARKER};
use frs_logs::{scan, LogConvention, LogPaths, Protocol, ScanOptions, ScanReport};

fn grid() -> GridSpec {
    GridSpec::new(vec![
        ParameterAxis::new("threshold1", ["0.4", "0.5"]),
        ParameterAxis::new("threshold2", ["0.02", "0.05"]),
    ])
}

fn stages() -> StageTable {
    let plain = |executable: &str| StageSpec {
        executable: executable.to_string(),
        args: Vec::new(),
        shards: None,
        basename: None,
    };
    StageTable {
        measurement_fill: plain("run_fill"),
        map_derivation: plain("derive_maps"),
        closure_test: plain("run_closure"),
    }
}

fn eval_spec() -> EvalSpec {
    EvalSpec {
        metric: Metric::ChiSquare,
        dimensions: Dimensions {
            years: vec!["2017".into(), "2018".into()],
            flavors: vec!["e".into(), "mu".into()],
            processes: vec!["ttbar".into()],
        },
        layout: ArtifactLayout::default(),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Run {
    Completed,
    Unfinished,
    Crashed,
}

fn argument(arguments: &[String], name: &str) -> f64 {
    arguments
        .chunks(2)
        .find(|pair| pair[0] == name)
        .and_then(|pair| pair[1].parse().ok())
        .expect("numeric argument")
}

/// Plays the external executable: header and markers, plus closure
/// artifacts whose disagreement grows with both thresholds.
fn run_external(stage: Stage, work_dir: &Path, arguments: &[String], logs: &LogPaths, run: Run) {
    let header: String = arguments
        .chunks(2)
        .map(|pair| header_line(&pair[0], &pair[1]) + "\n")
        .collect();
    fs::write(&logs.out, header).expect("write out log");
    let err = match run {
        Run::Completed => format!("{START_MARKER}\nok\n{DONE_MARKER}\n"),
        Run::Unfinished => format!("{START_MARKER}\nprocessing\n"),
        Run::Crashed => format!("{START_MARKER}\nR__unzip: error -3\n{DONE_MARKER}\n"),
    };
    fs::write(&logs.err, err).expect("write err log");
    if stage != Stage::ClosureTest || run != Run::Completed {
        return;
    }
    let shift1 = (argument(arguments, "threshold1") - 0.4) * 100.0;
    let shift2 = (argument(arguments, "threshold2") - 0.02) * 100.0;
    let store = JsonArtifactStore::new(work_dir);
    let spec = eval_spec();
    for year in &spec.dimensions.years {
        let mut artifacts = Vec::new();
        for flavor in &spec.dimensions.flavors {
            let key = DimensionKey {
                year: year.clone(),
                flavor: flavor.clone(),
                process: "ttbar".into(),
            };
            let (predicted, observed) = spec.layout.pair(work_dir, &key);
            let edges = vec![0.0, 1.0, 2.0, 3.0];
            artifacts.push(
                BinnedArtifact::new(predicted.object, edges.clone(), vec![10.0, 20.0, 30.0], vec![1.0; 3])
                    .unwrap(),
            );
            artifacts.push(
                BinnedArtifact::new(
                    observed.object,
                    edges,
                    vec![10.0 + shift1, 20.0, 30.0 + shift2],
                    vec![1.0; 3],
                )
                .unwrap(),
            );
        }
        store
            .save(Path::new(&format!("closure_{year}.json")), &artifacts)
            .expect("save artifacts");
    }
}

fn completed_stage_sets(
    root: &Path,
    points: &[GridPoint],
    report: &ScanReport,
) -> usize {
    let descriptors: Vec<_> = load_descriptors(&root.join(SUBMISSIONS_DIR), false)
        .unwrap()
        .into_iter()
        .map(|(_, descriptor)| descriptor)
        .collect();
    let stages = stages();
    let shards = FixedShards(1);
    let gate = StageGate::new(&stages, root, &shards, &descriptors, report);
    points
        .iter()
        .flat_map(|point| Stage::ALL.map(|stage| (point, stage)))
        .filter(|(point, stage)| gate.progress(point, *stage).unwrap().is_complete())
        .count()
}

#[test]
fn grid_recovers_from_partial_execution_and_scores_every_point() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let root = temp.path();
    let submit_dir = root.join(SUBMISSIONS_DIR);
    let grid = grid();
    let points = generate(&grid).unwrap();
    assert_eq!(points.len(), 4);
    provision(&grid, &points, root, false).expect("provision");

    let mut scheduler = DryRunScheduler::new(LogConvention::Cluster, 100);
    let mut dispatched = Vec::new();
    for stage in Stage::ALL {
        let tasks: Vec<_> = points
            .iter()
            .flat_map(|point| synthesize(point, stage, &stages(), root, &FixedShards(1)).unwrap())
            .collect();
        let receipt = dispatch(&tasks, &mut scheduler, &SubmitSettings::default(), &submit_dir)
            .expect("dispatch");
        dispatched.extend(receipt.submissions.into_iter().flat_map(|s| s.tasks));
    }
    assert_eq!(dispatched.len(), 12);

    for (index, item) in dispatched.iter().enumerate() {
        let run = match index {
            2 | 11 => Run::Unfinished,
            5 => Run::Crashed,
            _ => Run::Completed,
        };
        run_external(item.task.stage, &item.task.work_dir, &item.task.arguments, &item.logs, run);
    }

    let first = scan(root, &ScanOptions::default(), &Protocol::default()).expect("scan");
    assert_eq!(first.summary().clean, 9);
    assert_eq!(first.summary().failed(), 3);
    assert_eq!(completed_stage_sets(root, &points, &first), 9);

    let plans = plan_all(&first, &load_descriptors(&submit_dir, false).unwrap());
    let targeted: usize = plans.iter().map(|plan| plan.tasks.len()).sum();
    assert_eq!(targeted, 3);
    for plan in &plans {
        assert!(plan.skipped.is_empty());
        execute(plan, &mut scheduler, &submit_dir).expect("resubmit");
        let resubmission = plan.descriptor();
        for row in &resubmission.rows {
            let logs = row.log_paths(resubmission.convention).expect("pinned logs");
            run_external(row.stage, &row.work_dir, &row.arguments, &logs, Run::Completed);
        }
    }

    let second = scan(root, &ScanOptions::default(), &Protocol::default()).expect("rescan");
    assert_eq!(second.scanned, 12);
    assert_eq!(second.summary().clean, 12);
    assert_eq!(completed_stage_sets(root, &points, &second), 12);

    let store = JsonArtifactStore::new(root);
    let board = evaluate(&points, &grid, root, &eval_spec(), &store).expect("evaluate");
    assert_eq!(board.tables.len(), 4);
    for table in &board.tables {
        assert_eq!(table.shape, vec![2, 2]);
        assert_eq!(table.finite_count(), 4);
    }
    let best = board.best().expect("best point");
    assert_eq!(best.point_id, "threshold1=0.4_threshold2=0.02");
    assert_eq!(best.total, 0.0);

    let written =
        write_scoreboard(&board, &root.join("scores"), &HeatmapConfig::default()).expect("render");
    assert_eq!(written.len(), 10);
    assert!(written.iter().all(|path| path.exists()));
}

#[test]
fn missing_artifacts_become_failed_entries() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let grid = grid();
    let points = generate(&grid).unwrap();
    provision(&grid, &points, temp.path(), false).expect("provision");
    let store = JsonArtifactStore::new(temp.path());
    let board = evaluate(&points, &grid, temp.path(), &eval_spec(), &store).expect("evaluate");
    assert_eq!(board.failed_count(), 16);
    assert!(board.best().is_none());
    assert_eq!(board.ranking().len(), 4);
    assert!(board.ranking().iter().all(|rank| rank.failed == 4));
}
