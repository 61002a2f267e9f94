use std::fs;
use std::path::Path;

use frs_grid::{
    generate, load_grid, provision, synthesize, FixedShards, GridSpec, ParameterAxis,
    SampleListShards, ShardSpec, Stage, StageArgument, StageSpec, StageTable,
};

fn grid() -> GridSpec {
    GridSpec::new(vec![
        ParameterAxis::new("threshold1", ["0.4", "0.5"]),
        ParameterAxis::new("threshold2", ["0.02", "0.05"]),
    ])
}

fn stages() -> StageTable {
    StageTable {
        measurement_fill: StageSpec {
            executable: "run_fill".to_string(),
            args: vec![StageArgument {
                name: "year".to_string(),
                value: "2018".to_string(),
            }],
            shards: Some(ShardSpec {
                sample_list: "samples.txt".into(),
                output_extension: "root".to_string(),
            }),
            basename: None,
        },
        map_derivation: StageSpec {
            executable: "derive_maps".to_string(),
            args: Vec::new(),
            shards: None,
            basename: None,
        },
        closure_test: StageSpec {
            executable: "closure".to_string(),
            args: Vec::new(),
            shards: None,
            basename: Some("closure2018".to_string()),
        },
    }
}

#[test]
fn synthesis_is_pure() {
    let points = generate(&grid()).unwrap();
    let root = Path::new("/grid");
    for stage in Stage::ALL {
        let first = synthesize(&points[1], stage, &stages(), root, &FixedShards(3)).unwrap();
        let second = synthesize(&points[1], stage, &stages(), root, &FixedShards(3)).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn sharded_stage_appends_shard_arguments() {
    let points = generate(&grid()).unwrap();
    let tasks = synthesize(
        &points[0],
        Stage::MeasurementFill,
        &stages(),
        Path::new("/grid"),
        &FixedShards(2),
    )
    .unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(
        tasks[1].arguments,
        vec![
            "threshold1", "0.4", "threshold2", "0.02", "year", "2018", "shard", "1", "output",
            "fill_1.root",
        ]
    );
    assert_eq!(tasks[1].work_dir, Path::new("/grid/threshold1=0.4_threshold2=0.02"));
    assert_eq!(tasks[1].argument_names(), vec!["threshold1", "threshold2", "year", "shard", "output"]);
}

#[test]
fn zero_shards_yield_no_tasks() {
    let points = generate(&grid()).unwrap();
    let tasks = synthesize(
        &points[0],
        Stage::MeasurementFill,
        &stages(),
        Path::new("/grid"),
        &FixedShards(0),
    )
    .unwrap();
    assert!(tasks.is_empty());
}

#[test]
fn sample_list_counts_entries() {
    let temp = tempfile::tempdir().expect("tmp dir");
    fs::write(
        temp.path().join("samples.txt"),
        "# 2018 samples\nDYJets.root\n\nTTJets.root\nWJets.root\n",
    )
    .expect("write samples");
    let points = generate(&grid()).unwrap();
    let tasks = synthesize(
        &points[0],
        Stage::MeasurementFill,
        &stages(),
        Path::new("/grid"),
        &SampleListShards::new(temp.path()),
    )
    .unwrap();
    assert_eq!(tasks.len(), 3);
}

#[test]
fn unsharded_stage_has_one_task_with_basename_override() {
    let points = generate(&grid()).unwrap();
    let tasks = synthesize(
        &points[3],
        Stage::ClosureTest,
        &stages(),
        Path::new("/grid"),
        &FixedShards(5),
    )
    .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].basename, "closure2018");
    assert_eq!(tasks[0].executable, "closure");
}

#[test]
fn provisioning_skips_existing_points_unless_forced() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let grid = grid();
    let points = generate(&grid).unwrap();

    let first = provision(&grid, &points, temp.path(), false).expect("provision");
    assert_eq!(first.created.len(), 4);
    assert!(first.skipped.is_empty());

    let marker = points[0].work_dir(temp.path()).join("keep.txt");
    fs::write(&marker, "data").expect("write marker");
    let second = provision(&grid, &points, temp.path(), false).expect("reprovision");
    assert_eq!(second.skipped.len(), 4);
    assert!(marker.exists());

    let forced = provision(&grid, &points, temp.path(), true).expect("force");
    assert_eq!(forced.created.len(), 4);
    assert!(!marker.exists());

    let loaded = load_grid(temp.path(), Some(&grid)).expect("load grid");
    assert_eq!(loaded.points, points);
}

#[test]
fn changed_axes_are_rejected_on_load() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let grid = grid();
    provision(&grid, &generate(&grid).unwrap(), temp.path(), false).expect("provision");
    let changed = GridSpec::new(vec![ParameterAxis::new("threshold1", ["0.4"])]);
    let err = load_grid(temp.path(), Some(&changed)).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.info().code, "grid_hash_mismatch");
}

#[test]
fn stage_arguments_must_not_collide_or_split() {
    assert!(stages().validate(&grid()).is_ok());

    let cases = [
        ("iso", "tight iso", "stage_argument_token"),
        ("iso", "", "stage_argument_token"),
        ("threshold1", "0.9", "stage_argument_reserved"),
        ("shard", "0", "stage_argument_reserved"),
        ("year", "2017", "stage_argument_duplicate"),
    ];
    for (name, value, code) in cases {
        let mut table = stages();
        table.measurement_fill.args.push(StageArgument {
            name: name.to_string(),
            value: value.to_string(),
        });
        let err = table.validate(&grid()).unwrap_err();
        assert_eq!(err.info().code, code, "{name} {value:?}");
        assert_eq!(err.exit_code(), 2);
    }
}
