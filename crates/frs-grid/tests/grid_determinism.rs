use std::collections::BTreeSet;

use frs_grid::{generate, GridSpec, ParameterAxis};
use proptest::prelude::*;

fn grid_from(sizes: &[usize]) -> GridSpec {
    let axes = sizes
        .iter()
        .enumerate()
        .map(|(axis, size)| {
            ParameterAxis::new(
                format!("threshold{}", axis + 1),
                (0..*size).map(|v| format!("0.{}", v + 1)),
            )
        })
        .collect();
    GridSpec::new(axes)
}

proptest! {
    #[test]
    fn generation_is_deterministic_and_complete(sizes in prop::collection::vec(1usize..5, 1..4)) {
        let grid = grid_from(&sizes);
        let first = generate(&grid).unwrap();
        let second = generate(&grid).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), sizes.iter().product::<usize>());

        let ids: BTreeSet<_> = first.iter().map(|p| p.id.clone()).collect();
        prop_assert_eq!(ids.len(), first.len());
        for point in &first {
            prop_assert_eq!(point.assignments.len(), sizes.len());
            for (assignment, size) in point.assignments.iter().zip(&sizes) {
                prop_assert!(assignment.index < *size);
            }
        }
    }
}

#[test]
fn first_axis_varies_slowest() {
    let grid = GridSpec::new(vec![
        ParameterAxis::new("threshold1", ["0.4", "0.5"]),
        ParameterAxis::new("threshold2", ["0.02", "0.05"]),
    ]);
    let ids: Vec<_> = generate(&grid).unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(
        ids,
        vec![
            "threshold1=0.4_threshold2=0.02",
            "threshold1=0.4_threshold2=0.05",
            "threshold1=0.5_threshold2=0.02",
            "threshold1=0.5_threshold2=0.05",
        ]
    );
}

#[test]
fn empty_grids_are_configuration_errors() {
    let no_axes = GridSpec::new(Vec::new());
    let err = generate(&no_axes).unwrap_err();
    assert_eq!(err.info().code, "grid_no_axes");
    assert_eq!(err.exit_code(), 2);

    let empty_axis = GridSpec::new(vec![
        ParameterAxis::new("threshold1", ["0.4", "0.5"]),
        ParameterAxis::new("threshold2", Vec::<String>::new()),
    ]);
    let err = generate(&empty_axis).unwrap_err();
    assert_eq!(err.info().code, "grid_empty_axis");
    assert_eq!(err.exit_code(), 2);
}
