use frs_core::{from_json_slice, to_canonical_json_bytes, ErrorInfo, FrsError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("point", "threshold1=0.4_threshold2=0.02")
        .with_context("cluster", "1201")
}

#[test]
fn scheduler_error_surface() {
    let err = FrsError::SchedulerUnavailable(sample_info("condor_submit", "exit status 1"));
    assert_eq!(err.info().code, "condor_submit");
    assert!(err.info().context.contains_key("cluster"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn config_errors_map_to_usage_exit_code() {
    let err = FrsError::Config(ErrorInfo::new("empty_axis", "axis has no values"));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn recovery_error_surface() {
    let err = FrsError::ArgumentRecoveryFailure(
        sample_info("missing_header", "no '- shard' line").with_hint("log every argument"),
    );
    let rendered = err.to_string();
    assert!(rendered.starts_with("argument recovery failed"));
    assert!(rendered.contains("point=threshold1=0.4_threshold2=0.02"));
    assert!(rendered.contains("hint: log every argument"));
}

#[test]
fn errors_survive_json_encoding() {
    let err = FrsError::ArtifactMissing(sample_info("artifact_load", "no such object"));
    let bytes = to_canonical_json_bytes(&err).expect("encode");
    let decoded: FrsError = from_json_slice(&bytes).expect("decode");
    assert_eq!(decoded, err);
}
