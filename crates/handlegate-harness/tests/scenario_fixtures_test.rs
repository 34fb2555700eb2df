//! Integration test: every scenario fixture passes and emits a valid log.
//!
//! Run: cargo test -p handlegate-harness --test scenario_fixtures_test

use std::path::{Path, PathBuf};

use handlegate_harness::structured_log::{LogEmitter, validate_log_file, validate_log_line};
use handlegate_harness::{Scenario, run_scenario};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(fixtures_dir())
        .unwrap()
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();
    paths
}

#[test]
fn all_fixtures_pass() {
    let paths = fixture_paths();
    assert!(paths.len() >= 5, "fixtures missing: {paths:?}");

    for path in paths {
        let scenario = Scenario::from_file(&path).unwrap();
        let mut log = LogEmitter::to_buffer(&scenario.name, "fixtures");
        let report = run_scenario(&scenario, &mut log).unwrap();
        assert!(
            report.passed,
            "{}: {:#?}",
            path.display(),
            report.failures
        );
        assert_eq!(report.steps, scenario.steps.len());

        let text = String::from_utf8(log.into_inner()).unwrap();
        for (i, line) in text.lines().enumerate() {
            if let Err(errors) = validate_log_line(line, i + 1) {
                panic!("{}: {errors:?}", path.display());
            }
        }
    }
}

#[test]
fn report_counts_match_the_session() {
    let scenario = Scenario::from_file(&fixtures_dir().join("quarantine_eviction.json")).unwrap();
    let mut log = LogEmitter::to_buffer(&scenario.name, "counts");
    let report = run_scenario(&scenario, &mut log).unwrap();

    assert_eq!(report.invalid_handle_reports, 3);
    assert_eq!(report.metrics.registers, 3);
    assert_eq!(report.metrics.closes, 3);
    assert_eq!(report.metrics.evictions, 3);
    assert_eq!(report.metrics.unknown_handles, 2);
    assert_eq!(report.metrics.use_after_close, 1);
    assert_eq!(report.open_released, 0);
    assert_eq!(report.quarantined_released, 0);
}

#[test]
fn file_log_round_trips_through_validation() {
    let scenario = Scenario::from_file(&fixtures_dir().join("dup_and_construct.json")).unwrap();
    let path = std::env::temp_dir().join(format!(
        "handlegate-harness-{}-{}.jsonl",
        scenario.name,
        std::process::id()
    ));

    let report = {
        let mut log = LogEmitter::to_file(&path, &scenario.name, "file").unwrap();
        run_scenario(&scenario, &mut log).unwrap()
    };
    let (lines, errors) = validate_log_file(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(lines, report.log_lines);

    use sha2::Digest;
    let digest = sha2::Sha256::digest(&bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    assert_eq!(hex, report.log_sha256);
}
