use std::fs;

use super::report::{COST_CSV_FILE_NAME, REPORT_FILE_NAME, SPEEDUP_CSV_FILE_NAME};
use super::*;
use crate::config::PolicyConfig;
use crate::model::{RunOutcome, RunRecord};

fn record(process_count: u32, live_points: u32, duration_secs: f64) -> RunRecord {
    RunRecord {
        run_id: format!("run-np{process_count}-nlive{live_points}-{duration_secs}"),
        benchmark: "hst".to_string(),
        process_count,
        live_points,
        duration_secs,
        likelihood_evaluations: Some(u64::from(live_points) * 100),
        log_evidence: Some(-20.4),
        log_evidence_error: Some(0.5),
        outcome: RunOutcome::Completed,
        output_dir: format!("runs/hst/np{process_count}_nlive{live_points}"),
        started_at: "2026-03-01T10:00:00Z".to_string(),
        finished_at: "2026-03-01T10:05:00Z".to_string(),
        failure_reason: None,
    }
}

fn with_outcome(mut record: RunRecord, outcome: RunOutcome) -> RunRecord {
    record.outcome = outcome;
    record
}

fn approx(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

fn speedups(report: &ScalingReport) -> Vec<f64> {
    report.curve.points.iter().map(|point| point.speedup).collect()
}

#[test]
fn baseline_speedup_is_exactly_one() {
    let records = vec![record(1, 40, 123.456), record(2, 40, 70.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    assert_eq!(report.curve.points[0].speedup, 1.0);
    assert_eq!(report.curve.points[0].efficiency, 1.0);
    assert_eq!(report.curve.baseline_process_count, 1);
}

#[test]
fn synthetic_fixture_yields_expected_speedups_and_sub_linear_flag() {
    let records = vec![
        record(1, 40, 100.0),
        record(2, 40, 55.0),
        record(4, 40, 30.0),
        record(8, 40, 20.0),
    ];
    let report = evaluate("hst", &records, Some(40), &PolicyConfig::default()).expect("report");

    let expected = [1.0, 1.82, 3.33, 5.0];
    for (actual, expected) in speedups(&report).iter().zip(expected) {
        assert!(approx(*actual, expected, 0.005), "{actual} vs {expected}");
    }
    assert!(report.sub_linear);

    let efficiencies = report
        .curve
        .points
        .iter()
        .map(|point| point.efficiency)
        .collect::<Vec<f64>>();
    assert!(efficiencies.windows(2).all(|pair| pair[1] < pair[0]));
}

#[test]
fn linear_scaling_is_not_flagged_sub_linear() {
    let records = vec![record(1, 40, 80.0), record(2, 40, 40.0), record(4, 40, 20.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    assert!(!report.sub_linear);
    assert_eq!(report.recommendation.verdict, Verdict::StillScaling);
    assert_eq!(report.recommendation.recommended_process_count, Some(4));
}

#[test]
fn per_evaluation_cost_divides_duration_by_count() {
    let mut first = record(1, 40, 100.0);
    first.likelihood_evaluations = Some(4000);
    let mut second = record(2, 40, 60.0);
    second.likelihood_evaluations = None;
    let report = evaluate("hst", &[first, second], None, &PolicyConfig::default()).expect("report");

    assert!(approx(report.curve.points[0].per_eval_secs.expect("cost"), 0.025, 1e-12));
    assert!(report.curve.points[1].per_eval_secs.is_none());
}

#[test]
fn flattening_between_four_and_eight_recommends_four() {
    let records = vec![record(2, 40, 400.0), record(4, 40, 240.0), record(8, 40, 180.0)];
    let policy = PolicyConfig {
        efficiency_threshold: 1.5,
        ..PolicyConfig::default()
    };
    let report = evaluate("hst", &records, Some(40), &policy).expect("report");
    let recommendation = &report.recommendation;

    assert_eq!(recommendation.verdict, Verdict::Flattened);
    assert_eq!(recommendation.recommended_process_count, Some(4));
    assert_eq!(recommendation.efficiency_threshold, 1.5);

    let ratio = recommendation.decision_ratio.expect("ratio");
    assert!(approx(ratio, 240.0 / 180.0, 1e-12));
    let step = recommendation.decision_step.as_ref().expect("step");
    assert_eq!((step.from_process_count, step.to_process_count), (4, 8));
    assert!(approx(step.required_speedup, 1.5, 1e-12));
    assert!(recommendation.message.contains("1.333"));

    assert_eq!(report.curve.baseline_process_count, 2);
    assert_eq!(report.curve.points[0].speedup, 1.0);
}

#[test]
fn flat_first_increment_reports_parallelism_not_cost_effective() {
    let records = vec![record(1, 40, 100.0), record(2, 40, 98.0), record(4, 40, 97.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    assert_eq!(
        report.recommendation.verdict,
        Verdict::ParallelismNotCostEffective
    );
    assert_eq!(report.recommendation.recommended_process_count, Some(1));
    assert!(report.recommendation.message.contains("not cost-effective"));
}

#[test]
fn decreasing_first_increment_reports_parallelism_not_cost_effective() {
    let records = vec![record(1, 40, 100.0), record(2, 40, 120.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    assert_eq!(
        report.recommendation.verdict,
        Verdict::ParallelismNotCostEffective
    );
    assert_eq!(report.recommendation.recommended_process_count, Some(1));
}

#[test]
fn single_level_is_insufficient_data() {
    let report = evaluate("hst", &[record(4, 40, 50.0)], None, &PolicyConfig::default())
        .expect("report");
    assert_eq!(report.recommendation.verdict, Verdict::InsufficientData);
    assert_eq!(report.recommendation.recommended_process_count, Some(4));
    assert!(!report.sub_linear);
}

#[test]
fn non_doubling_steps_scale_the_required_speedup() {
    let records = vec![record(1, 40, 100.0), record(4, 40, 50.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    let step = &report.steps[0];
    assert!(approx(step.resource_ratio, 4.0, 1e-12));
    assert!(approx(step.required_speedup, 2.25, 1e-12));
    assert_eq!(report.recommendation.verdict, Verdict::Flattened);
    assert_eq!(report.recommendation.recommended_process_count, Some(1));
}

#[test]
fn repeated_runs_collapse_to_median_duration() {
    let records = vec![
        record(1, 40, 100.0),
        record(2, 40, 50.0),
        record(2, 40, 70.0),
        record(2, 40, 54.0),
    ];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    let point = &report.curve.points[1];
    assert_eq!(point.runs, 3);
    assert_eq!(point.duration_secs, 54.0);
}

#[test]
fn failed_runs_are_left_out_and_ipc_failure_caps_recommendation() {
    let records = vec![
        record(1, 40, 100.0),
        record(2, 40, 50.0),
        record(4, 40, 25.0),
        with_outcome(record(4, 40, 5.0), RunOutcome::IpcExhausted),
        with_outcome(record(8, 40, 3.0), RunOutcome::TimedOut),
    ];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");

    assert_eq!(report.curve.points.len(), 3);
    assert_eq!(report.ipc_failure_levels, vec![4]);
    assert_eq!(report.recommendation.verdict, Verdict::StillScaling);
    assert_eq!(report.recommendation.recommended_process_count, Some(2));
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.contains("shared memory ran out at 4"))
    );
    assert!(report.warnings.iter().any(|warning| warning.contains("timed_out")));
}

#[test]
fn several_live_point_counts_need_an_explicit_choice() {
    let records = vec![record(1, 40, 100.0), record(1, 400, 900.0)];
    let err = evaluate("hst", &records, None, &PolicyConfig::default()).expect_err("ambiguous");
    assert!(matches!(
        err.downcast_ref::<ProcedureError>(),
        Some(ProcedureError::AmbiguousLivePoints { .. })
    ));

    let report = evaluate("hst", &records, Some(400), &PolicyConfig::default()).expect("report");
    assert_eq!(report.live_points, 400);
    assert_eq!(report.curve.points.len(), 1);
}

#[test]
fn no_completed_runs_is_an_error() {
    let records = vec![with_outcome(record(2, 40, 10.0), RunOutcome::Failed)];
    assert!(evaluate("hst", &records, None, &PolicyConfig::default()).is_err());
    assert!(evaluate("hst", &records, Some(40), &PolicyConfig::default()).is_err());
}

#[test]
fn raising_live_points_must_not_lower_evaluation_count() {
    let mut low = record(2, 40, 100.0);
    low.likelihood_evaluations = Some(5000);
    let mut high = record(2, 80, 180.0);
    high.likelihood_evaluations = Some(4000);
    let mut fine = record(4, 80, 90.0);
    fine.likelihood_evaluations = Some(9000);

    let warnings = evaluation_count_warnings(&[low.clone(), high.clone(), fine]);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("at 2 processes"));

    high.likelihood_evaluations = Some(8000);
    assert!(evaluation_count_warnings(&[low, high]).is_empty());
}

#[test]
fn evaluation_is_idempotent_and_order_independent() {
    let records = vec![
        record(8, 40, 180.0),
        record(2, 40, 400.0),
        with_outcome(record(16, 40, 10.0), RunOutcome::IpcExhausted),
        record(4, 40, 240.0),
    ];
    let mut shuffled = records.clone();
    shuffled.reverse();

    let policy = PolicyConfig::default();
    let first = evaluate("hst", &records, None, &policy).expect("first");
    let second = evaluate("hst", &records, None, &policy).expect("second");
    let reordered = evaluate("hst", &shuffled, None, &policy).expect("reordered");

    assert_eq!(first, second);
    assert_eq!(first, reordered);
    assert_eq!(first.records_digest.len(), 64);
}

#[test]
fn report_artifacts_are_written_and_identical_across_reruns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records = vec![record(1, 40, 100.0), record(2, 40, 55.0), record(4, 40, 30.0)];
    let policy = PolicyConfig::default();

    evaluate_and_report(&policy, &records, "hst", None, dir.path(), false).expect("first");
    let first = fs::read(dir.path().join(REPORT_FILE_NAME)).expect("report");
    evaluate_and_report(&policy, &records, "hst", None, dir.path(), true).expect("second");
    let second = fs::read(dir.path().join(REPORT_FILE_NAME)).expect("report");
    assert_eq!(first, second);

    let speedup = fs::read_to_string(dir.path().join(SPEEDUP_CSV_FILE_NAME)).expect("csv");
    let lines = speedup.lines().collect::<Vec<&str>>();
    assert_eq!(lines[0], "process_count,duration_secs,speedup,efficiency");
    assert!(lines[1].starts_with("1,100.000000,1.000000,1.000000"));
    assert_eq!(lines.len(), 4);

    let cost = fs::read_to_string(dir.path().join(COST_CSV_FILE_NAME)).expect("csv");
    assert!(cost.lines().nth(1).unwrap_or_default().starts_with("1,4000,0.025"));
}

#[test]
fn table_marks_recommended_row() {
    let records = vec![record(2, 40, 400.0), record(4, 40, 240.0), record(8, 40, 180.0)];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");
    let table = render_table(&report);

    let marked = table
        .lines()
        .filter(|line| line.ends_with(" <"))
        .collect::<Vec<&str>>();
    assert_eq!(marked.len(), 1);
    assert!(marked[0].trim_start().starts_with('4'));
    assert!(table.contains("verdict: flattened -> 4 processes"));
}

#[test]
fn record_files_are_collected_from_run_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    for rec in [record(1, 40, 100.0), record(2, 40, 60.0)] {
        let run_dir = dir
            .path()
            .join("runs")
            .join("hst")
            .join(format!("np{}_nlive40", rec.process_count));
        crate::util::write_json_pretty(&run_dir.join(RUN_RECORD_FILE_NAME), &rec).expect("write");
    }
    fs::create_dir_all(dir.path().join("runs").join("hst").join("empty")).expect("mkdir");

    let records = collect_record_files(dir.path(), "hst").expect("records");
    assert_eq!(records.len(), 2);
}

#[test]
fn ipc_failure_below_every_measurement_leaves_no_safe_count() {
    let records = vec![
        with_outcome(record(2, 40, 10.0), RunOutcome::IpcExhausted),
        record(4, 40, 100.0),
        record(8, 40, 50.0),
    ];
    let report = evaluate("hst", &records, None, &PolicyConfig::default()).expect("report");

    assert_eq!(report.ipc_failure_levels, vec![2]);
    assert_eq!(report.recommendation.verdict, Verdict::NoSafeProcessCount);
    assert_eq!(report.recommendation.recommended_process_count, None);
    assert!(report.recommendation.message.contains("below 2"));
    assert!(
        report
            .warnings
            .iter()
            .all(|warning| !warning.contains("recommendation lowered"))
    );

    let table = render_table(&report);
    assert!(table.contains("verdict: no_safe_process_count -> no safe process count"));
    assert!(table.lines().all(|line| !line.ends_with(" <")));
}
