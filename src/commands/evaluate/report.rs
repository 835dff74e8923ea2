use std::fmt::Write as _;

use super::*;

pub const REPORT_FILE_NAME: &str = "scaling_report.json";
pub const SPEEDUP_CSV_FILE_NAME: &str = "speedup.csv";
pub const COST_CSV_FILE_NAME: &str = "per_eval_cost.csv";

pub fn report_dir(output_root: &Path, benchmark: &str) -> PathBuf {
    output_root.join("benchmarks").join(benchmark)
}

pub(super) fn write_report_artifacts(dir: &Path, report: &ScalingReport) -> Result<()> {
    write_json_pretty(&dir.join(REPORT_FILE_NAME), report)?;
    write_text(&dir.join(SPEEDUP_CSV_FILE_NAME), &speedup_csv(&report.curve))?;
    write_text(&dir.join(COST_CSV_FILE_NAME), &cost_csv(&report.curve))?;
    Ok(())
}

pub(super) fn speedup_csv(curve: &ScalingCurve) -> String {
    let mut out = String::from("process_count,duration_secs,speedup,efficiency\n");
    for point in &curve.points {
        let _ = writeln!(
            out,
            "{},{:.6},{:.6},{:.6}",
            point.process_count, point.duration_secs, point.speedup, point.efficiency
        );
    }
    out
}

pub(super) fn cost_csv(curve: &ScalingCurve) -> String {
    let mut out = String::from("process_count,likelihood_evaluations,per_eval_secs\n");
    for point in &curve.points {
        let evaluations = point
            .likelihood_evaluations
            .map(|count| count.to_string())
            .unwrap_or_default();
        let cost = point
            .per_eval_secs
            .map(|secs| format!("{secs:.9}"))
            .unwrap_or_default();
        let _ = writeln!(out, "{},{},{}", point.process_count, evaluations, cost);
    }
    out
}

pub(super) fn render_table(report: &ScalingReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "benchmark {} at {} live points ({} records)",
        report.benchmark, report.live_points, report.record_count
    );
    let _ = writeln!(
        out,
        "{:>6} {:>5} {:>12} {:>8} {:>10} {:>14}",
        "procs", "runs", "wall (s)", "speedup", "efficiency", "s / eval"
    );
    for point in &report.curve.points {
        let cost = point
            .per_eval_secs
            .map(|secs| format!("{secs:.6}"))
            .unwrap_or_else(|| "-".to_string());
        let marker = if Some(point.process_count) == report.recommendation.recommended_process_count {
            " <"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:>6} {:>5} {:>12.1} {:>8.2} {:>10.2} {:>14}{}",
            point.process_count,
            point.runs,
            point.duration_secs,
            point.speedup,
            point.efficiency,
            cost,
            marker
        );
    }
    let _ = writeln!(
        out,
        "sub-linear scaling: {}",
        if report.sub_linear { "yes" } else { "no" }
    );
    let target = report
        .recommendation
        .recommended_process_count
        .map(|count| format!("{count} processes"))
        .unwrap_or_else(|| "no safe process count".to_string());
    let _ = writeln!(
        out,
        "verdict: {} -> {}",
        report.recommendation.verdict.as_str(),
        target
    );
    let _ = writeln!(out, "{}", report.recommendation.message);
    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    out
}

pub(super) fn collect_record_files(output_root: &Path, benchmark: &str) -> Result<Vec<RunRecord>> {
    let runs_dir = output_root.join("runs").join(benchmark);
    let entries = fs::read_dir(&runs_dir)
        .with_context(|| format!("failed to read {}", runs_dir.display()))?;

    let mut records = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", runs_dir.display()))?;
        let path = entry.path().join(RUN_RECORD_FILE_NAME);
        if !path.is_file() {
            continue;
        }
        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let record: RunRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}
