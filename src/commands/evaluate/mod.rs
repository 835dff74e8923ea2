use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::EvaluateArgs;
use crate::commands::launch::RUN_RECORD_FILE_NAME;
use crate::config::{PolicyConfig, load_config};
use crate::error::ProcedureError;
use crate::ledger::{load_run_records, open_ledger, resolve_ledger_path};
use crate::model::{RunOutcome, RunRecord};
use crate::util::{sha256_bytes, write_json_pretty, write_text};

mod curve;
mod recommend;
mod report;
mod run;
#[cfg(test)]
mod tests;

pub use curve::{CurvePoint, ScalingCurve};
pub use recommend::{MarginalStep, Recommendation, Verdict};
pub use report::report_dir;
pub use run::{evaluate_and_report, run};

use curve::*;
use recommend::*;
use report::*;

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingReport {
    pub report_version: u32,
    pub benchmark: String,
    pub live_points: u32,
    pub records_digest: String,
    pub record_count: usize,
    pub curve: ScalingCurve,
    pub sub_linear: bool,
    pub steps: Vec<MarginalStep>,
    pub ipc_failure_levels: Vec<u32>,
    pub recommendation: Recommendation,
    pub warnings: Vec<String>,
}

pub fn evaluate(
    benchmark: &str,
    records: &[RunRecord],
    live_points: Option<u32>,
    policy: &PolicyConfig,
) -> Result<ScalingReport> {
    let canonical = canonical_records(records);
    let digest_input =
        serde_json::to_vec(&canonical).context("failed to serialize run records for digest")?;
    let records_digest = sha256_bytes(&digest_input);

    let live_points = select_live_points(&canonical, live_points)?;
    let curve = build_curve(&canonical, live_points)?;
    let steps = marginal_steps(&curve, policy.efficiency_threshold);
    let ipc_failure_levels = ipc_failure_levels(&canonical, live_points);

    let mut warnings = evaluation_count_warnings(&canonical);
    warnings.extend(run_outcome_warnings(&canonical, live_points));

    let recommendation = recommend(&curve, &steps, &ipc_failure_levels, policy, &mut warnings);

    Ok(ScalingReport {
        report_version: REPORT_VERSION,
        benchmark: benchmark.to_string(),
        live_points,
        records_digest,
        record_count: canonical.len(),
        sub_linear: curve.is_sub_linear(),
        curve,
        steps,
        ipc_failure_levels,
        recommendation,
        warnings,
    })
}

fn canonical_records(records: &[RunRecord]) -> Vec<RunRecord> {
    let mut canonical = records.to_vec();
    canonical.sort_by(|a, b| {
        a.live_points
            .cmp(&b.live_points)
            .then(a.process_count.cmp(&b.process_count))
            .then(a.run_id.cmp(&b.run_id))
            .then(a.started_at.cmp(&b.started_at))
    });
    canonical
}

fn select_live_points(records: &[RunRecord], requested: Option<u32>) -> Result<u32> {
    if let Some(live_points) = requested {
        return Ok(live_points);
    }

    let found = records
        .iter()
        .filter(|record| record.is_completed())
        .map(|record| record.live_points)
        .collect::<BTreeSet<u32>>();

    match found.len() {
        0 => bail!("no completed runs to evaluate"),
        1 => found
            .into_iter()
            .next()
            .context("no live-point count among completed runs"),
        _ => Err(ProcedureError::AmbiguousLivePoints {
            found: found
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", "),
        }
        .into()),
    }
}

fn ipc_failure_levels(records: &[RunRecord], live_points: u32) -> Vec<u32> {
    records
        .iter()
        .filter(|record| {
            record.live_points == live_points && record.outcome == RunOutcome::IpcExhausted
        })
        .map(|record| record.process_count)
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect()
}

fn run_outcome_warnings(records: &[RunRecord], live_points: u32) -> Vec<String> {
    records
        .iter()
        .filter(|record| record.live_points == live_points)
        .filter(|record| matches!(record.outcome, RunOutcome::TimedOut | RunOutcome::Failed))
        .map(|record| {
            format!(
                "run {} at {} processes ended as {} and was left out of the curve",
                record.run_id,
                record.process_count,
                record.outcome.as_str()
            )
        })
        .collect()
}

pub fn evaluation_count_warnings(records: &[RunRecord]) -> Vec<String> {
    let mut by_process: BTreeMap<u32, BTreeMap<u32, Vec<u64>>> = BTreeMap::new();
    for record in records.iter().filter(|record| record.is_completed()) {
        if let Some(count) = record.likelihood_evaluations {
            by_process
                .entry(record.process_count)
                .or_default()
                .entry(record.live_points)
                .or_default()
                .push(count);
        }
    }

    let mut warnings = Vec::new();
    for (process_count, by_live_points) in by_process {
        let medians = by_live_points
            .into_iter()
            .map(|(live_points, counts)| {
                let values = counts.iter().map(|count| *count as f64).collect::<Vec<f64>>();
                (live_points, median(&values))
            })
            .collect::<Vec<(u32, f64)>>();

        for pair in medians.windows(2) {
            let (lower_points, lower_count) = pair[0];
            let (higher_points, higher_count) = pair[1];
            if higher_count < lower_count {
                warnings.push(format!(
                    "at {process_count} processes, {higher_points} live points used fewer likelihood evaluations ({higher_count:.0}) than {lower_points} live points ({lower_count:.0})"
                ));
            }
        }
    }
    warnings
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
