use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::SweepArgs;
use crate::commands::evaluate;
use crate::commands::launch::{LaunchRequest, ResourceBudget, launch_run, outcome_error};
use crate::config::{BenchConfig, load_config};
use crate::ledger::{insert_run_record, load_run_records, open_ledger, resolve_ledger_path};
use crate::model::{RunOutcome, RunRecord};
use crate::runner::{CommandRunner, ProcessRunner};

#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub records: Vec<RunRecord>,
    pub skipped_levels: Vec<u32>,
}

pub fn run(args: SweepArgs) -> Result<()> {
    let config = load_config(args.workload.config.as_deref())?;
    let budget = ResourceBudget::from_config(&config.budget)?;
    let ceiling = args.max_processes.unwrap_or(budget.shm_process_ceiling);
    let levels = resolve_levels(&args.levels, ceiling)?;

    let ledger_path =
        resolve_ledger_path(&args.workload.output_root, args.workload.db_path.as_deref());
    let connection = open_ledger(&ledger_path)?;

    info!(
        benchmark = %args.workload.name,
        live_points = args.workload.live_points,
        levels = ?levels,
        "starting scaling sweep"
    );

    let template = LaunchRequest::from_workload(&args.workload, 1);
    let summary = run_sweep(&ProcessRunner, &config, &budget, &template, &levels, |record| {
        insert_run_record(&connection, record)
    })?;

    let completed = summary
        .records
        .iter()
        .filter(|record| record.is_completed())
        .count();
    info!(
        runs = summary.records.len(),
        completed,
        skipped = ?summary.skipped_levels,
        "sweep finished"
    );

    if args.evaluate {
        let records = load_run_records(&connection, &args.workload.name)?;
        evaluate::evaluate_and_report(
            &config.policy,
            &records,
            &args.workload.name,
            Some(args.workload.live_points),
            &evaluate::report_dir(&args.workload.output_root, &args.workload.name),
            false,
        )?;
    }

    Ok(())
}

pub fn geometric_levels(max: u32) -> Vec<u32> {
    let mut levels = Vec::new();
    let mut level = 1_u32;
    while level <= max {
        levels.push(level);
        match level.checked_mul(2) {
            Some(next) => level = next,
            None => break,
        }
    }
    levels
}

fn resolve_levels(explicit: &[u32], ceiling: u32) -> Result<Vec<u32>> {
    if explicit.is_empty() {
        return Ok(geometric_levels(ceiling.max(1)));
    }
    if explicit.contains(&0) {
        bail!("process levels must be at least 1");
    }
    let mut levels = explicit.to_vec();
    levels.sort_unstable();
    levels.dedup();
    Ok(levels)
}

pub fn run_sweep<F>(
    runner: &dyn CommandRunner,
    config: &BenchConfig,
    budget: &ResourceBudget,
    template: &LaunchRequest,
    levels: &[u32],
    mut record_run: F,
) -> Result<SweepSummary>
where
    F: FnMut(&RunRecord) -> Result<()>,
{
    let mut summary = SweepSummary::default();
    let mut ordered = levels.to_vec();
    ordered.sort_unstable();

    let mut remaining = ordered.into_iter();
    while let Some(level) = remaining.next() {
        let check = budget.check(level);
        if !check.is_within_budget() && !template.force {
            warn!(
                process_count = level,
                violations = %check.describe_violations(),
                "skipping level over resource budget"
            );
            summary.skipped_levels.push(level);
            continue;
        }

        let request = LaunchRequest {
            process_count: level,
            ..template.clone()
        };
        let record = launch_run(runner, config, budget, &request)?;
        record_run(&record)?;
        let outcome = record.outcome;
        summary.records.push(record);

        match outcome {
            RunOutcome::Completed => {}
            RunOutcome::TimedOut => {
                warn!(
                    process_count = level,
                    "run exceeded its time budget; continuing with the next level"
                );
            }
            RunOutcome::IpcExhausted => {
                let skipped = remaining.by_ref().collect::<Vec<u32>>();
                warn!(
                    process_count = level,
                    skipped = ?skipped,
                    "shared memory exhausted; larger levels would contend for the same resource"
                );
                summary.skipped_levels.extend(skipped);
            }
            RunOutcome::Failed => {
                let last = summary.records.last();
                if let Some(err) = last.and_then(|record| outcome_error(record, template.time_budget)) {
                    return Err(err.context(format!("sweep stopped at {level} processes")));
                }
            }
        }
    }

    Ok(summary)
}
