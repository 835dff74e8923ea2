use super::*;

pub fn run(args: LaunchArgs) -> Result<()> {
    let config = load_config(args.workload.config.as_deref())?;
    let budget = ResourceBudget::from_config(&config.budget)?;
    let request = LaunchRequest::from_workload(&args.workload, args.processes);

    let ledger_path = resolve_ledger_path(&args.workload.output_root, args.workload.db_path.as_deref());
    let connection = open_ledger(&ledger_path)?;

    let record = launch_run(&ProcessRunner, &config, &budget, &request)?;
    insert_run_record(&connection, &record)?;
    info!(
        run_id = %record.run_id,
        ledger = %ledger_path.display(),
        "recorded run"
    );

    if let Some(err) = outcome_error(&record, request.time_budget) {
        return Err(err);
    }

    info!(
        process_count = record.process_count,
        live_points = record.live_points,
        duration_secs = record.duration_secs,
        likelihood_evaluations = ?record.likelihood_evaluations,
        log_evidence = ?record.log_evidence,
        log_evidence_error = ?record.log_evidence_error,
        output_dir = %record.output_dir,
        "run completed"
    );
    Ok(())
}

pub fn launch_run(
    runner: &dyn CommandRunner,
    config: &BenchConfig,
    budget: &ResourceBudget,
    request: &LaunchRequest,
) -> Result<RunRecord> {
    if request.process_count == 0 {
        bail!("process count must be at least 1");
    }
    if request.live_points == 0 {
        bail!("live-point count must be at least 1");
    }

    let check = budget.check(request.process_count);
    for finding in &check.warnings {
        warn!(
            process_count = request.process_count,
            finding = %finding,
            "process count is in the range where shared memory tends to saturate"
        );
    }
    if !check.is_within_budget() {
        if request.force {
            warn!(
                process_count = request.process_count,
                violations = %check.describe_violations(),
                "launching over budget because --force was given"
            );
        } else {
            return Err(ProcedureError::BudgetExceeded {
                process_count: request.process_count,
                violations: check.describe_violations(),
            }
            .into());
        }
    }

    let data_file = request.data_file_path();
    if !data_file.exists() {
        bail!(
            "cannot find data file {}; expected it in the --prt-data directory",
            data_file.display()
        );
    }

    let output_dir = run_output_dir(
        &request.output_root,
        &request.benchmark,
        request.process_count,
        request.live_points,
    );
    ensure_directory(&output_dir)?;

    let spec = build_launch_command(&config.launcher, request, &output_dir);
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!(
        "run-{}-np{}-nlive{}",
        utc_compact_string(started_ts),
        request.process_count,
        request.live_points
    );

    info!(
        run_id = %run_id,
        process_count = request.process_count,
        live_points = request.live_points,
        command = %spec.display(),
        "launching retrieval"
    );

    let output = {
        let _keepalive = should_arm(
            &config.keepalive,
            request.keep_alive,
            request.time_budget,
            request.expect_long,
        )
        .then(|| KeepAliveGuard::start(&config.keepalive, output_dir.join("heartbeat")));
        runner.run(&spec, request.time_budget)?
    };

    let parser = SamplerOutputParser::new()?;
    let summary = parser.parse(&output.stdout);
    let outcome = classify_outcome(&output);
    let failure_reason = match outcome {
        RunOutcome::Completed => None,
        RunOutcome::TimedOut => Some("time budget exceeded".to_string()),
        RunOutcome::IpcExhausted | RunOutcome::Failed => Some(format!(
            "exit code {:?}: {}",
            output.exit_code,
            tail_lines(&output.stderr, 20)
        )),
    };

    let record = RunRecord {
        run_id,
        benchmark: request.benchmark.clone(),
        process_count: request.process_count,
        live_points: request.live_points,
        duration_secs: output.elapsed.as_secs_f64(),
        likelihood_evaluations: summary.likelihood_evaluations,
        log_evidence: summary.log_evidence,
        log_evidence_error: summary.log_evidence_error,
        outcome,
        output_dir: output_dir.display().to_string(),
        started_at,
        finished_at: now_utc_string(),
        failure_reason,
    };

    write_json_pretty(&output_dir.join(RUN_RECORD_FILE_NAME), &record)?;

    if outcome == RunOutcome::Completed && summary.likelihood_evaluations.is_none() {
        warn!(run_id = %record.run_id, "sampler output had no likelihood-evaluation count");
    }

    Ok(record)
}

pub fn outcome_error(record: &RunRecord, time_budget: Option<Duration>) -> Option<anyhow::Error> {
    match record.outcome {
        RunOutcome::Completed => None,
        RunOutcome::IpcExhausted => Some(
            ProcedureError::IpcExhausted {
                process_count: record.process_count,
            }
            .into(),
        ),
        RunOutcome::TimedOut => Some(
            ProcedureError::NonConvergence {
                budget_secs: time_budget.map(|budget| budget.as_secs()).unwrap_or_default(),
            }
            .into(),
        ),
        RunOutcome::Failed => Some(anyhow::anyhow!(
            "retrieval run {} failed: {}",
            record.run_id,
            record.failure_reason.clone().unwrap_or_default()
        )),
    }
}
