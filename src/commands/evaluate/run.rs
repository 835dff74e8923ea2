use super::*;

pub fn run(args: EvaluateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut policy = config.policy.clone();
    if let Some(threshold) = args.efficiency_threshold {
        if threshold <= 1.0 {
            bail!("--efficiency-threshold must be greater than 1.0, got {threshold}");
        }
        policy.efficiency_threshold = threshold;
    }

    let records = if args.from_files {
        collect_record_files(&args.output_root, &args.name)?
    } else {
        let ledger_path = resolve_ledger_path(&args.output_root, args.db_path.as_deref());
        let connection = open_ledger(&ledger_path)?;
        load_run_records(&connection, &args.name)?
    };

    let dir = args
        .report_dir
        .clone()
        .unwrap_or_else(|| report_dir(&args.output_root, &args.name));
    evaluate_and_report(&policy, &records, &args.name, args.live_points, &dir, args.json)?;
    Ok(())
}

pub fn evaluate_and_report(
    policy: &PolicyConfig,
    records: &[RunRecord],
    benchmark: &str,
    live_points: Option<u32>,
    dir: &Path,
    json: bool,
) -> Result<ScalingReport> {
    info!(
        benchmark = %benchmark,
        records = records.len(),
        efficiency_threshold = policy.efficiency_threshold,
        "evaluating scaling"
    );

    let report = evaluate(benchmark, records, live_points, policy)?;
    write_report_artifacts(dir, &report)?;

    for warning in &report.warnings {
        warn!(warning = %warning, "scaling evaluation warning");
    }
    info!(
        verdict = report.recommendation.verdict.as_str(),
        recommended_process_count = ?report.recommendation.recommended_process_count,
        decision_ratio = ?report.recommendation.decision_ratio,
        efficiency_threshold = report.recommendation.efficiency_threshold,
        sub_linear = report.sub_linear,
        report_dir = %dir.display(),
        "scaling evaluation complete"
    );

    if json {
        let payload =
            serde_json::to_string_pretty(&report).context("failed to serialize scaling report")?;
        println!("{payload}");
    } else {
        print!("{}", render_table(&report));
    }

    Ok(report)
}
