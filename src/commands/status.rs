use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::launch::ResourceBudget;
use crate::commands::provision::resolve_env_root;
use crate::config::load_config;
use crate::ledger::{open_ledger, resolve_ledger_path, summarize_benchmarks};
use crate::model::ProvisionRecord;
use crate::runner::command_available;

pub fn run(args: StatusArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    info!(output_root = %args.output_root.display(), "status requested");

    for program in [
        config.provision.package_manager.as_str(),
        config.launcher.mpi_launcher.as_str(),
        config.launcher.python.as_str(),
    ] {
        if command_available(program) {
            info!(program = %program, "tool available");
        } else {
            warn!(program = %program, "tool not found on PATH");
        }
    }

    let budget = ResourceBudget::from_config(&config.budget)?;
    info!(
        cpu_cores = budget.cpu_cores,
        memory_bytes = ?budget.memory_bytes,
        shm_process_ceiling = budget.shm_process_ceiling,
        shm_warn_ceiling = budget.shm_warn_ceiling,
        "resource budget"
    );

    let env_root = resolve_env_root(&config.provision, &args.output_root);
    report_provisioned_environments(&env_root)?;

    let ledger_path = resolve_ledger_path(&args.output_root, args.db_path.as_deref());
    if ledger_path.exists() {
        let connection = open_ledger(&ledger_path)?;
        let summaries = summarize_benchmarks(&connection)?;
        if summaries.is_empty() {
            info!(path = %ledger_path.display(), "ledger has no runs");
        }
        for summary in summaries {
            info!(
                benchmark = %summary.benchmark,
                runs = summary.runs,
                completed = summary.completed,
                ipc_failures = summary.ipc_failures,
                "benchmark runs"
            );
        }
    } else {
        warn!(path = %ledger_path.display(), "ledger file missing");
    }

    Ok(())
}

fn report_provisioned_environments(env_root: &Path) -> Result<()> {
    if !env_root.exists() {
        warn!(path = %env_root.display(), "environment root missing");
        return Ok(());
    }

    let entries = fs::read_dir(env_root)
        .with_context(|| format!("failed to read {}", env_root.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", env_root.display()))?
            .path();
        let is_record = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(".provision.json"))
            .unwrap_or(false);
        if !is_record {
            continue;
        }

        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let record: ProvisionRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(
            environment = %record.environment,
            status = %record.status,
            scope = %record.scope,
            finished_at = %record.finished_at,
            manifest_sha256 = %record.manifest_sha256,
            "provisioned environment"
        );
    }
    Ok(())
}
