use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use crate::cli::{LaunchArgs, WorkloadArgs};
use crate::config::{BenchConfig, BudgetConfig, KeepAliveConfig, LauncherConfig, load_config};
use crate::error::ProcedureError;
use crate::ledger::{insert_run_record, open_ledger, resolve_ledger_path};
use crate::model::{RunOutcome, RunRecord};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
use crate::util::{ensure_directory, now_utc_string, tail_lines, utc_compact_string, write_json_pretty};

mod command;
mod keepalive;
mod resources;
mod run;
mod sampler_output;

pub use command::run_output_dir;
pub use resources::{Dimension, ResourceBudget};
pub use run::{launch_run, outcome_error, run};

use command::*;
use keepalive::*;
use sampler_output::*;

pub const RUN_RECORD_FILE_NAME: &str = "run_record.json";
pub const DEFAULT_DATA_FILE: &str = "hst_example_clear_spec.txt";

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub benchmark: String,
    pub script: PathBuf,
    pub data_dir: PathBuf,
    pub data_file: Option<String>,
    pub output_root: PathBuf,
    pub process_count: u32,
    pub live_points: u32,
    pub resume: bool,
    pub evaluate_only: bool,
    pub time_budget: Option<Duration>,
    pub keep_alive: bool,
    pub expect_long: bool,
    pub force: bool,
}

impl LaunchRequest {
    pub fn from_workload(workload: &WorkloadArgs, process_count: u32) -> Self {
        Self {
            benchmark: workload.name.clone(),
            script: workload.script.clone(),
            data_dir: workload.prt_data.clone(),
            data_file: workload.data_file.clone(),
            output_root: workload.output_root.clone(),
            process_count,
            live_points: workload.live_points,
            resume: workload.resume,
            evaluate_only: workload.evaluate_only,
            time_budget: workload.time_budget_secs.map(Duration::from_secs),
            keep_alive: workload.keep_alive,
            expect_long: workload.expect_long,
            force: workload.force,
        }
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.data_dir
            .join(self.data_file.as_deref().unwrap_or(DEFAULT_DATA_FILE))
    }
}
