use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "fornax-bench",
    version,
    about = "Environment provisioning and MPI scaling benchmarks for nested-sampling retrievals"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Manifests(ManifestsArgs),
    Provision(ProvisionArgs),
    Launch(LaunchArgs),
    Sweep(SweepArgs),
    Evaluate(EvaluateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ManifestsArgs {
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub inventory_path: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProvisionScope {
    User,
    Shared,
}

impl ProvisionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Shared => "shared",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProvisionArgs {
    #[arg(long, default_value = ".cache/fornax-bench")]
    pub output_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub manifest: PathBuf,

    #[arg(long, value_enum, default_value_t = ProvisionScope::User)]
    pub scope: ProvisionScope,

    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    #[arg(long, default_value = ".cache/fornax-bench")]
    pub output_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub script: PathBuf,

    #[arg(long)]
    pub prt_data: PathBuf,

    #[arg(long)]
    pub data_file: Option<String>,

    #[arg(long, default_value = "hst_example_clear_spec")]
    pub name: String,

    #[arg(long, default_value_t = 40)]
    pub live_points: u32,

    #[arg(long, default_value_t = false)]
    pub resume: bool,

    #[arg(long, default_value_t = false)]
    pub evaluate_only: bool,

    #[arg(long)]
    pub time_budget_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub keep_alive: bool,

    #[arg(long, default_value_t = false)]
    pub expect_long: bool,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[arg(long, default_value_t = 1)]
    pub processes: u32,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[arg(long = "levels", value_delimiter = ',')]
    pub levels: Vec<u32>,

    #[arg(long)]
    pub max_processes: Option<u32>,

    #[arg(long, default_value_t = false)]
    pub evaluate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/fornax-bench")]
    pub output_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = "hst_example_clear_spec")]
    pub name: String,

    #[arg(long)]
    pub live_points: Option<u32>,

    #[arg(long)]
    pub efficiency_threshold: Option<f64>,

    #[arg(long, default_value_t = false)]
    pub from_files: bool,

    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/fornax-bench")]
    pub output_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
