use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_MANIFEST_PREFIX: &str = "conda-";
pub const DEFAULT_MPI_LAUNCHER: &str = "mpirun";
pub const DEFAULT_PYTHON: &str = "python";
pub const DEFAULT_PACKAGE_MANAGER: &str = "conda";
pub const DEFAULT_EFFICIENCY_THRESHOLD: f64 = 1.5;
pub const DEFAULT_FLAT_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub provision: ProvisionConfig,
    pub launcher: LauncherConfig,
    pub budget: BudgetConfig,
    pub policy: PolicyConfig,
    pub keepalive: KeepAliveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub package_manager: String,
    pub manifest_prefix: String,
    pub env_root: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            package_manager: DEFAULT_PACKAGE_MANAGER.to_string(),
            manifest_prefix: DEFAULT_MANIFEST_PREFIX.to_string(),
            env_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub mpi_launcher: String,
    pub python: String,
    pub omp_threads: u32,
    pub extra_mpi_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            mpi_launcher: DEFAULT_MPI_LAUNCHER.to_string(),
            python: DEFAULT_PYTHON.to_string(),
            omp_threads: 1,
            extra_mpi_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub cpu_cores: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub memory_per_process_bytes: u64,
    pub shm_core_fraction: f64,
    pub shm_warn_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cpu_cores: None,
            memory_bytes: None,
            memory_per_process_bytes: 1 << 30,
            shm_core_fraction: 0.75,
            shm_warn_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub efficiency_threshold: f64,
    pub flat_tolerance: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            efficiency_threshold: DEFAULT_EFFICIENCY_THRESHOLD,
            flat_tolerance: DEFAULT_FLAT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub interval_secs: u64,
    pub min_expected_secs: u64,
    pub command: Vec<String>,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_expected_secs: 2 * 60 * 60,
            command: Vec::new(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<BenchConfig> {
    let Some(path) = path else {
        return Ok(BenchConfig::default());
    };

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config: BenchConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    validate_config(&config).with_context(|| format!("invalid config {}", path.display()))?;

    info!(path = %path.display(), "loaded config");
    Ok(config)
}

fn validate_config(config: &BenchConfig) -> Result<()> {
    if config.policy.efficiency_threshold <= 1.0 {
        bail!(
            "policy.efficiency_threshold must be greater than 1.0, got {}",
            config.policy.efficiency_threshold
        );
    }
    if config.policy.flat_tolerance < 0.0 {
        bail!("policy.flat_tolerance must not be negative");
    }
    let budget = &config.budget;
    if !(0.0..=1.0).contains(&budget.shm_core_fraction) || budget.shm_core_fraction == 0.0 {
        bail!("budget.shm_core_fraction must be in (0, 1]");
    }
    if budget.shm_warn_fraction > budget.shm_core_fraction {
        bail!("budget.shm_warn_fraction must not exceed budget.shm_core_fraction");
    }
    if config.launcher.omp_threads == 0 {
        bail!("launcher.omp_threads must be at least 1");
    }
    if config.keepalive.interval_secs == 0 {
        bail!("keepalive.interval_secs must be at least 1");
    }
    if config.provision.manifest_prefix.trim().is_empty() {
        bail!("provision.manifest_prefix must not be empty");
    }
    Ok(())
}
