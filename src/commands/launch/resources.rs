use std::fmt;
use std::fs;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Cpu,
    Memory,
    SharedMemory,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::SharedMemory => "shared-memory",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetFinding {
    pub dimension: Dimension,
    pub requested: u64,
    pub ceiling: u64,
}

impl fmt::Display for BudgetFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} needs {} (ceiling {})", self.dimension, self.requested, self.ceiling)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetCheck {
    pub violations: Vec<BudgetFinding>,
    pub warnings: Vec<BudgetFinding>,
}

impl BudgetCheck {
    pub fn is_within_budget(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn describe_violations(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBudget {
    pub cpu_cores: u32,
    pub memory_bytes: Option<u64>,
    pub memory_per_process_bytes: u64,
    pub shm_process_ceiling: u32,
    pub shm_warn_ceiling: u32,
}

impl ResourceBudget {
    pub fn from_config(config: &BudgetConfig) -> Result<Self> {
        let cpu_cores = match config.cpu_cores {
            Some(cores) => cores,
            None => std::thread::available_parallelism()
                .map(|count| count.get() as u32)
                .context("failed to detect available CPU cores")?,
        };
        let memory_bytes = config.memory_bytes.or_else(probe_memory_bytes);

        Ok(Self::with_capacity(cpu_cores, memory_bytes, config))
    }

    pub fn with_capacity(cpu_cores: u32, memory_bytes: Option<u64>, config: &BudgetConfig) -> Self {
        let ceiling = |fraction: f64| ((f64::from(cpu_cores) * fraction).floor() as u32).max(1);
        Self {
            cpu_cores,
            memory_bytes,
            memory_per_process_bytes: config.memory_per_process_bytes,
            shm_process_ceiling: ceiling(config.shm_core_fraction),
            shm_warn_ceiling: ceiling(config.shm_warn_fraction),
        }
    }

    pub fn check(&self, process_count: u32) -> BudgetCheck {
        let mut check = BudgetCheck::default();
        let requested = u64::from(process_count);

        if process_count > self.cpu_cores {
            check.violations.push(BudgetFinding {
                dimension: Dimension::Cpu,
                requested,
                ceiling: u64::from(self.cpu_cores),
            });
        }

        if let Some(memory_bytes) = self.memory_bytes {
            let needed = requested.saturating_mul(self.memory_per_process_bytes);
            if needed > memory_bytes {
                check.violations.push(BudgetFinding {
                    dimension: Dimension::Memory,
                    requested: needed,
                    ceiling: memory_bytes,
                });
            }
        }

        if process_count > self.shm_process_ceiling {
            check.violations.push(BudgetFinding {
                dimension: Dimension::SharedMemory,
                requested,
                ceiling: u64::from(self.shm_process_ceiling),
            });
        } else if process_count > self.shm_warn_ceiling {
            check.warnings.push(BudgetFinding {
                dimension: Dimension::SharedMemory,
                requested,
                ceiling: u64::from(self.shm_warn_ceiling),
            });
        }

        check
    }
}

fn probe_memory_bytes() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

pub(super) fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}
