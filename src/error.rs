use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error(
        "manifest {path} is not discoverable: file name must start with '{prefix}' and end in .yml or .yaml; rename it and retry"
    )]
    Discovery { path: PathBuf, prefix: String },

    #[error("manifest {path} is invalid: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("dependency resolution failed for environment '{environment}'; edit the manifest and retry:\n{stderr}")]
    DependencyResolution { environment: String, stderr: String },

    #[error("storage exhausted while creating environment '{environment}'; free space in {location} before retrying")]
    StorageExhausted { environment: String, location: String },

    #[error(
        "shared interprocess memory exhausted with {process_count} processes; reduce the process count and retry (requesting more RAM does not help)"
    )]
    IpcExhausted { process_count: u32 },

    #[error(
        "run did not finish within {budget_secs}s; it can be cancelled or restarted with --resume"
    )]
    NonConvergence { budget_secs: u64 },

    #[error("process count {process_count} exceeds the resource budget: {violations}")]
    BudgetExceeded {
        process_count: u32,
        violations: String,
    },

    #[error("records contain several live-point counts ({found}); pass --live-points to choose one")]
    AmbiguousLivePoints { found: String },
}
