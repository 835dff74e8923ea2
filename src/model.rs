use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    IpcExhausted,
    TimedOut,
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::IpcExhausted => "ipc_exhausted",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "ipc_exhausted" => Some(Self::IpcExhausted),
            "timed_out" => Some(Self::TimedOut),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub benchmark: String,
    pub process_count: u32,
    pub live_points: u32,
    pub duration_secs: f64,
    pub likelihood_evaluations: Option<u64>,
    pub log_evidence: Option<f64>,
    pub log_evidence_error: Option<f64>,
    pub outcome: RunOutcome,
    pub output_dir: String,
    pub started_at: String,
    pub finished_at: String,
    pub failure_reason: Option<String>,
}

impl RunRecord {
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRecord {
    pub manifest_version: u32,
    pub environment: String,
    pub manifest_path: String,
    pub manifest_sha256: String,
    pub scope: String,
    pub command: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub failure_reason: Option<String>,
}
