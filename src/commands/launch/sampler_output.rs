use super::*;

const IPC_MARKERS: [&str; 7] = [
    "/dev/shm",
    "shm_open",
    "shmem",
    "vader",
    "shared memory",
    "sm_segment",
    "bus error",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct SamplerSummary {
    pub log_evidence: Option<f64>,
    pub log_evidence_error: Option<f64>,
    pub likelihood_evaluations: Option<u64>,
}

pub(super) struct SamplerOutputParser {
    evidence: Regex,
    global_evidence: Regex,
    evaluations: Regex,
}

impl SamplerOutputParser {
    pub(super) fn new() -> Result<Self> {
        Ok(Self {
            evidence: Regex::new(r"ln\(ev\)\s*=\s*(\S+)\s*\+/-\s*(\S+)")
                .context("failed to compile evidence regex")?,
            global_evidence: Regex::new(
                r"(?i)global\s+log-evidence\s*:\s*(\S+)\s*\+/-\s*(\S+)",
            )
            .context("failed to compile global evidence regex")?,
            evaluations: Regex::new(r"(?i)total\s+likelihood\s+evaluations\s*:?\s*(\d+)")
                .context("failed to compile evaluation-count regex")?,
        })
    }

    pub(super) fn parse(&self, stdout: &str) -> SamplerSummary {
        let mut summary = SamplerSummary::default();

        for pattern in [&self.evidence, &self.global_evidence] {
            if let Some(captures) = pattern.captures_iter(stdout).last() {
                let value = captures.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
                let error = captures.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
                if value.is_some() {
                    summary.log_evidence = value;
                    summary.log_evidence_error = error;
                }
            }
        }

        summary.likelihood_evaluations = self
            .evaluations
            .captures_iter(stdout)
            .last()
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());

        summary
    }
}

pub(super) fn classify_outcome(output: &CommandOutput) -> RunOutcome {
    if output.timed_out {
        return RunOutcome::TimedOut;
    }
    if output.success {
        return RunOutcome::Completed;
    }
    let text = format!("{}\n{}", output.stderr, output.stdout).to_ascii_lowercase();
    if IPC_MARKERS.iter().any(|marker| text.contains(marker)) {
        return RunOutcome::IpcExhausted;
    }
    RunOutcome::Failed
}
