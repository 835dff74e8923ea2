use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    StillScaling,
    Flattened,
    ParallelismNotCostEffective,
    InsufficientData,
    NoSafeProcessCount,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StillScaling => "still_scaling",
            Self::Flattened => "flattened",
            Self::ParallelismNotCostEffective => "parallelism_not_cost_effective",
            Self::InsufficientData => "insufficient_data",
            Self::NoSafeProcessCount => "no_safe_process_count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginalStep {
    pub from_process_count: u32,
    pub to_process_count: u32,
    pub resource_ratio: f64,
    pub marginal_speedup: f64,
    pub required_speedup: f64,
}

impl MarginalStep {
    pub fn meets_threshold(&self) -> bool {
        self.marginal_speedup >= self.required_speedup
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub verdict: Verdict,
    pub recommended_process_count: Option<u32>,
    pub decision_ratio: Option<f64>,
    pub decision_step: Option<MarginalStep>,
    pub efficiency_threshold: f64,
    pub message: String,
}

pub(super) fn marginal_steps(curve: &ScalingCurve, efficiency_threshold: f64) -> Vec<MarginalStep> {
    curve
        .points
        .windows(2)
        .map(|pair| {
            let resource_ratio =
                f64::from(pair[1].process_count) / f64::from(pair[0].process_count);
            MarginalStep {
                from_process_count: pair[0].process_count,
                to_process_count: pair[1].process_count,
                resource_ratio,
                marginal_speedup: pair[0].duration_secs / pair[1].duration_secs,
                required_speedup: efficiency_threshold.powf(resource_ratio.log2()),
            }
        })
        .collect()
}

pub(super) fn recommend(
    curve: &ScalingCurve,
    steps: &[MarginalStep],
    ipc_failure_levels: &[u32],
    policy: &PolicyConfig,
    warnings: &mut Vec<String>,
) -> Recommendation {
    let threshold = policy.efficiency_threshold;
    let baseline = curve.baseline_process_count;

    let (verdict, chosen, step) = match steps.first() {
        None => (Verdict::InsufficientData, baseline, None),
        Some(first) if first.marginal_speedup <= 1.0 + policy.flat_tolerance => {
            (Verdict::ParallelismNotCostEffective, baseline, Some(first.clone()))
        }
        Some(_) => match steps.iter().find(|step| !step.meets_threshold()) {
            Some(step) => (Verdict::Flattened, step.from_process_count, Some(step.clone())),
            None => {
                let last = steps.last().cloned();
                let largest = curve
                    .points
                    .last()
                    .map(|point| point.process_count)
                    .unwrap_or(baseline);
                (Verdict::StillScaling, largest, last)
            }
        },
    };

    let decision_ratio = step.as_ref().map(|step| step.marginal_speedup);
    let Some(recommended) = cap_below_ipc_failure(curve, chosen, ipc_failure_levels, warnings)
    else {
        let lowest_failure = ipc_failure_levels.first().copied().unwrap_or(baseline);
        return Recommendation {
            verdict: Verdict::NoSafeProcessCount,
            recommended_process_count: None,
            decision_ratio,
            decision_step: step,
            efficiency_threshold: threshold,
            message: format!(
                "shared memory ran out at {lowest_failure} processes, at or below every completed measurement; sweep process counts below {lowest_failure} before sizing"
            ),
        };
    };

    let message = match (verdict, &step) {
        (Verdict::InsufficientData, _) => format!(
            "only {baseline} processes were measured; sweep more process counts before sizing"
        ),
        (Verdict::ParallelismNotCostEffective, Some(step)) => format!(
            "going from {} to {} processes gave a speedup of {:.3}; added parallelism is not cost-effective for this configuration",
            step.from_process_count, step.to_process_count, step.marginal_speedup
        ),
        (Verdict::Flattened, Some(step)) => format!(
            "speedup from {} to {} processes was {:.3}, below the required {:.3} ({threshold} per doubling); use {recommended} processes",
            step.from_process_count, step.to_process_count, step.marginal_speedup, step.required_speedup
        ),
        (Verdict::StillScaling, Some(step)) => format!(
            "every increment met the threshold (last step {:.3} >= {:.3}); use {recommended} processes or extend the sweep",
            step.marginal_speedup, step.required_speedup
        ),
        (Verdict::NoSafeProcessCount, Some(_)) => {
            unreachable!("NoSafeProcessCount is only produced by the early return above")
        }
        (_, None) => format!("use {recommended} processes"),
    };

    Recommendation {
        verdict,
        recommended_process_count: Some(recommended),
        decision_ratio,
        decision_step: step,
        efficiency_threshold: threshold,
        message,
    }
}

fn cap_below_ipc_failure(
    curve: &ScalingCurve,
    chosen: u32,
    ipc_failure_levels: &[u32],
    warnings: &mut Vec<String>,
) -> Option<u32> {
    let Some(&lowest_failure) = ipc_failure_levels.first() else {
        return Some(chosen);
    };
    if chosen < lowest_failure {
        return Some(chosen);
    }

    let capped = curve
        .points
        .iter()
        .map(|point| point.process_count)
        .filter(|count| *count < lowest_failure)
        .max();
    match capped {
        Some(capped) => warnings.push(format!(
            "shared memory ran out at {lowest_failure} processes; recommendation lowered from {chosen} to {capped}"
        )),
        None => warnings.push(format!(
            "shared memory ran out at {lowest_failure} processes; no completed measurement lies below that level"
        )),
    }
    capped
}
