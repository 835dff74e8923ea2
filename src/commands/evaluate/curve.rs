use super::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    pub process_count: u32,
    pub runs: usize,
    pub duration_secs: f64,
    pub likelihood_evaluations: Option<u64>,
    pub speedup: f64,
    pub efficiency: f64,
    pub per_eval_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingCurve {
    pub live_points: u32,
    pub baseline_process_count: u32,
    pub points: Vec<CurvePoint>,
}

impl ScalingCurve {
    pub fn is_sub_linear(&self) -> bool {
        self.points.len() >= 2
            && self
                .points
                .windows(2)
                .all(|pair| pair[1].efficiency < pair[0].efficiency)
    }
}

pub(super) fn build_curve(records: &[RunRecord], live_points: u32) -> Result<ScalingCurve> {
    let mut grouped: BTreeMap<u32, Vec<&RunRecord>> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|record| record.is_completed() && record.live_points == live_points)
    {
        grouped.entry(record.process_count).or_default().push(record);
    }

    if grouped.is_empty() {
        bail!("no completed runs at {live_points} live points");
    }

    let mut points = Vec::with_capacity(grouped.len());
    for (process_count, runs) in &grouped {
        let durations = runs
            .iter()
            .map(|record| record.duration_secs)
            .collect::<Vec<f64>>();
        let duration_secs = median(&durations);
        if !(duration_secs.is_finite() && duration_secs > 0.0) {
            bail!("run duration at {process_count} processes must be positive, got {duration_secs}");
        }

        let evaluations = runs
            .iter()
            .filter_map(|record| record.likelihood_evaluations)
            .map(|count| count as f64)
            .collect::<Vec<f64>>();
        let likelihood_evaluations =
            (!evaluations.is_empty()).then(|| median(&evaluations).round() as u64);

        points.push(CurvePoint {
            process_count: *process_count,
            runs: runs.len(),
            duration_secs,
            likelihood_evaluations,
            speedup: 1.0,
            efficiency: 1.0,
            per_eval_secs: likelihood_evaluations
                .filter(|count| *count > 0)
                .map(|count| duration_secs / count as f64),
        });
    }

    let baseline = points[0].clone();
    for point in points.iter_mut().skip(1) {
        point.speedup = baseline.duration_secs / point.duration_secs;
        let resource_multiple =
            f64::from(point.process_count) / f64::from(baseline.process_count);
        point.efficiency = point.speedup / resource_multiple;
    }

    Ok(ScalingCurve {
        live_points,
        baseline_process_count: baseline.process_count,
        points,
    })
}
