use super::*;

pub fn run_output_dir(output_root: &Path, benchmark: &str, process_count: u32, live_points: u32) -> PathBuf {
    output_root
        .join("runs")
        .join(benchmark)
        .join(format!("np{process_count}_nlive{live_points}"))
}

pub(super) fn build_launch_command(
    config: &LauncherConfig,
    request: &LaunchRequest,
    output_dir: &Path,
) -> CommandSpec {
    let distributed = request.process_count > 1;

    let mut spec = if distributed {
        let mut spec = CommandSpec::new(&config.mpi_launcher)
            .arg("-np")
            .arg(request.process_count.to_string());
        for extra in &config.extra_mpi_args {
            spec = spec.arg(extra);
        }
        spec.arg(&config.python)
    } else {
        CommandSpec::new(&config.python)
    };

    spec = spec
        .arg(request.script.display().to_string())
        .arg("--prt-data")
        .arg(request.data_dir.display().to_string())
        .arg("--output-dir")
        .arg(output_dir.display().to_string())
        .arg("--name")
        .arg(&request.benchmark)
        .arg("--n-live-points")
        .arg(request.live_points.to_string())
        .arg("--omp-threads")
        .arg(config.omp_threads.to_string());

    if distributed {
        spec = spec.arg("--use-mpi");
    }
    if request.resume {
        spec = spec.arg("--resume");
    }
    if request.evaluate_only {
        spec = spec.arg("--evaluate-only");
    }

    spec.env("OMP_NUM_THREADS", config.omp_threads.to_string())
        .env("PRT_INPUT_DATA_PATH", request.data_dir.display().to_string())
}
