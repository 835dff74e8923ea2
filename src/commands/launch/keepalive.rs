use std::fs;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::*;

const STOP_POLL: Duration = Duration::from_millis(500);

pub(super) fn should_arm(
    config: &KeepAliveConfig,
    requested: bool,
    time_budget: Option<Duration>,
    expect_long: bool,
) -> bool {
    if !requested {
        return false;
    }
    let long_enough = expect_long
        || time_budget.is_some_and(|budget| budget.as_secs() >= config.min_expected_secs);
    if !long_enough {
        warn!(
            min_expected_secs = config.min_expected_secs,
            "keep-alive skipped; it bills continuously and this job is not expected to be long"
        );
    }
    long_enough
}

pub(super) struct KeepAliveGuard {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAliveGuard {
    pub(super) fn start(config: &KeepAliveConfig, heartbeat_path: PathBuf) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(config.interval_secs);
        let command = config.command.clone();
        let flag = Arc::clone(&stop);

        info!(
            interval_secs = config.interval_secs,
            heartbeat = %heartbeat_path.display(),
            "keep-alive armed"
        );

        let handle = thread::spawn(move || {
            let mut waited = interval;
            while !flag.load(Ordering::Relaxed) {
                if waited >= interval {
                    beat(&heartbeat_path, &command);
                    waited = Duration::ZERO;
                }
                thread::sleep(STOP_POLL);
                waited += STOP_POLL;
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("keep-alive released");
    }
}

fn beat(heartbeat_path: &Path, command: &[String]) {
    if let Err(err) = fs::write(heartbeat_path, format!("{}\n", now_utc_string())) {
        warn!(error = %err, path = %heartbeat_path.display(), "failed to write heartbeat");
    }

    let Some((program, args)) = command.split_first() else {
        return;
    };
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if !status.success() => {
            warn!(program = %program, code = ?status.code(), "keep-alive command failed");
        }
        Err(err) => warn!(program = %program, error = %err, "keep-alive command could not start"),
        Ok(_) => {}
    }
}
