use std::io::{BufRead, BufReader, ErrorKind, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub interactive: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
}

pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if spec.interactive {
            command.stdin(Stdio::inherit()).stdout(Stdio::inherit());
        } else {
            command.stdin(Stdio::null()).stdout(Stdio::piped());
            #[cfg(unix)]
            command.process_group(0);
        }
        command.stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to execute {}", spec.program))?;

        let stdout_drain = child.stdout.take().map(|stream| Drain::start(stream, "stdout"));
        let stderr_drain = child.stderr.take().map(|stream| Drain::start(stream, "stderr"));

        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to poll {}", spec.program))?
            {
                break status;
            }
            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                warn!(
                    program = %spec.program,
                    elapsed_secs = started.elapsed().as_secs(),
                    "time budget exceeded; terminating process group"
                );
                timed_out = true;
                break terminate(&mut child, spec)?;
            }
            thread::sleep(POLL_INTERVAL);
        };
        let elapsed = started.elapsed();

        let drain_deadline = timed_out.then(|| Instant::now() + DRAIN_GRACE);
        let stdout = stdout_drain
            .map(|drain| drain.finish(drain_deadline))
            .unwrap_or_default();
        let stderr = stderr_drain
            .map(|drain| drain.finish(drain_deadline))
            .unwrap_or_default();

        Ok(CommandOutput {
            exit_code: status.code(),
            success: status.success() && !timed_out,
            stdout,
            stderr,
            elapsed,
            timed_out,
        })
    }
}

fn terminate(child: &mut Child, spec: &CommandSpec) -> Result<ExitStatus> {
    if spec.interactive {
        child
            .kill()
            .with_context(|| format!("failed to kill {}", spec.program))?;
        return child
            .wait()
            .with_context(|| format!("failed to reap {}", spec.program));
    }

    signal_group(child.id(), "TERM");
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if child
            .try_wait()
            .with_context(|| format!("failed to poll {}", spec.program))?
            .is_some()
        {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if !signal_group(child.id(), "KILL") {
        let _ = child.kill();
    }
    child
        .wait()
        .with_context(|| format!("failed to reap {}", spec.program))
}

fn signal_group(pgid: u32, signal: &str) -> bool {
    let delivered = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if !delivered {
        debug!(pgid, signal, "process group signal not delivered");
    }
    delivered
}

struct Drain {
    collected: Arc<Mutex<String>>,
    handle: thread::JoinHandle<()>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(stream: R, label: &'static str) -> Self {
        let collected = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&collected);
        let handle = thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']);
                        debug!(stream = label, "{line}");
                        let mut collected =
                            sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        collected.push_str(line);
                        collected.push('\n');
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(stream = label, error = %err, "stopped reading child output");
                        break;
                    }
                }
            }
        });
        Self { collected, handle }
    }

    fn finish(self, deadline: Option<Instant>) -> String {
        if let Some(deadline) = deadline {
            while !self.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
        }
        if deadline.is_none() || self.handle.is_finished() {
            let _ = self.handle.join();
        } else {
            warn!("child output still open after termination; keeping what was read");
        }
        let collected = self
            .collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collected.clone()
    }
}

pub fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
pub mod fake {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    use anyhow::{Result, anyhow};

    use super::{CommandOutput, CommandRunner, CommandSpec};

    #[derive(Default)]
    pub struct ScriptedRunner {
        pub outputs: RefCell<VecDeque<CommandOutput>>,
        pub calls: RefCell<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new(outputs: Vec<CommandOutput>) -> Self {
            Self {
                outputs: RefCell::new(outputs.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec, _timeout: Option<Duration>) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.clone());
            self.outputs
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted output left for {}", spec.program))
        }
    }

    pub fn success(stdout: &str, secs: f64) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::from_secs_f64(secs),
            timed_out: false,
        }
    }

    pub fn failure(stderr: &str, secs: f64) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            elapsed: Duration::from_secs_f64(secs),
            timed_out: false,
        }
    }

    pub fn timeout(secs: f64) -> CommandOutput {
        CommandOutput {
            exit_code: None,
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::from_secs_f64(secs),
            timed_out: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{CommandRunner, CommandSpec, ProcessRunner};

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("mpirun").arg("-np").arg("4").env("OMP_NUM_THREADS", "1");
        assert_eq!(spec.display(), "mpirun -np 4");
        assert_eq!(spec.env, vec![("OMP_NUM_THREADS".to_string(), "1".to_string())]);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_stops_workers_spawned_by_the_child() {
        let spec = CommandSpec::new("sh").arg("-c").arg("sleep 30 & wait");
        let started = Instant::now();
        let output = ProcessRunner
            .run(&spec, Some(Duration::from_secs(1)))
            .expect("run");

        assert!(output.timed_out);
        assert!(!output.success);
        assert!(
            started.elapsed() < Duration::from_secs(15),
            "run returned after {:?}",
            started.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_output_is_drained_to_the_end() {
        let script = "printf '\\377\\n'; yes 0123456789abcdef | head -n 20000; \
                      echo 'Total Likelihood Evaluations: 42'";
        let output = ProcessRunner
            .run(&CommandSpec::new("sh").arg("-c").arg(script), None)
            .expect("run");

        assert!(output.success);
        assert!(!output.timed_out);
        assert!(output.stdout.starts_with('\u{FFFD}'));
        assert!(output.stdout.contains("Total Likelihood Evaluations: 42"));
        assert_eq!(output.stdout.lines().count(), 20002);
    }
}
