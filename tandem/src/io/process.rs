//! Named child processes with streamed output and bounded waits.
//!
//! The [`ProcessRunner`] trait decouples the mission loop from how agent
//! processes are actually launched. The real implementation
//! ([`ShellRunner`]) tracks children by name, drains their combined output
//! line-by-line to registered observers, and supports killing everything at
//! once. Tests use scripted runners that replay predetermined output
//! without spawning processes.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Observer invoked with `(process_name, line)` for every output line.
pub type OutputObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Capability to launch and supervise named agent processes.
///
/// Implementations must broadcast every non-empty output line of a process
/// to all subscribed observers, attributed to the process name.
pub trait ProcessRunner {
    /// Launch `command` in `workdir`, tracked under `name`. A launch
    /// failure is reported to observers under `name` and returned as an
    /// error.
    fn run(&self, name: &str, command: &[String], workdir: &Path) -> Result<()>;

    /// Block until the named process exits. Returns `false` if the timeout
    /// elapsed first; the process is left running for the caller to kill.
    /// An unknown name counts as already finished.
    fn wait(&self, name: &str, timeout: Duration) -> bool;

    /// Terminate every tracked process that has not yet exited. After this
    /// returns, [`ProcessRunner::active_count`] is zero.
    fn kill_all(&self);

    /// Number of tracked processes still running.
    fn active_count(&self) -> usize;

    /// Register an output observer.
    fn subscribe(&self, observer: OutputObserver);
}

/// How often `wait` re-checks a child that has not exited yet. Short enough
/// that `kill_all` from another thread is picked up promptly.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`ProcessRunner`] backed by real OS processes.
pub struct ShellRunner {
    children: Mutex<HashMap<String, Child>>,
    observers: Arc<Mutex<Vec<OutputObserver>>>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn broadcast(observers: &Mutex<Vec<OutputObserver>>, name: &str, line: &str) {
        let snapshot: Vec<OutputObserver> = match observers.lock() {
            Ok(list) => list.clone(),
            Err(_) => return,
        };
        for observer in &snapshot {
            observer(name, line);
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, name: &str, command: &[String], workdir: &Path) -> Result<()> {
        let (bin, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("empty command for process '{name}'"))?;
        info!(name, bin = %bin, workdir = %workdir.display(), "starting process");

        let mut child = match Command::new(bin)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                Self::broadcast(
                    &self.observers,
                    name,
                    &format!("failed to start process: {err}"),
                );
                return Err(err).with_context(|| format!("spawn '{bin}' for process '{name}'"));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped for '{name}'"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped for '{name}'"))?;
        spawn_line_reader(name, stdout, Arc::clone(&self.observers));
        spawn_line_reader(name, stderr, Arc::clone(&self.observers));

        let mut children = self
            .children
            .lock()
            .map_err(|_| anyhow!("process registry poisoned"))?;
        if let Some(mut previous) = children.insert(name.to_string(), child)
            && matches!(previous.try_wait(), Ok(None))
        {
            warn!(name, "replacing a still-running process; killing the old one");
            let _ = previous.kill();
            let _ = previous.wait();
        }
        Ok(())
    }

    fn wait(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Take the child out, poll it, and put it back if still
            // running. Short lock acquisitions so kill_all can interleave.
            let exited = {
                let Ok(mut children) = self.children.lock() else {
                    return true;
                };
                match children.remove(name) {
                    None => return true,
                    Some(mut child) => match child.try_wait() {
                        Ok(Some(status)) => Some(status),
                        Ok(None) => {
                            children.insert(name.to_string(), child);
                            None
                        }
                        Err(err) => {
                            warn!(name, err = %err, "failed to poll process; dropping it");
                            return true;
                        }
                    },
                }
            };

            if let Some(status) = exited {
                debug!(name, code = ?status.code(), "process exited");
                Self::broadcast(
                    &self.observers,
                    name,
                    &format!("process exited with status {status}"),
                );
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn kill_all(&self) {
        let drained: Vec<(String, Child)> = match self.children.lock() {
            Ok(mut children) => children.drain().collect(),
            Err(_) => return,
        };
        for (name, mut child) in drained {
            if matches!(child.try_wait(), Ok(Some(_))) {
                continue;
            }
            warn!(name = %name, "killing process");
            if let Err(err) = child.kill() {
                warn!(name = %name, err = %err, "failed to kill process");
            }
            let _ = child.wait();
            Self::broadcast(&self.observers, &name, "process killed");
        }
    }

    fn active_count(&self) -> usize {
        let Ok(mut children) = self.children.lock() else {
            return 0;
        };
        children.retain(|_, child| matches!(child.try_wait(), Ok(None)));
        children.len()
    }

    fn subscribe(&self, observer: OutputObserver) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    name: &str,
    stream: R,
    observers: Arc<Mutex<Vec<OutputObserver>>>,
) {
    let name = name.to_string();
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        ShellRunner::broadcast(&observers, &name, trimmed);
                    }
                }
                Err(err) => {
                    ShellRunner::broadcast(&observers, &name, &format!("error reading stream: {err}"));
                    break;
                }
            }
        }
    });
}

/// Whether a broadcast line was injected by the runner itself (launch
/// failures, exit reports, stream errors) rather than spoken by the agent.
/// Consumers that want only agent output filter on this.
pub fn is_lifecycle_line(line: &str) -> bool {
    line.starts_with("failed to start process")
        || line.starts_with("process exited with status")
        || line.starts_with("process killed")
        || line.starts_with("error reading stream")
}

/// Captured output of a one-shot supervised command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Stdout and stderr joined for reporting.
    pub fn combined(&self) -> String {
        let mut buf = self.stdout.trim_end().to_string();
        if !self.stderr.trim().is_empty() {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(self.stderr.trim_end());
        }
        if self.truncated_bytes > 0 {
            buf.push_str(&format!("\n[output truncated {} bytes]", self.truncated_bytes));
        }
        buf
    }
}

/// Run a one-shot command with a timeout, capturing bounded stdout/stderr
/// without risking pipe deadlocks.
///
/// Output is drained concurrently while the child runs; bytes beyond
/// `output_limit_bytes` per stream are discarded but still read. On timeout
/// the child is killed and `timed_out` is set.
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(timeout_secs = timeout.as_secs(), "spawning command");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = spawn_limited_reader(stdout, output_limit_bytes);
    let stderr_handle = spawn_limited_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle)?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle)?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated_bytes: stdout_truncated + stderr_truncated,
        timed_out,
    })
}

type ReaderHandle = thread::JoinHandle<Result<(String, usize)>>;

fn spawn_limited_reader(stream: impl Read + Send + 'static, limit: usize) -> ReaderHandle {
    thread::spawn(move || read_limited(stream, limit))
}

fn join_reader(handle: ReaderHandle) -> Result<(String, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(String, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}
