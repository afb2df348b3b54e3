//! Test-only process runner double with deterministic, scripted behavior.
//!
//! [`ScriptedRunner`] stands in for real agent processes: each `run` call
//! consumes the next scripted invocation, broadcasts its output lines to
//! observers, and later reports the scripted wait outcome. Deterministic by
//! construction so end-to-end mission scenarios are reproducible fixtures.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::io::process::{OutputObserver, ProcessRunner};

/// One scripted agent invocation.
#[derive(Debug, Clone)]
pub struct ScriptedInvocation {
    /// Output lines broadcast to observers when the process "runs".
    pub lines: Vec<String>,
    /// Whether `wait` reports the process as finished in time.
    pub finishes: bool,
}

impl ScriptedInvocation {
    /// An invocation that prints the given lines and finishes in time.
    pub fn says<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            finishes: true,
        }
    }

    /// An invocation that prints nothing and finishes in time.
    pub fn silent() -> Self {
        Self {
            lines: Vec::new(),
            finishes: true,
        }
    }

    /// An invocation that never finishes: `wait` reports a timeout.
    pub fn hangs() -> Self {
        Self {
            lines: Vec::new(),
            finishes: false,
        }
    }
}

/// A recorded `run` call.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub name: String,
    pub command: Vec<String>,
    pub workdir: PathBuf,
}

impl RecordedInvocation {
    /// The rendered prompt: by convention the final command argument.
    pub fn prompt(&self) -> &str {
        self.command.last().map(String::as_str).unwrap_or("")
    }
}

/// Deterministic [`ProcessRunner`] double. Invocations consume the script
/// front to back; once the script is exhausted, further invocations print
/// nothing and finish immediately.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<ScriptedInvocation>>,
    /// Name -> whether the pending process will finish when waited on.
    pending: Mutex<HashMap<String, bool>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
    observers: Mutex<Vec<OutputObserver>>,
    kill_all_calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(script: Vec<ScriptedInvocation>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            pending: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            kill_all_calls: AtomicUsize::new(0),
        }
    }

    /// Every `run` call recorded so far, in order.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    pub fn kill_all_calls(&self) -> usize {
        self.kill_all_calls.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, name: &str, command: &[String], workdir: &Path) -> Result<()> {
        let invocation = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(ScriptedInvocation::silent);

        self.invocations
            .lock()
            .expect("invocations lock")
            .push(RecordedInvocation {
                name: name.to_string(),
                command: command.to_vec(),
                workdir: workdir.to_path_buf(),
            });

        let observers = self.observers.lock().expect("observers lock").clone();
        for line in &invocation.lines {
            for observer in &observers {
                observer(name, line);
            }
        }

        self.pending
            .lock()
            .expect("pending lock")
            .insert(name.to_string(), invocation.finishes);
        Ok(())
    }

    fn wait(&self, name: &str, _timeout: Duration) -> bool {
        let mut pending = self.pending.lock().expect("pending lock");
        match pending.get(name).copied() {
            // A hung process stays tracked until kill_all.
            Some(false) => false,
            Some(true) => {
                pending.remove(name);
                true
            }
            None => true,
        }
    }

    fn kill_all(&self) {
        self.pending.lock().expect("pending lock").clear();
        self.kill_all_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn active_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    fn subscribe(&self, observer: OutputObserver) {
        self.observers.lock().expect("observers lock").push(observer);
    }
}
