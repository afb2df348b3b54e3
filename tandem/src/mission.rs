//! Mission orchestration: the plan -> build -> verify -> review loop.
//!
//! The orchestrator owns a single mission slot. Starting a mission is an
//! atomic check-and-set on that slot followed by spawning the loop thread,
//! so the caller returns immediately and observes progress through the
//! huddle and [`Orchestrator::current_state`]. Agent invocations within a
//! mission are strictly sequential: build and review depend on each
//! other's output through the shared huddle, so there is never more than
//! one agent process per mission in flight.
//!
//! No error escapes the loop thread. Every failure is converted into a log
//! entry, a state transition, or both.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::core::status::{HuddleStatus, classify_status};
use crate::core::types::{
    AgentRole, InteractionKind, MissionState, StartReply, render_transcript,
};
use crate::io::config::OrchestratorConfig;
use crate::io::huddle::{Huddle, SYSTEM_AUTHOR, USER_AUTHOR};
use crate::io::mapper;
use crate::io::process::{OutputObserver, ProcessRunner};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::verify::run_verification;
use crate::learning::run_learning_phase;

/// Drives missions against a project directory using an injected process
/// runner. Generic over the runner so simulation is a different runner, not
/// a flag.
pub struct Orchestrator<R: ProcessRunner + Send + Sync + 'static> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    runner: R,
    huddle: Arc<Huddle>,
    config: OrchestratorConfig,
    slot: Mutex<MissionSlot>,
}

#[derive(Debug, Clone)]
struct MissionSlot {
    state: MissionState,
    task: String,
    iteration: u32,
    project_root: PathBuf,
}

impl<R: ProcessRunner + Send + Sync + 'static> Orchestrator<R> {
    /// Build an orchestrator and register the output-capture hook: every
    /// non-empty line an agent process emits becomes an agent-log record in
    /// the huddle.
    pub fn new(runner: R, huddle: Arc<Huddle>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(Inner {
            runner,
            huddle,
            config,
            slot: Mutex::new(MissionSlot {
                state: MissionState::Idle,
                task: String::new(),
                iteration: 0,
                project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            }),
        });

        let capture = Arc::clone(&inner.huddle);
        let observer: OutputObserver = Arc::new(move |agent: &str, line: &str| {
            if line.trim().is_empty() {
                return;
            }
            if let Err(err) = capture.log(agent, InteractionKind::AgentLog, line) {
                warn!(agent, err = %err, "failed to capture agent output");
            }
        });
        inner.runner.subscribe(observer);

        Ok(Self { inner })
    }

    /// Bind the orchestrator (and the huddle store) to a project directory.
    /// Fails if the path does not exist.
    pub fn set_project_root(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(anyhow!("project root {} does not exist", path.display()));
        }
        self.inner.huddle.set_root(path.join(".brain"))?;
        lock_slot(&self.inner).project_root = path.to_path_buf();
        info!(project = %path.display(), "project root set");
        Ok(())
    }

    /// Start a new mission, or resume a paused one with `payload` as the
    /// user's reply. Refused (logged, reported busy) unless the slot is
    /// idle or awaiting user input; a refused start launches nothing.
    pub fn start_mission(&self, payload: &str) -> StartReply {
        let is_continuation = {
            let mut slot = lock_slot(&self.inner);
            if !slot.state.accepts_mission() {
                warn!(state = slot.state.as_str(), "mission start refused: busy");
                return StartReply::Busy(slot.state);
            }
            let is_continuation = slot.state == MissionState::AwaitingUser;
            if !is_continuation {
                slot.task = payload.to_string();
            }
            slot.iteration = 0;
            slot.state = if is_continuation {
                MissionState::Building
            } else {
                MissionState::Planning
            };
            is_continuation
        };

        let inner = Arc::clone(&self.inner);
        let payload = payload.to_string();
        let spawned = thread::Builder::new()
            .name("mission-loop".to_string())
            .spawn(move || run_mission_loop(&inner, &payload, is_continuation));
        match spawned {
            Ok(_) if is_continuation => StartReply::Resumed,
            Ok(_) => StartReply::Started,
            Err(err) => {
                error!(err = %err, "failed to spawn mission thread");
                let mut slot = lock_slot(&self.inner);
                slot.state = if is_continuation {
                    MissionState::AwaitingUser
                } else {
                    MissionState::Idle
                };
                StartReply::Busy(slot.state)
            }
        }
    }

    pub fn current_state(&self) -> MissionState {
        lock_slot(&self.inner).state
    }

    /// Iteration counter of the active (or last) mission loop.
    pub fn current_iteration(&self) -> u32 {
        lock_slot(&self.inner).iteration
    }

    /// Best-effort human-readable summary of why the mission is paused:
    /// the most recent huddle entry.
    pub fn latest_question(&self) -> String {
        self.inner
            .huddle
            .latest_entry()
            .unwrap_or_else(|| "Check the huddle log for details.".to_string())
    }

    /// Poll until the mission loop settles in a state that accepts new
    /// missions (idle or awaiting user), or the timeout elapses. Returns
    /// the state observed last.
    pub fn wait_until_settled(&self, timeout: Duration) -> MissionState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.current_state();
            if state.accepts_mission() || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn huddle(&self) -> &Arc<Huddle> {
        &self.inner.huddle
    }

    pub fn runner(&self) -> &R {
        &self.inner.runner
    }
}

/// Loop-thread entry point. Converts any escaped error into a kill-all, a
/// huddle note, and a clean pause.
fn run_mission_loop<R: ProcessRunner>(inner: &Inner<R>, payload: &str, is_continuation: bool) {
    if let Err(err) = mission_loop(inner, payload, is_continuation) {
        error!(err = %err, "mission loop aborted");
        inner.runner.kill_all();
        let note = format!("Mission aborted: {err:#}. Waiting for user input.");
        if let Err(log_err) = inner
            .huddle
            .log(SYSTEM_AUTHOR, InteractionKind::System, &note)
        {
            warn!(err = %log_err, "failed to record mission abort");
        }
        set_state(inner, MissionState::AwaitingUser);
    }
}

fn mission_loop<R: ProcessRunner>(
    inner: &Inner<R>,
    payload: &str,
    is_continuation: bool,
) -> Result<()> {
    let (root, task) = {
        let slot = lock_slot(inner);
        (slot.project_root.clone(), slot.task.clone())
    };

    match mapper::save_map(&root) {
        Ok(path) => debug!(path = %path.display(), "codebase map refreshed"),
        Err(err) => warn!(err = %err, "codebase map generation failed"),
    }

    if is_continuation {
        inner
            .huddle
            .log(USER_AUTHOR, InteractionKind::Message, payload)?;
        info!("resuming mission with user feedback");
    } else {
        inner.huddle.log(
            SYSTEM_AUTHOR,
            InteractionKind::System,
            &format!("Mission initialized: {task}"),
        )?;
        info!(task = %task, "starting new mission");
        set_state(inner, MissionState::Planning);
        run_agent(inner, AgentRole::Architect, &task, &root);
        if !wait_for_agent(inner, AgentRole::Architect) {
            return pause_on_timeout(inner, "planning");
        }
    }

    let max_iterations = inner.config.max_iterations;
    loop {
        let iteration = {
            let mut slot = lock_slot(inner);
            if slot.iteration >= max_iterations {
                break;
            }
            slot.iteration += 1;
            slot.iteration
        };
        info!(iteration, max_iterations, "mission loop iteration");

        // Context maintenance happens before each build so the material fed
        // to agents stays bounded across long missions.
        match inner.huddle.prune_to_summary(
            inner.config.prune_threshold_records,
            inner.config.prune_keep_records,
        ) {
            Ok(Some(path)) => info!(archive = %path.display(), "huddle context pruned"),
            Ok(None) => {}
            Err(err) => warn!(err = %err, "context pruning failed; continuing unpruned"),
        }

        set_state(inner, MissionState::Building);
        run_agent(inner, AgentRole::Builder, &task, &root);
        if !wait_for_agent(inner, AgentRole::Builder) {
            return pause_on_timeout(inner, "build");
        }

        run_verification(&inner.huddle, &root, &inner.config.verify);

        set_state(inner, MissionState::Reviewing);
        run_agent(inner, AgentRole::Qa, &task, &root);
        if !wait_for_agent(inner, AgentRole::Qa) {
            return pause_on_timeout(inner, "review");
        }

        let window = inner
            .huddle
            .latest_status_text(inner.config.status_window_chars);
        match classify_status(&window) {
            HuddleStatus::NeedsInput => {
                info!("agents requested user input; pausing");
                set_state(inner, MissionState::AwaitingUser);
                return Ok(());
            }
            HuddleStatus::Completed => {
                info!("mission accomplished");
                match run_learning_phase(&inner.runner, &inner.huddle, &inner.config, &root, &task)
                {
                    Ok(true) => info!("skill store updated"),
                    Ok(false) => info!("no new skills extracted"),
                    Err(err) => warn!(err = %err, "learning phase failed; completing anyway"),
                }
                set_state(inner, MissionState::Idle);
                return Ok(());
            }
            HuddleStatus::Continue => debug!("no sentinel in status window; continuing"),
        }
    }

    info!(max_iterations, "iteration budget exhausted; pausing for check-in");
    inner.huddle.log(
        SYSTEM_AUTHOR,
        InteractionKind::System,
        "Maximum iterations reached. Pausing for user check-in.",
    )?;
    set_state(inner, MissionState::AwaitingUser);
    Ok(())
}

/// Summon an agent under `role`. A launch failure is non-fatal: the runner
/// has already reported it to observers under the agent's name, so the
/// loop continues and the next review sees it.
fn run_agent<R: ProcessRunner>(inner: &Inner<R>, role: AgentRole, task: &str, root: &Path) {
    let history = match inner.huddle.query_recent(inner.config.history_limit) {
        Ok(records) => render_transcript(&records),
        Err(err) => {
            warn!(err = %err, "failed to read huddle history; prompting without it");
            String::new()
        }
    };
    let repo_map = (role == AgentRole::Architect)
        .then(|| std::fs::read_to_string(mapper::map_path(root)).ok())
        .flatten();
    let skills = (role == AgentRole::Architect)
        .then(|| similar_lessons(&inner.huddle, task))
        .flatten();

    let inputs = PromptInputs {
        task: task.to_string(),
        history,
        repo_map,
        skills,
    };
    let prompt = match PromptBuilder::new(inner.config.prompt_budget_bytes).build(role, &inputs) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(role = role.as_str(), err = %err, "prompt rendering failed");
            return;
        }
    };

    let agent = role.agent();
    let spec = inner.config.command_for(agent);
    let mut command = Vec::with_capacity(spec.args.len() + 2);
    command.push(spec.bin.clone());
    command.extend(spec.args.iter().cloned());
    command.push(prompt);

    info!(role = role.as_str(), agent = agent.process_name(), "summoning agent");
    if let Err(err) = inner.runner.run(agent.process_name(), &command, root) {
        warn!(agent = agent.process_name(), err = %err, "agent process failed to launch");
    }
}

/// Lessons from past missions similar to this task, rendered for the
/// architect prompt. Best-effort: an unreadable skill store is no reason
/// to skip planning.
fn similar_lessons(huddle: &Huddle, task: &str) -> Option<String> {
    let skills = match huddle.query_similar(task, 3) {
        Ok(skills) => skills,
        Err(err) => {
            warn!(err = %err, "failed to query skill store");
            return None;
        }
    };
    if skills.is_empty() {
        return None;
    }
    Some(
        skills
            .into_iter()
            .map(|skill| skill.lesson)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn wait_for_agent<R: ProcessRunner>(inner: &Inner<R>, role: AgentRole) -> bool {
    inner.runner.wait(
        role.agent().process_name(),
        Duration::from_secs(inner.config.agent_timeout_secs),
    )
}

/// An agent exceeded its phase budget: terminate everything in flight and
/// pause visibly. No in-flight process survives a timeout.
fn pause_on_timeout<R: ProcessRunner>(inner: &Inner<R>, phase: &str) -> Result<()> {
    warn!(phase, "agent wait timed out; killing all processes");
    inner.runner.kill_all();
    let note = format!(
        "The {phase} phase timed out after {}s. All agent processes were stopped; waiting for user input.",
        inner.config.agent_timeout_secs
    );
    if let Err(err) = inner
        .huddle
        .log(SYSTEM_AUTHOR, InteractionKind::System, &note)
    {
        warn!(err = %err, "failed to record timeout note");
    }
    set_state(inner, MissionState::AwaitingUser);
    Ok(())
}

fn set_state<R>(inner: &Inner<R>, state: MissionState) {
    let mut slot = lock_slot(inner);
    if slot.state != state {
        debug!(from = slot.state.as_str(), to = state.as_str(), "state change");
        slot.state = state;
    }
}

/// A poisoned slot mutex would mean a panic inside a lock we hold only for
/// field reads and writes; recover the data rather than cascading.
fn lock_slot<R>(inner: &Inner<R>) -> MutexGuard<'_, MissionSlot> {
    inner
        .slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn orchestrator(project: &Path) -> Orchestrator<ScriptedRunner> {
        let runner = ScriptedRunner::new(Vec::new());
        let huddle = Arc::new(Huddle::new(project.join(".brain")).expect("huddle"));
        let orchestrator =
            Orchestrator::new(runner, huddle, OrchestratorConfig::default()).expect("orchestrator");
        orchestrator.set_project_root(project).expect("root");
        orchestrator
    }

    /// Starting while mid-build must not launch any process and must leave
    /// the state untouched.
    #[test]
    fn start_refused_while_building_launches_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(temp.path());
        lock_slot(&orchestrator.inner).state = MissionState::Building;

        let reply = orchestrator.start_mission("another task");
        assert_eq!(reply, StartReply::Busy(MissionState::Building));
        assert!(orchestrator.runner().invocations().is_empty());
        assert_eq!(orchestrator.current_state(), MissionState::Building);
    }

    #[test]
    fn start_refused_while_reviewing_too() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(temp.path());
        lock_slot(&orchestrator.inner).state = MissionState::Reviewing;

        assert_eq!(
            orchestrator.start_mission("task"),
            StartReply::Busy(MissionState::Reviewing)
        );
    }

    #[test]
    fn set_project_root_rejects_missing_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(temp.path());

        let err = orchestrator
            .set_project_root(&temp.path().join("nope"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let huddle = Arc::new(Huddle::new(temp.path().join(".brain")).expect("huddle"));
        let mut config = OrchestratorConfig::default();
        config.max_iterations = 0;

        assert!(Orchestrator::new(ScriptedRunner::new(Vec::new()), huddle, config).is_err());
    }

    #[test]
    fn latest_question_falls_back_when_huddle_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orchestrator = orchestrator(temp.path());
        assert_eq!(
            orchestrator.latest_question(),
            "Check the huddle log for details."
        );
    }
}
