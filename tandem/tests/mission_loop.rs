//! End-to-end mission loop scenarios driven by scripted process runners.
//!
//! No real agent binaries are spawned: the scripted runner replays
//! deterministic output sequences, and the orchestrator's capture hook
//! feeds them through the huddle exactly as live agent output would be.

use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::Result;
use tandem::core::types::{MissionState, StartReply};
use tandem::io::config::OrchestratorConfig;
use tandem::io::huddle::Huddle;
use tandem::io::process::{OutputObserver, ProcessRunner};
use tandem::mission::Orchestrator;
use tandem::test_support::{ScriptedInvocation, ScriptedRunner};

const SETTLE: Duration = Duration::from_secs(10);

fn config(max_iterations: u32) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.max_iterations = max_iterations;
    config.agent_timeout_secs = 5;
    config.learning.timeout_secs = 5;
    config
}

fn scripted_orchestrator(
    script: Vec<ScriptedInvocation>,
    project: &Path,
    max_iterations: u32,
) -> Orchestrator<ScriptedRunner> {
    let runner = ScriptedRunner::new(script);
    let huddle = Arc::new(Huddle::new(project.join(".brain")).expect("huddle"));
    let orchestrator =
        Orchestrator::new(runner, huddle, config(max_iterations)).expect("orchestrator");
    orchestrator.set_project_root(project).expect("project root");
    orchestrator
}

fn transcript_bodies(orchestrator: &Orchestrator<ScriptedRunner>) -> Vec<String> {
    orchestrator
        .huddle()
        .query_recent(200)
        .expect("records")
        .into_iter()
        .map(|record| record.body)
        .collect()
}

/// Empty project, no test manifest, reviewer reports
/// completion. The mission must end idle with a logged verification skip
/// and exactly one learning invocation.
#[test]
fn completed_mission_ends_idle_with_one_learning_invocation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = vec![
        ScriptedInvocation::says(["Plan: add /health returning 200."]),
        ScriptedInvocation::says(["Implemented the endpoint."]),
        ScriptedInvocation::says(["STATUS: COMPLETED"]),
        ScriptedInvocation::says(["- Register new routes in one place."]),
    ];
    let orchestrator = scripted_orchestrator(script, temp.path(), 10);

    assert_eq!(
        orchestrator.start_mission("Add a health endpoint"),
        StartReply::Started
    );
    assert_eq!(orchestrator.wait_until_settled(SETTLE), MissionState::Idle);

    let invocations = orchestrator.runner().invocations();
    assert_eq!(invocations.len(), 4);
    let learner_runs = invocations
        .iter()
        .filter(|invocation| invocation.prompt().contains("ROLE: LEARNER"))
        .count();
    assert_eq!(learner_runs, 1);

    let bodies = transcript_bodies(&orchestrator);
    assert!(
        bodies.iter().any(|body| body.contains("Skipping verification")),
        "verification skip must be logged"
    );

    let skills = orchestrator.huddle().skills().expect("skills");
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].task, "Add a health endpoint");
    assert!(skills[0].lesson.contains("Register new routes"));
}

/// The reviewer never emits a sentinel. The loop must stop
/// at exactly `max_iterations` iterations and pause for a check-in, without
/// ever invoking the learner.
#[test]
fn sentinel_free_mission_exhausts_iterations_and_pauses() {
    let temp = tempfile::tempdir().expect("tempdir");
    let orchestrator = scripted_orchestrator(Vec::new(), temp.path(), 3);

    assert_eq!(
        orchestrator.start_mission("Refactor the parser"),
        StartReply::Started
    );
    assert_eq!(
        orchestrator.wait_until_settled(SETTLE),
        MissionState::AwaitingUser
    );

    // One planning run, then builder + reviewer per iteration.
    let invocations = orchestrator.runner().invocations();
    assert_eq!(invocations.len(), 1 + 3 * 2);
    assert!(
        invocations
            .iter()
            .all(|invocation| !invocation.prompt().contains("ROLE: LEARNER")),
        "learning runs only on success"
    );
    assert_eq!(orchestrator.current_iteration(), 3);
    assert!(orchestrator.latest_question().contains("Maximum iterations"));
}

/// The builder exceeds its timeout. All processes are
/// killed, no review happens for that iteration, and the mission pauses.
#[test]
fn build_timeout_kills_processes_and_skips_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = vec![
        ScriptedInvocation::says(["Plan ready."]),
        ScriptedInvocation::hangs(),
    ];
    let orchestrator = scripted_orchestrator(script, temp.path(), 10);

    orchestrator.start_mission("Speed up CI");
    assert_eq!(
        orchestrator.wait_until_settled(SETTLE),
        MissionState::AwaitingUser
    );

    let invocations = orchestrator.runner().invocations();
    assert_eq!(invocations.len(), 2, "no review after a build timeout");
    assert_eq!(orchestrator.runner().kill_all_calls(), 1);
    assert_eq!(orchestrator.runner().active_count(), 0);
    assert!(orchestrator.latest_question().contains("timed out"));
}

/// Resuming from awaiting-user skips re-planning and picks
/// the loop back up at the build phase.
#[test]
fn continuation_resumes_at_building_without_replanning() {
    let temp = tempfile::tempdir().expect("tempdir");
    // The builder's verbose resume output pushes the stale NEEDS_INPUT
    // sentinel out of the status window before the next review.
    let resume_output = format!("Switched to provider B. {}", "More detail. ".repeat(100));
    let script = vec![
        ScriptedInvocation::says(["Plan: wire up authentication."]),
        ScriptedInvocation::says(["Implemented a draft."]),
        ScriptedInvocation::says(["Which auth provider should we use? STATUS: NEEDS_INPUT"]),
        ScriptedInvocation::says([resume_output.as_str()]),
        ScriptedInvocation::says(["STATUS: COMPLETED"]),
        ScriptedInvocation::says(["NO_UPDATE"]),
    ];
    let orchestrator = scripted_orchestrator(script, temp.path(), 10);

    assert_eq!(
        orchestrator.start_mission("Add authentication"),
        StartReply::Started
    );
    assert_eq!(
        orchestrator.wait_until_settled(SETTLE),
        MissionState::AwaitingUser
    );
    assert_eq!(orchestrator.runner().invocations().len(), 3);
    assert!(orchestrator.latest_question().contains("auth provider"));

    assert_eq!(
        orchestrator.start_mission("Use provider B"),
        StartReply::Resumed
    );
    assert_eq!(orchestrator.wait_until_settled(SETTLE), MissionState::Idle);

    let invocations = orchestrator.runner().invocations();
    assert_eq!(invocations.len(), 6);
    let architect_runs = invocations
        .iter()
        .filter(|invocation| invocation.prompt().contains("ROLE: ARCHITECT"))
        .count();
    assert_eq!(architect_runs, 1, "continuation must not re-plan");

    let bodies = transcript_bodies(&orchestrator);
    assert!(bodies.iter().any(|body| body == "Use provider B"));

    // NO_UPDATE refusal: nothing lands in the skill store.
    assert!(orchestrator.huddle().skills().expect("skills").is_empty());
}

/// Runner whose waits block until the test releases (or drops) the gate,
/// keeping the mission loop pinned mid-phase.
struct GateRunner {
    runs: Mutex<Vec<String>>,
    gate: Mutex<mpsc::Receiver<()>>,
    observers: Mutex<Vec<OutputObserver>>,
}

impl GateRunner {
    fn new(gate: mpsc::Receiver<()>) -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            gate: Mutex::new(gate),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn run_count(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }
}

impl ProcessRunner for GateRunner {
    fn run(&self, name: &str, _command: &[String], _workdir: &Path) -> Result<()> {
        self.runs.lock().expect("runs lock").push(name.to_string());
        Ok(())
    }

    fn wait(&self, _name: &str, _timeout: Duration) -> bool {
        // Blocks until the test sends or drops the sender.
        let _ = self.gate.lock().expect("gate lock").recv();
        true
    }

    fn kill_all(&self) {}

    fn active_count(&self) -> usize {
        0
    }

    fn subscribe(&self, observer: OutputObserver) {
        self.observers.lock().expect("observers lock").push(observer);
    }
}

/// Starting a mission while one is mid-flight is refused,
/// launches nothing, and leaves the running mission untouched.
#[test]
fn start_while_mission_in_flight_is_busy_and_launches_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, rx) = mpsc::channel();
    let runner = GateRunner::new(rx);
    let huddle = Arc::new(Huddle::new(temp.path().join(".brain")).expect("huddle"));
    let orchestrator = Orchestrator::new(runner, huddle, config(1)).expect("orchestrator");
    orchestrator.set_project_root(temp.path()).expect("root");

    assert_eq!(
        orchestrator.start_mission("First mission"),
        StartReply::Started
    );

    // The loop is now pinned in the planning wait.
    wait_for(|| orchestrator.runner().run_count() == 1);
    assert_eq!(orchestrator.current_state(), MissionState::Planning);

    assert_eq!(
        orchestrator.start_mission("Second mission"),
        StartReply::Busy(MissionState::Planning)
    );
    assert_eq!(orchestrator.runner().run_count(), 1, "busy start launched a process");
    assert_eq!(orchestrator.current_state(), MissionState::Planning);

    // Release every subsequent wait and let the mission run itself out.
    drop(tx);
    assert_eq!(
        orchestrator.wait_until_settled(SETTLE),
        MissionState::AwaitingUser
    );
    let runs = {
        let runner = orchestrator.runner();
        runner.runs.lock().expect("runs lock").clone()
    };
    assert_eq!(runs, vec!["navigator", "driver", "navigator"]);
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + SETTLE;
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// The busy path is state-based, not thread-based: after completion the
/// orchestrator accepts a brand-new mission with a fresh plan, and lessons
/// stored by the first mission reach the second mission's architect.
#[test]
fn new_mission_after_completion_replans_with_stored_lessons() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = vec![
        ScriptedInvocation::says(["Plan A."]),
        ScriptedInvocation::says(["Built A."]),
        ScriptedInvocation::says(["STATUS: COMPLETED"]),
        ScriptedInvocation::says(["- Keep task state in one store."]),
        ScriptedInvocation::says(["Plan B."]),
        ScriptedInvocation::says(["Built B."]),
        ScriptedInvocation::says(["STATUS: COMPLETED"]),
        ScriptedInvocation::says(["NO_UPDATE"]),
    ];
    let orchestrator = scripted_orchestrator(script, temp.path(), 10);

    assert_eq!(orchestrator.start_mission("Clean up task state"), StartReply::Started);
    assert_eq!(orchestrator.wait_until_settled(SETTLE), MissionState::Idle);

    assert_eq!(orchestrator.start_mission("Rework task scheduling"), StartReply::Started);
    assert_eq!(orchestrator.wait_until_settled(SETTLE), MissionState::Idle);

    let invocations = orchestrator.runner().invocations();
    let architect_prompts: Vec<&str> = invocations
        .iter()
        .filter(|invocation| invocation.prompt().contains("ROLE: ARCHITECT"))
        .map(|invocation| invocation.prompt())
        .collect();
    assert_eq!(architect_prompts.len(), 2, "each fresh mission plans anew");
    assert!(
        !architect_prompts[0].contains("LESSONS FROM PAST MISSIONS"),
        "no lessons stored yet for the first mission"
    );
    assert!(
        architect_prompts[1].contains("Keep task state in one store"),
        "second mission's architect sees the stored lesson"
    );
}
