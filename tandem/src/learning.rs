//! Post-success learning phase: distill reusable lessons into the skill
//! store.
//!
//! Runs once per completed mission. The planning agent re-reads the mission
//! history under the learner role and either refuses (`NO_UPDATE`) or
//! produces bullet-point lessons that are persisted keyed by the original
//! task. The caller treats every error here as non-fatal: a mission never
//! fails to complete because its lesson was lost.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::status::NO_UPDATE_SENTINEL;
use crate::core::types::{AgentRole, InteractionKind, render_transcript};
use crate::io::config::OrchestratorConfig;
use crate::io::huddle::Huddle;
use crate::io::process::{ProcessRunner, is_lifecycle_line};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Ask the planning agent to distill 1-3 lessons from the mission history
/// and persist them. Returns whether a skill was stored.
pub fn run_learning_phase<R: ProcessRunner>(
    runner: &R,
    huddle: &Huddle,
    config: &OrchestratorConfig,
    root: &Path,
    task: &str,
) -> Result<bool> {
    let agent = AgentRole::Learner.agent();
    let history = render_transcript(&huddle.query_recent(config.learning.history_limit)?);
    let prompt = PromptBuilder::new(config.prompt_budget_bytes).build(
        AgentRole::Learner,
        &PromptInputs {
            task: task.to_string(),
            history,
            repo_map: None,
            skills: None,
        },
    )?;

    let spec = config.command_for(agent);
    let mut command = Vec::with_capacity(spec.args.len() + 2);
    command.push(spec.bin.clone());
    command.extend(spec.args.iter().cloned());
    command.push(prompt);

    // The capture hook appends the learner's output to the huddle while we
    // wait; everything after this sequence authored by the agent is the
    // lesson text.
    let start_seq = huddle.last_seq();
    runner
        .run(agent.process_name(), &command, root)
        .context("launch learner")?;
    if !runner.wait(
        agent.process_name(),
        Duration::from_secs(config.learning.timeout_secs),
    ) {
        runner.kill_all();
        return Err(anyhow!(
            "learning phase timed out after {}s",
            config.learning.timeout_secs
        ));
    }

    let lesson = huddle
        .records_after(start_seq)?
        .into_iter()
        .filter(|record| {
            record.kind == InteractionKind::AgentLog
                && record.author == agent.process_name()
                && !is_lifecycle_line(&record.body)
        })
        .map(|record| record.body)
        .collect::<Vec<_>>()
        .join("\n");

    if lesson.trim().is_empty() || lesson.contains(NO_UPDATE_SENTINEL) {
        debug!("learner declined to store a lesson");
        return Ok(false);
    }
    huddle.add_skill(task, &lesson)?;
    info!(chars = lesson.len(), "lesson persisted to skill store");
    Ok(true)
}
