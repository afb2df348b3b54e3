//! Role prompt builder for deterministic agent input.
//!
//! Each role has a fixed instruction template; the variable parts are the
//! task text, a bounded slice of recent huddle history, and (for the
//! architect only) the codebase map. Templates state the role name for log
//! readability and spell out exactly which sentinels the role may emit.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::status::tail_chars;
use crate::core::types::AgentRole;

const ARCHITECT_TEMPLATE: &str = include_str!("prompts/architect.md");
const BUILDER_TEMPLATE: &str = include_str!("prompts/builder.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const LEARNER_TEMPLATE: &str = include_str!("prompts/learner.md");

/// Variable inputs for one prompt rendering.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    /// Mission task text (architect and learner templates).
    pub task: String,
    /// Rendered transcript slice of recent huddle history.
    pub history: String,
    /// Codebase map, included for the architect only.
    pub repo_map: Option<String>,
    /// Lessons from past missions similar to this task (architect only).
    pub skills: Option<String>,
}

/// Builds role prompts within a byte budget; history shrinks first since
/// the instruction block must survive intact.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, role: AgentRole, input: &PromptInputs) -> Result<String> {
        let rendered = render(role, input)?;
        if rendered.len() <= self.budget_bytes {
            return Ok(rendered);
        }

        // Over budget: drop the oldest history first, the tail is what the
        // next agent actually needs.
        let overflow = rendered.len() - self.budget_bytes;
        let marker = "[earlier history truncated]\n";
        let keep = input
            .history
            .chars()
            .count()
            .saturating_sub(overflow + marker.len());
        let trimmed = PromptInputs {
            history: format!("{marker}{}", tail_chars(&input.history, keep)),
            ..input.clone()
        };
        let shrunk = render(role, &trimmed)?;
        debug!(
            role = role.as_str(),
            before = rendered.len(),
            after = shrunk.len(),
            "history truncated for prompt budget"
        );
        Ok(shrunk)
    }
}

fn render(role: AgentRole, input: &PromptInputs) -> Result<String> {
    let mut env = Environment::new();
    let template = match role {
        AgentRole::Architect => ARCHITECT_TEMPLATE,
        AgentRole::Builder => BUILDER_TEMPLATE,
        AgentRole::Qa => REVIEWER_TEMPLATE,
        AgentRole::Learner => LEARNER_TEMPLATE,
    };
    env.add_template(role.as_str(), template)
        .with_context(|| format!("compile {} template", role.as_str()))?;
    let rendered = env
        .get_template(role.as_str())?
        .render(context! {
            task => input.task.trim(),
            history => history_or_placeholder(&input.history),
            repo_map => input.repo_map.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            skills => input.skills.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })
        .with_context(|| format!("render {} template", role.as_str()))?;
    Ok(rendered)
}

fn history_or_placeholder(history: &str) -> &str {
    let trimmed = history.trim();
    if trimmed.is_empty() {
        "*The huddle is empty.*"
    } else {
        trimmed
    }
}
