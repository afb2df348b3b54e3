//! Orchestrator configuration stored under `<project>/.brain/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::AgentId;

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Mission loop iterations before forcing a user check-in.
    pub max_iterations: u32,

    /// Per-phase wall-clock budget for one agent invocation, in seconds.
    pub agent_timeout_secs: u64,

    /// Size of the transcript tail inspected for status sentinels.
    pub status_window_chars: usize,

    /// Number of recent huddle records included in agent prompts.
    pub history_limit: usize,

    /// Truncate agent prompts beyond this many bytes (history shrinks first).
    pub prompt_budget_bytes: usize,

    /// Prune the huddle once it holds more than this many records.
    pub prune_threshold_records: usize,

    /// Records carried over verbatim when the huddle is pruned.
    pub prune_keep_records: usize,

    /// Planning/review/learning agent command.
    pub navigator: AgentCommand,

    /// Building agent command.
    pub driver: AgentCommand,

    pub verify: VerifyConfig,
    pub learning: LearningConfig,
}

/// External CLI an agent identity is bound to. The rendered prompt is
/// appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCommand {
    pub bin: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Test command override (e.g. `["just","ci"]`). Empty means detect by
    /// manifest (`package.json`, `Cargo.toml`, `pyproject.toml`, ...).
    pub command: Vec<String>,

    /// Hard wall-clock budget for the verification run, in seconds.
    pub timeout_secs: u64,

    /// Characters of combined output kept in the huddle report.
    pub report_tail_chars: usize,

    /// Truncate verification stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LearningConfig {
    /// Hard wall-clock budget for the lesson-distillation run, in seconds.
    pub timeout_secs: u64,

    /// Records of mission history fed to the learner (deliberately larger
    /// than the per-iteration prompt slice).
    pub history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            agent_timeout_secs: 120,
            status_window_chars: 1000,
            history_limit: 50,
            prompt_budget_bytes: 40_000,
            prune_threshold_records: 400,
            prune_keep_records: 20,
            navigator: AgentCommand {
                bin: "claude".to_string(),
                args: vec!["--print".to_string()],
            },
            driver: AgentCommand {
                bin: "codex".to_string(),
                args: vec!["-p".to_string()],
            },
            verify: VerifyConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30,
            report_tail_chars: 2000,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            history_limit: 500,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.status_window_chars == 0 {
            return Err(anyhow!("status_window_chars must be > 0"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be > 0"));
        }
        if self.prune_keep_records >= self.prune_threshold_records {
            return Err(anyhow!(
                "prune_keep_records must be < prune_threshold_records"
            ));
        }
        for (name, agent) in [("navigator", &self.navigator), ("driver", &self.driver)] {
            if agent.bin.trim().is_empty() {
                return Err(anyhow!("{name}.bin must not be empty"));
            }
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be > 0"));
        }
        if self.learning.timeout_secs == 0 {
            return Err(anyhow!("learning.timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Command bound to the given agent identity.
    pub fn command_for(&self, agent: AgentId) -> &AgentCommand {
        match agent {
            AgentId::Navigator => &self.navigator,
            AgentId::Driver => &self.driver,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
