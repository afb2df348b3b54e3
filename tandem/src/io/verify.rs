//! Verification runner: executes the target project's own test suite after
//! each build phase and reports the outcome into the huddle for the QA
//! role to consume.
//!
//! Tooling is discovered through conventional manifest files, or forced via
//! `verify.command` in the config. A project with no recognized manifest is
//! a skip, not a failure; a command that cannot be launched or times out is
//! "failed to run", distinct from a failing test suite.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::status::tail_chars;
use crate::core::types::InteractionKind;
use crate::io::config::VerifyConfig;
use crate::io::huddle::{Huddle, SYSTEM_AUTHOR};
use crate::io::process::run_command_with_timeout;

/// Outcome of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Test command exited 0.
    Passed,
    /// Test command exited nonzero.
    Failed,
    /// No recognized manifest and no configured command.
    Skipped,
    /// The command could not be launched or exceeded its timeout.
    FailedToRun,
}

/// Map the project to its test command: the configured override wins,
/// otherwise conventional manifests are probed in a fixed order.
pub fn detect_command(project: &Path, config: &VerifyConfig) -> Option<Vec<String>> {
    if !config.command.is_empty() {
        return Some(config.command.clone());
    }
    let manifest_commands: &[(&str, &[&str])] = &[
        ("package.json", &["npm", "test"]),
        ("Cargo.toml", &["cargo", "test"]),
        ("pyproject.toml", &["pytest"]),
        ("requirements.txt", &["pytest"]),
    ];
    for (manifest, command) in manifest_commands {
        if project.join(manifest).exists() {
            return Some(command.iter().map(|s| s.to_string()).collect());
        }
    }
    None
}

/// Run verification for `project`, reporting into `huddle`. Never returns
/// an error: every failure mode folds into the outcome and a huddle note,
/// and a huddle write failure itself only degrades to a tracing warning.
pub fn run_verification(huddle: &Huddle, project: &Path, config: &VerifyConfig) -> VerifyOutcome {
    let Some(command) = detect_command(project, config) else {
        info!(project = %project.display(), "no test manifest recognized; skipping verification");
        report(
            huddle,
            "No test manifest recognized. Skipping verification.",
        );
        return VerifyOutcome::Skipped;
    };

    info!(command = ?command, "running verification");
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]).current_dir(project);

    let output = match run_command_with_timeout(
        cmd,
        Duration::from_secs(config.timeout_secs),
        config.output_limit_bytes,
    ) {
        Ok(output) => output,
        Err(err) => {
            warn!(err = %err, "verification failed to run");
            report(huddle, &format!("Verification failed to run: {err:#}"));
            return VerifyOutcome::FailedToRun;
        }
    };

    if output.timed_out {
        warn!(timeout_secs = config.timeout_secs, "verification timed out");
        report(
            huddle,
            &format!(
                "Verification failed to run: timed out after {}s.",
                config.timeout_secs
            ),
        );
        return VerifyOutcome::FailedToRun;
    }

    let (outcome, verdict) = if output.status.success() {
        (VerifyOutcome::Passed, "PASSED")
    } else {
        (VerifyOutcome::Failed, "FAILED")
    };
    let tail = tail_chars(&output.combined(), config.report_tail_chars);
    report(
        huddle,
        &format!("Verification {verdict}. Test output:\n```\n{tail}\n```"),
    );
    info!(verdict, "verification finished");
    outcome
}

fn report(huddle: &Huddle, body: &str) {
    if let Err(err) = huddle.log(SYSTEM_AUTHOR, InteractionKind::System, body) {
        warn!(err = %err, "failed to write verification report to huddle");
    }
}
