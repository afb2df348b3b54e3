//! Sentinel classification of the huddle status window.
//!
//! Agents signal control conditions by embedding fixed literal sentinels in
//! free-form output. This is a deliberately crude wire contract kept for
//! compatibility with existing agent tooling: no structured output, no
//! escaping. All interpretation lives in [`classify_status`] so the
//! precedence rules exist in exactly one place.

use crate::core::types::{HuddleRecord, render_transcript};

/// Emitted by the QA role when the mission is fully accomplished.
pub const COMPLETION_SENTINEL: &str = "STATUS: COMPLETED";
/// Emitted by the QA role when blocked on a decision only the user can make.
pub const NEEDS_INPUT_SENTINEL: &str = "STATUS: NEEDS_INPUT";
/// Emitted by the learner role to refuse storing a lesson.
pub const NO_UPDATE_SENTINEL: &str = "NO_UPDATE";

/// Classification of the most recent slice of huddle history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuddleStatus {
    Completed,
    NeedsInput,
    Continue,
}

/// Classify a status window by sentinel substring match.
///
/// Needs-input is checked first: a blocking question must not be silently
/// swallowed by a completion claim when both sentinels land in the same
/// window. Absent both sentinels the mission continues.
pub fn classify_status(window: &str) -> HuddleStatus {
    if window.contains(NEEDS_INPUT_SENTINEL) {
        return HuddleStatus::NeedsInput;
    }
    if window.contains(COMPLETION_SENTINEL) {
        return HuddleStatus::Completed;
    }
    HuddleStatus::Continue
}

/// Build the status window: the tail of the rendered transcript, capped at
/// `max_chars` characters.
///
/// Sentinels older than the window are deliberately invisible; only the
/// most recent review decides the mission's fate.
pub fn status_window(records: &[HuddleRecord], max_chars: usize) -> String {
    let transcript = render_transcript(records);
    tail_chars(&transcript, max_chars)
}

/// Last `max_chars` characters of `text` (char-based, safe on multi-byte).
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
