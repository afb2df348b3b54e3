//! Shared deterministic types for the orchestrator core.
//!
//! These types define stable contracts between core components. They should
//! not depend on external state or I/O and must remain deterministic across
//! runs.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single mission slot.
///
/// Verification runs synchronously inside the build phase, so it has no
/// state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    Idle,
    Planning,
    Building,
    Reviewing,
    AwaitingUser,
}

impl MissionState {
    /// States in which a new or resumed mission may be started.
    pub fn accepts_mission(self) -> bool {
        matches!(self, MissionState::Idle | MissionState::AwaitingUser)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MissionState::Idle => "idle",
            MissionState::Planning => "planning",
            MissionState::Building => "building",
            MissionState::Reviewing => "reviewing",
            MissionState::AwaitingUser => "awaiting_user",
        }
    }
}

/// Outcome of a `start_mission` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReply {
    /// A fresh mission was accepted and its loop thread spawned.
    Started,
    /// A paused mission was resumed with the payload as user feedback.
    Resumed,
    /// The orchestrator is mid-mission; nothing was started.
    Busy(MissionState),
}

/// Fixed roles an agent can be summoned under.
///
/// The role selects the prompt template and determines which control
/// sentinels the agent is licensed to emit. The role name appears in the
/// prompt for log readability only; it carries no control meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Architect,
    Builder,
    Qa,
    Learner,
}

impl AgentRole {
    /// The underlying agent identity this role is bound to.
    pub fn agent(self) -> AgentId {
        match self {
            AgentRole::Builder => AgentId::Driver,
            AgentRole::Architect | AgentRole::Qa | AgentRole::Learner => AgentId::Navigator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Architect => "architect",
            AgentRole::Builder => "builder",
            AgentRole::Qa => "qa",
            AgentRole::Learner => "learner",
        }
    }
}

/// The two underlying agent identities, each backed by one external CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentId {
    Navigator,
    Driver,
}

impl AgentId {
    /// Name under which this agent's process is tracked and its output
    /// attributed in the huddle.
    pub fn process_name(self) -> &'static str {
        match self {
            AgentId::Navigator => "navigator",
            AgentId::Driver => "driver",
        }
    }
}

/// Kind of an interaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// A deliberate message (user reply, agent-authored note).
    Message,
    /// A line of captured agent process output.
    AgentLog,
    /// A note written by the orchestrator itself.
    System,
}

/// One entry in the huddle. Immutable once written; `seq` strictly
/// increases with insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuddleRecord {
    pub seq: u64,
    pub ts_ms: u64,
    pub author: String,
    pub kind: InteractionKind,
    pub body: String,
}

/// A distilled lesson persisted after a successful mission. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub seq: u64,
    pub ts_ms: u64,
    /// Task description of the mission the lesson was learned from.
    pub task: String,
    pub lesson: String,
}

/// Render records as a readable transcript, oldest first.
///
/// The same rendering feeds agent prompts, the status window, and archive
/// snapshots, so agents and humans see one consistent view of the huddle.
pub fn render_transcript(records: &[HuddleRecord]) -> String {
    records
        .iter()
        .map(|record| format!("**{}**: {}", record.author, record.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}
