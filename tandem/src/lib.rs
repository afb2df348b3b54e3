//! Twin-agent mission orchestrator.
//!
//! This crate drives two external coding-agent processes (a planning
//! "navigator" and a building "driver") through a repeating
//! plan -> build -> verify -> review cycle until a mission completes or
//! pauses for user input. Agents coordinate through the huddle, a shared
//! append-only interaction log, and lessons from successful missions are
//! persisted to a skill store for later retrieval. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (mission states, sentinel
//!   classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (huddle store, process
//!   supervision, codebase mapping, verification). Isolated to enable
//!   mocking in tests.
//!
//! Orchestration modules ([`mission`], [`learning`]) coordinate core logic
//! with I/O to implement the mission loop.

pub mod core;
pub mod io;
pub mod learning;
pub mod logging;
pub mod mission;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
