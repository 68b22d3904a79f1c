//! Autonomous goal runner: planner, executor, and critic over a persisted task graph.
//!
//! A goal is planned into a dependency graph of small tasks, each task is
//! executed and then judged, and the graph moves through
//! `planning → executing ⇄ criticizing ⇄ replanning → {blocked, done}`.
//!
//! - **[`core`]**: Pure, deterministic logic (output validation, selection,
//!   state transitions, budgets, routing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (durable stores, model calls,
//!   process execution). Isolated behind traits to enable scripting in tests.
//! - **[`agents`]**: Planner, executor, and critic wrappers around the
//!   completion service.
//!
//! Orchestration modules ([`engine`], [`worker`], [`maintenance`]) coordinate
//! core logic with I/O to implement the CLI commands and the daemon loops.

pub mod agents;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod graph;
pub mod io;
pub mod logging;
pub mod maintenance;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
