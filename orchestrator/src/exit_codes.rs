//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `run`/`resume`, the run finished `done`.
pub const OK: i32 = 0;
/// Command failed due to invalid input, config, or a store error.
pub const INVALID: i32 = 1;
/// The run finished `blocked`: some node is blocked or failed.
pub const BLOCKED: i32 = 4;
