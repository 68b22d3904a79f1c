//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod invariants;
pub mod relevance;
pub mod router;
pub mod selector;
pub mod summary;
pub mod transition;
pub mod types;
pub mod validator;
