//! I/O helpers: durable stores, model and shell boundaries.

pub mod completion;
pub mod config;
pub mod context;
pub mod escalation;
pub mod files;
pub mod graph_store;
pub mod lease;
pub mod ledger;
pub mod memory;
pub mod notify;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod queue;
pub mod runtime_config;
pub mod shell;
