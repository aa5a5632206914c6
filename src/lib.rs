#![deny(missing_docs)]
//! Oxide Cowork core library.
//!
//! Multi-agent orchestration with delegated sub-agents and per-session
//! sandboxes for code execution.

/// Agent definitions, turn loop, orchestration and workflows.
pub mod agent;
/// Configuration management.
pub mod config;
/// Model invocation contract and message types.
pub mod llm;
/// Isolated execution backends and their lifecycle manager.
pub mod sandbox;
/// Tool descriptors and tool sources (skills, remote servers, sandbox).
pub mod tools;
/// Utility functions.
pub mod utils;
