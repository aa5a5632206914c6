//! Multi-agent orchestration
//!
//! This module provides:
//! - A turn loop that alternates model calls and tool execution
//! - A supervisor that fans tasks out to other agents concurrently
//! - A workflow runner for fixed agent pipelines

/// Agent definitions and roster
pub mod definition;
/// Delegation tool and single-branch execution
pub mod delegation;
/// Supervisor loop with concurrent fan-out
pub mod orchestrator;
/// Progress events
pub mod progress;
/// Core agent turn loop
pub mod runner;
/// Per-request context
pub mod session;
/// Tool resolution and execution for the turn loop
pub mod tool_bridge;
/// Sequential and concurrent agent pipelines
pub mod workflow;

pub use definition::{AgentDefinition, AgentRoster};
pub use orchestrator::{OrchestrationOutput, Orchestrator, OrchestratorConfig};
pub use progress::AgentEvent;
pub use runner::{AgentRunOutput, AgentRunner, AgentRunnerConfig, RunStatus, TURN_BUDGET_SENTINEL};
pub use session::RequestContext;
pub use workflow::{WorkflowDefinition, WorkflowError, WorkflowRunner};

use crate::llm::LlmError;
use crate::sandbox::SandboxError;
use thiserror::Error;

/// Errors that abort an agent run
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model invocation failed
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),
    /// Sandbox could not be provisioned
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    /// Run was cancelled
    #[error("Agent run cancelled")]
    Cancelled,
}
