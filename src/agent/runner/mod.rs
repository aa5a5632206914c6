//! Agent runner module.
//!
//! Drives one agent through alternating model calls and tool execution until
//! the model answers without tool calls or the turn budget runs out.

mod execution;
mod tools;
mod types;

use crate::llm::ModelInvoker;
use std::fmt;
use std::sync::Arc;

pub use types::{AgentRunOutput, AgentRunnerConfig, AgentRunnerContext, RunStatus};

/// Final content reported when an agent exhausts its turn budget
pub const TURN_BUDGET_SENTINEL: &str = "Agent execution timed out (max turns reached).";

/// Agent runner that executes the core loop.
#[derive(Clone)]
pub struct AgentRunner {
    invoker: Arc<dyn ModelInvoker>,
}

impl fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRunner").finish_non_exhaustive()
    }
}

impl AgentRunner {
    /// Create a new agent runner.
    #[must_use]
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self { invoker }
    }

    /// Model capability used by this runner.
    #[must_use]
    pub fn invoker(&self) -> Arc<dyn ModelInvoker> {
        Arc::clone(&self.invoker)
    }
}
