//! Runner configuration and context types.

use crate::agent::progress::AgentEvent;
use crate::config::AGENT_MAX_TURNS;
use crate::llm::Message;
use crate::tools::ToolDescriptor;
use serde_json::Value;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Configuration for the agent runner.
#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    /// Model name to use for model calls.
    pub model: String,
    /// Maximum model turns before giving up.
    pub max_turns: usize,
    /// Provider-specific arguments passed on every call.
    pub extra_args: Value,
}

impl AgentRunnerConfig {
    /// Create a config with the default turn budget.
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            max_turns: AGENT_MAX_TURNS,
            extra_args: Value::Object(serde_json::Map::new()),
        }
    }

    /// Override the turn budget.
    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Override the extra provider arguments.
    #[must_use]
    pub fn with_extra_args(mut self, extra_args: Value) -> Self {
        self.extra_args = extra_args;
        self
    }
}

/// Context for one run of the agent loop.
pub struct AgentRunnerContext<'a> {
    /// Agent name, for logs and progress events.
    pub agent_name: &'a str,
    /// System prompt for the model.
    pub system_prompt: &'a str,
    /// Conversation turns preceding `input`.
    pub history: &'a [Message],
    /// Newest user input.
    pub input: &'a str,
    /// Tools available for this run.
    pub tools: &'a [ToolDescriptor],
    /// Progress event channel.
    pub progress_tx: Option<&'a Sender<AgentEvent>>,
    /// Aborts the run.
    pub cancel: &'a CancellationToken,
    /// Runner configuration.
    pub config: &'a AgentRunnerConfig,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model answered without tool calls.
    Completed,
    /// The turn budget ran out first.
    TurnBudgetExhausted,
}

/// Result of one run of the agent loop.
#[derive(Debug, Clone)]
pub struct AgentRunOutput {
    /// Final answer, or the turn-budget sentinel.
    pub content: String,
    /// How the run ended.
    pub status: RunStatus,
    /// Full conversation, starting with the system prompt.
    pub messages: Vec<Message>,
    /// Number of model invocations made.
    pub model_calls: usize,
}
