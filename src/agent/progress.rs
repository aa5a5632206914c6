//! Progress events emitted while agents run

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

/// Events that can occur during orchestration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentEvent {
    /// Supervisor handed a task to another agent
    Delegating {
        /// Target agent
        agent: String,
        /// Instruction given to the agent
        instruction: String,
    },
    /// Agent is calling a tool
    ToolCall {
        /// Calling agent
        agent: String,
        /// Tool name
        name: String,
        /// Tool input arguments
        input: String,
    },
    /// Agent received a tool result
    ToolResult {
        /// Calling agent
        agent: String,
        /// Tool name
        name: String,
        /// Tool execution output
        output: String,
    },
    /// Agent produced its final answer
    Finished {
        /// Agent name
        agent: String,
    },
    /// Agent encountered an error
    Error(String),
}

/// Send `event` if a progress channel is attached. A closed channel is ignored.
pub async fn emit(progress_tx: Option<&Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = progress_tx {
        let _ = tx.send(event).await;
    }
}
