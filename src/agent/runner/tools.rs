//! Tool phase of the agent loop.

use super::types::AgentRunnerContext;
use super::AgentRunner;
use crate::agent::tool_bridge::{execute_tool_calls, ToolExecutionContext};
use crate::agent::AgentError;
use crate::llm::{Message, ToolCall, ToolDefinition};

impl AgentRunner {
    /// Definitions advertised to the model for this run.
    pub(super) fn tool_definitions(ctx: &AgentRunnerContext<'_>) -> Vec<ToolDefinition> {
        ctx.tools.iter().map(|t| t.definition()).collect()
    }

    /// Execute every requested call in order, appending results to `messages`.
    pub(super) async fn execute_tools(
        &self,
        ctx: &AgentRunnerContext<'_>,
        messages: &mut Vec<Message>,
        tool_calls: &[ToolCall],
    ) -> Result<(), AgentError> {
        let tool_ctx = ToolExecutionContext {
            agent_name: ctx.agent_name,
            tools: ctx.tools,
            progress_tx: ctx.progress_tx,
            cancel: ctx.cancel,
        };
        execute_tool_calls(tool_calls, &tool_ctx, messages).await
    }
}
