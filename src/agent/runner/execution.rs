//! Core execution loop for the agent runner.

use super::types::{AgentRunOutput, AgentRunnerContext, RunStatus};
use super::{AgentRunner, TURN_BUDGET_SENTINEL};
use crate::agent::progress::{emit, AgentEvent};
use crate::agent::AgentError;
use crate::llm::{Message, ToolDefinition};
use tracing::{debug, info, warn};

impl AgentRunner {
    /// Execute the agent loop until the model stops calling tools or the turn
    /// budget runs out.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Model` if a model call fails and
    /// `AgentError::Cancelled` if the run is cancelled. Tool failures and
    /// budget exhaustion are not errors.
    pub async fn run(&self, ctx: &AgentRunnerContext<'_>) -> Result<AgentRunOutput, AgentError> {
        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        messages.push(Message::system(ctx.system_prompt));
        messages.extend_from_slice(ctx.history);
        messages.push(Message::user(ctx.input));

        let definitions = Self::tool_definitions(ctx);
        let mut model_calls = 0;

        for turn in 0..ctx.config.max_turns {
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            debug!(agent = %ctx.agent_name, turn, "Agent loop iteration");

            let reply = self.call_model(ctx, &messages, &definitions).await?;
            model_calls += 1;

            if !reply.has_tool_calls() {
                let content = reply.content.clone();
                messages.push(reply);
                info!(agent = %ctx.agent_name, model_calls, "Agent finished");
                emit(
                    ctx.progress_tx,
                    AgentEvent::Finished {
                        agent: ctx.agent_name.to_string(),
                    },
                )
                .await;
                return Ok(AgentRunOutput {
                    content,
                    status: RunStatus::Completed,
                    messages,
                    model_calls,
                });
            }

            let tool_calls = reply.requested_tool_calls().to_vec();
            messages.push(reply);
            self.execute_tools(ctx, &mut messages, &tool_calls).await?;
        }

        warn!(
            agent = %ctx.agent_name,
            max_turns = ctx.config.max_turns,
            "Agent exhausted its turn budget"
        );
        Ok(AgentRunOutput {
            content: TURN_BUDGET_SENTINEL.to_string(),
            status: RunStatus::TurnBudgetExhausted,
            messages,
            model_calls,
        })
    }

    async fn call_model(
        &self,
        ctx: &AgentRunnerContext<'_>,
        messages: &[Message],
        definitions: &[ToolDefinition],
    ) -> Result<Message, AgentError> {
        let response = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            res = self.invoker.invoke(
                &ctx.config.model,
                messages,
                definitions,
                &ctx.config.extra_args,
            ) => res,
        };

        if let Err(ref e) = response {
            emit(
                ctx.progress_tx,
                AgentEvent::Error(format!("Model call failed: {e}")),
            )
            .await;
        }
        response.map_err(AgentError::Model)
    }
}

#[cfg(test)]
mod tests {
    use crate::agent::runner::{
        AgentRunner, AgentRunnerConfig, AgentRunnerContext, RunStatus, TURN_BUDGET_SENTINEL,
    };
    use crate::agent::AgentError;
    use crate::llm::{LlmError, Message, MessageRole, MockModelInvoker, ToolCall};
    use crate::tools::ToolDescriptor;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn echo_tool() -> ToolDescriptor {
        ToolDescriptor::blocking("echo", "Echo text", json!({}), |args| {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        })
    }

    fn context<'a>(
        tools: &'a [ToolDescriptor],
        cancel: &'a CancellationToken,
        config: &'a AgentRunnerConfig,
    ) -> AgentRunnerContext<'a> {
        AgentRunnerContext {
            agent_name: "coder",
            system_prompt: "You are a coder agent.",
            history: &[],
            input: "Do something",
            tools,
            progress_tx: None,
            cancel,
            config,
        }
    }

    #[tokio::test]
    async fn tool_round_then_final_answer() {
        let mut invoker = MockModelInvoker::new();
        let mut seq = mockall::Sequence::new();
        invoker
            .expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, messages, tools, _| {
                assert_eq!(messages.len(), 2);
                assert_eq!(tools.len(), 1);
                Ok(Message::assistant_with_tools(
                    "",
                    vec![ToolCall::new("call_1", "echo", r#"{"text":"output"}"#)],
                ))
            });
        invoker
            .expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, messages, _, _| {
                let last = messages.last().expect("tool result present");
                assert_eq!(last.role, MessageRole::Tool);
                assert_eq!(last.content, "output");
                Ok(Message::assistant("Done"))
            });

        let runner = AgentRunner::new(Arc::new(invoker));
        let tools = vec![echo_tool()];
        let cancel = CancellationToken::new();
        let config = AgentRunnerConfig::new("test-model");
        let output = runner
            .run(&context(&tools, &cancel, &config))
            .await
            .expect("run completes");

        assert_eq!(output.content, "Done");
        assert_eq!(output.status, RunStatus::Completed);
        assert_eq!(output.model_calls, 2);
        // system, user, assistant(tool call), tool, assistant
        assert_eq!(output.messages.len(), 5);
    }

    #[tokio::test]
    async fn budget_exhaustion_yields_sentinel() {
        let mut invoker = MockModelInvoker::new();
        invoker.expect_invoke().times(3).returning(|_, _, _, _| {
            Ok(Message::assistant_with_tools(
                "",
                vec![ToolCall::new("call_x", "echo", r#"{"text":"again"}"#)],
            ))
        });

        let runner = AgentRunner::new(Arc::new(invoker));
        let tools = vec![echo_tool()];
        let cancel = CancellationToken::new();
        let config = AgentRunnerConfig::new("test-model").with_max_turns(3);
        let output = runner
            .run(&context(&tools, &cancel, &config))
            .await
            .expect("budget exhaustion is not an error");

        assert_eq!(output.content, TURN_BUDGET_SENTINEL);
        assert_eq!(output.status, RunStatus::TurnBudgetExhausted);
        assert_eq!(output.model_calls, 3);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_invoke()
            .returning(|_, _, _, _| Err(LlmError::ApiError("rate limited".to_string())));

        let runner = AgentRunner::new(Arc::new(invoker));
        let cancel = CancellationToken::new();
        let config = AgentRunnerConfig::new("test-model");
        let err = runner
            .run(&context(&[], &cancel, &config))
            .await
            .expect_err("model error propagates");
        assert!(matches!(err, AgentError::Model(LlmError::ApiError(_))));
    }

    #[tokio::test]
    async fn cancelled_run_makes_no_model_calls() {
        let mut invoker = MockModelInvoker::new();
        invoker.expect_invoke().times(0);

        let runner = AgentRunner::new(Arc::new(invoker));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = AgentRunnerConfig::new("test-model");
        let err = runner
            .run(&context(&[], &cancel, &config))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AgentError::Cancelled));
    }
}
