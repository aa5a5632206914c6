//! Tool bridge module
//!
//! Resolves an agent's tool set and executes single tool calls, turning every
//! tool-level failure into result text.

use super::progress::{emit, AgentEvent};
use super::{AgentDefinition, AgentError};
use crate::llm::{Message, ToolCall};
use crate::sandbox::Sandbox;
use crate::tools::sandbox::{sandbox_tools, SANDBOX_TOOL_NAMES};
use crate::tools::{ToolDescriptor, ToolManager};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Context for tool execution
pub struct ToolExecutionContext<'a> {
    /// Agent issuing the calls
    pub agent_name: &'a str,
    /// Tools the agent may call
    pub tools: &'a [ToolDescriptor],
    /// Channel for sending progress events
    pub progress_tx: Option<&'a Sender<AgentEvent>>,
    /// Aborts in-flight tools
    pub cancel: &'a CancellationToken,
}

/// Build the tool set for one run of `agent`.
///
/// Names resolve against `tools`; sandbox tool names resolve against
/// `sandbox` when one is given. Unresolvable names are dropped.
#[must_use]
pub fn resolve_agent_tools(
    agent: &AgentDefinition,
    tools: &ToolManager,
    sandbox: Option<&Arc<Sandbox>>,
    cancel: &CancellationToken,
) -> Vec<ToolDescriptor> {
    let bound = sandbox.map(|sb| sandbox_tools(sb, cancel)).unwrap_or_default();

    agent
        .tool_names
        .iter()
        .filter_map(|name| {
            let found = if SANDBOX_TOOL_NAMES.contains(&name.as_str()) {
                bound.iter().find(|t| &t.name == name).cloned()
            } else {
                tools.get_tool(name).cloned()
            };
            if found.is_none() {
                debug!(agent = %agent.name, tool = %name, "Dropping unresolvable tool");
            }
            found
        })
        .collect()
}

fn parse_arguments(arguments: &str) -> Result<Value, serde_json::Error> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments)
}

/// Execute one tool call and return the tool-result message for it.
///
/// # Errors
///
/// Only cancellation is an error. Unknown tools, malformed arguments and tool
/// faults produce an `Error: ...` result.
pub async fn execute_single_tool_call(
    tool_call: &ToolCall,
    ctx: &ToolExecutionContext<'_>,
) -> Result<Message, AgentError> {
    if ctx.cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let name = &tool_call.function.name;
    let arguments = &tool_call.function.arguments;
    info!(
        agent = %ctx.agent_name,
        tool_name = %name,
        tool_args = %crate::utils::truncate_str(arguments, 200),
        "Executing tool call"
    );
    emit(
        ctx.progress_tx,
        AgentEvent::ToolCall {
            agent: ctx.agent_name.to_string(),
            name: name.clone(),
            input: arguments.clone(),
        },
    )
    .await;

    let output = match ctx.tools.iter().find(|t| &t.name == name) {
        None => {
            warn!(tool_name = %name, "Model called an unknown tool");
            format!("Error: tool '{name}' not found")
        }
        Some(tool) => match parse_arguments(arguments) {
            Err(e) => format!("Error: invalid arguments for '{name}': {e}"),
            Ok(args) => {
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => {
                        warn!(tool_name = %name, "Tool execution cancelled");
                        return Err(AgentError::Cancelled);
                    }
                    res = tool.invoke(args) => {
                        match res {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(tool_name = %name, error = %e, "Tool execution failed");
                                format!("Error: {e}")
                            }
                        }
                    }
                }
            }
        },
    };

    emit(
        ctx.progress_tx,
        AgentEvent::ToolResult {
            agent: ctx.agent_name.to_string(),
            name: name.clone(),
            output: output.clone(),
        },
    )
    .await;

    Ok(Message::tool(&tool_call.id, name, &output))
}

/// Execute `tool_calls` in order, appending one result message per call.
///
/// # Errors
///
/// Returns `AgentError::Cancelled` if the run is cancelled mid-way.
pub async fn execute_tool_calls(
    tool_calls: &[ToolCall],
    ctx: &ToolExecutionContext<'_>,
    messages: &mut Vec<Message>,
) -> Result<(), AgentError> {
    for tool_call in tool_calls {
        let result = execute_single_tool_call(tool_call, ctx).await?;
        messages.push(result);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::blocking("echo", "Echo", json!({}), |args| {
                Ok(args["text"].as_str().unwrap_or_default().to_string())
            }),
            ToolDescriptor::blocking("fail", "Fails", json!({}), |_| {
                Err(anyhow::anyhow!("disk full"))
            }),
        ]
    }

    async fn run_call(name: &str, arguments: &str) -> Message {
        let tools = echo_tools();
        let cancel = CancellationToken::new();
        let ctx = ToolExecutionContext {
            agent_name: "coder",
            tools: &tools,
            progress_tx: None,
            cancel: &cancel,
        };
        execute_single_tool_call(&ToolCall::new("call_1", name, arguments), &ctx)
            .await
            .expect("not cancelled")
    }

    #[tokio::test]
    async fn successful_call_is_keyed_by_call_id() {
        let msg = run_call("echo", r#"{"text":"hello"}"#).await;
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn faults_become_result_text() {
        assert_eq!(
            run_call("missing", "{}").await.content,
            "Error: tool 'missing' not found"
        );
        assert!(run_call("echo", "{not json")
            .await
            .content
            .starts_with("Error: invalid arguments for 'echo'"));
        assert_eq!(run_call("fail", "{}").await.content, "Error: disk full");
        assert_eq!(run_call("echo", "").await.content, "");
    }

    #[tokio::test]
    async fn cancelled_token_stops_execution() {
        let tools = echo_tools();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ToolExecutionContext {
            agent_name: "coder",
            tools: &tools,
            progress_tx: None,
            cancel: &cancel,
        };
        let result =
            execute_single_tool_call(&ToolCall::new("call_1", "echo", "{}"), &ctx).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn progress_events_bracket_the_call() {
        let tools = echo_tools();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let ctx = ToolExecutionContext {
            agent_name: "coder",
            tools: &tools,
            progress_tx: Some(&tx),
            cancel: &cancel,
        };
        let mut messages = Vec::new();
        execute_tool_calls(
            &[ToolCall::new("c1", "echo", r#"{"text":"a"}"#)],
            &ctx,
            &mut messages,
        )
        .await
        .expect("runs");

        assert_eq!(messages.len(), 1);
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolCall { name, .. }) if name == "echo"));
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolResult { output, .. }) if output == "a"));
    }

    #[tokio::test]
    async fn unresolvable_names_are_dropped() {
        let mut manager = ToolManager::default();
        manager.load_skills_from_definition("<tool><name>search</name></tool>");
        let agent = AgentDefinition::new("coder", "", &["search", "ghost", "exec_command"]);

        let tools = resolve_agent_tools(&agent, &manager, None, &CancellationToken::new());
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search"]);
    }

    struct SlowFlag {
        done: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl crate::tools::ToolHandler for SlowFlag {
        async fn call(&self, _args: Value) -> anyhow::Result<String> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.done.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok("finished".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_running_handler() {
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let tools = vec![ToolDescriptor::suspending(
            "slow",
            "Sleeps, then records completion",
            json!({}),
            Arc::new(SlowFlag {
                done: Arc::clone(&done),
            }),
        )];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let ctx = ToolExecutionContext {
            agent_name: "coder",
            tools: &tools,
            progress_tx: None,
            cancel: &cancel,
        };

        let result = execute_single_tool_call(&ToolCall::new("c1", "slow", "{}"), &ctx).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
