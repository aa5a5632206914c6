//! Supervisor loop
//!
//! The supervisor talks to the model with the delegation tool available. All
//! delegations requested in one turn run concurrently and their results are
//! joined back into the conversation in the order the calls were made.

use super::delegation::{
    delegate_tool_definition, DelegateArgs, DelegationContext, SandboxPolicy, DELEGATE_TOOL,
};
use super::progress::{emit, AgentEvent};
use super::runner::{AgentRunner, AgentRunnerConfig, RunStatus, TURN_BUDGET_SENTINEL};
use super::session::RequestContext;
use super::tool_bridge::{execute_single_tool_call, ToolExecutionContext};
use super::{AgentDefinition, AgentError, AgentRoster};
use crate::config::{Settings, AGENT_MAX_TURNS, SUPERVISOR_AGENT, SUPERVISOR_MAX_TURNS};
use crate::llm::{Message, ModelInvoker, ToolCall, ToolDefinition};
use crate::sandbox::SandboxManager;
use crate::tools::{ToolDescriptor, ToolManager};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Name of the supervising agent
    pub supervisor: String,
    /// Turn budget of each delegated agent
    pub max_turns: usize,
    /// Turn budget of the supervisor
    pub supervisor_max_turns: usize,
    /// Sandbox selection and sharing for delegated agents
    pub sandbox: SandboxPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            supervisor: SUPERVISOR_AGENT.to_string(),
            max_turns: AGENT_MAX_TURNS,
            supervisor_max_turns: SUPERVISOR_MAX_TURNS,
            sandbox: SandboxPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Config from the `agents` and `sandbox` settings sections
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            supervisor: settings.agents.supervisor.clone(),
            max_turns: settings.agents.max_turns,
            supervisor_max_turns: settings.agents.supervisor_max_turns,
            sandbox: SandboxPolicy::from_settings(&settings.sandbox),
        }
    }
}

/// Result of one orchestrated request
#[derive(Debug, Clone)]
pub struct OrchestrationOutput {
    /// Messages meant for the user: delegation notices, then the final answer
    pub emitted: Vec<Message>,
    /// Supervisor conversation, starting with its system prompt
    pub history: Vec<Message>,
    /// How the supervisor loop ended
    pub status: RunStatus,
    /// Supervisor model invocations
    pub model_calls: usize,
}

impl OrchestrationOutput {
    /// Text of the last emitted message
    #[must_use]
    pub fn final_content(&self) -> Option<&str> {
        self.emitted.last().map(|m| m.content.as_str())
    }
}

/// How one supervisor tool call will be handled
enum Planned {
    Delegate(DelegateArgs),
    BadDelegateArgs(String),
    Tool,
}

/// Supervisor with concurrent delegation
pub struct Orchestrator {
    invoker: Arc<dyn ModelInvoker>,
    runner: AgentRunner,
    roster: AgentRoster,
    tools: Arc<ToolManager>,
    sandboxes: Arc<SandboxManager>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator over a fixed roster
    #[must_use]
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        roster: AgentRoster,
        tools: Arc<ToolManager>,
        sandboxes: Arc<SandboxManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runner: AgentRunner::new(Arc::clone(&invoker)),
            invoker,
            roster,
            tools,
            sandboxes,
            config,
        }
    }

    /// Agents available for delegation
    #[must_use]
    pub const fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    fn supervisor(&self) -> AgentDefinition {
        self.roster.get(&self.config.supervisor).cloned().unwrap_or_else(|| {
            warn!(supervisor = %self.config.supervisor, "Supervisor not in roster, using bare prompt");
            AgentDefinition::new(&self.config.supervisor, "", &[DELEGATE_TOOL])
        })
    }

    /// Non-delegation tools the supervisor declares
    fn supervisor_tools(&self, supervisor: &AgentDefinition) -> Vec<ToolDescriptor> {
        supervisor
            .tool_names
            .iter()
            .filter(|name| name.as_str() != DELEGATE_TOOL)
            .filter_map(|name| self.tools.get_tool(name).cloned())
            .collect()
    }

    /// Handle one request end to end.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Model` if a model call fails, `AgentError::Sandbox`
    /// if a delegated agent's sandbox cannot be provisioned, and
    /// `AgentError::Cancelled` if `cancel` fires.
    #[instrument(skip_all, fields(session = %request.session_key()))]
    pub async fn run(
        &self,
        request: &RequestContext,
        progress_tx: Option<&Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutput, AgentError> {
        let supervisor = self.supervisor();
        let supervisor_tools = self.supervisor_tools(&supervisor);
        let mut definitions: Vec<ToolDefinition> = vec![delegate_tool_definition(&self.roster)];
        definitions.extend(supervisor_tools.iter().map(ToolDescriptor::definition));

        let mut history = Vec::with_capacity(request.history.len() + 2);
        history.push(Message::system(&supervisor.system_prompt));
        history.extend_from_slice(&request.history);
        history.push(request.user_message.clone());

        let delegate_config = AgentRunnerConfig::new(&request.model)
            .with_max_turns(self.config.max_turns)
            .with_extra_args(request.extra_args.clone());
        let delegation = DelegationContext {
            runner: &self.runner,
            roster: &self.roster,
            tools: &self.tools,
            sandboxes: &self.sandboxes,
            sandbox_policy: &self.config.sandbox,
            session_key: request.session_key(),
            runner_config: &delegate_config,
            progress_tx,
            cancel,
        };
        let tool_ctx = ToolExecutionContext {
            agent_name: &supervisor.name,
            tools: &supervisor_tools,
            progress_tx,
            cancel,
        };

        let mut emitted = Vec::new();
        for turn in 0..self.config.supervisor_max_turns {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            debug!(turn, "Supervisor turn");

            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                res = self.invoker.invoke(
                    &request.model,
                    &history,
                    &definitions,
                    &request.extra_args,
                ) => res?,
            };

            if !reply.has_tool_calls() {
                info!(model_calls = turn + 1, "Supervisor finished");
                emitted.push(reply.clone());
                history.push(reply);
                return Ok(OrchestrationOutput {
                    emitted,
                    history,
                    status: RunStatus::Completed,
                    model_calls: turn + 1,
                });
            }

            let tool_calls = reply.requested_tool_calls().to_vec();
            history.push(reply);
            let results = self
                .fan_out(&tool_calls, &delegation, &tool_ctx, &mut emitted)
                .await?;
            history.extend(results);
        }

        warn!(
            max_turns = self.config.supervisor_max_turns,
            "Supervisor exhausted its turn budget"
        );
        let sentinel = Message::assistant(TURN_BUDGET_SENTINEL);
        emitted.push(sentinel.clone());
        history.push(sentinel);
        Ok(OrchestrationOutput {
            emitted,
            history,
            status: RunStatus::TurnBudgetExhausted,
            model_calls: self.config.supervisor_max_turns,
        })
    }

    /// Run every call of one supervisor turn concurrently and return the
    /// tool-result messages in call order.
    async fn fan_out(
        &self,
        tool_calls: &[ToolCall],
        delegation: &DelegationContext<'_>,
        tool_ctx: &ToolExecutionContext<'_>,
        emitted: &mut Vec<Message>,
    ) -> Result<Vec<Message>, AgentError> {
        let mut plans = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            if call.function.name != DELEGATE_TOOL {
                plans.push(Planned::Tool);
                continue;
            }
            match DelegateArgs::parse(&call.function.arguments) {
                Ok(args) => {
                    emitted.push(Message::assistant(&format!(
                        "Delegating to **{}**...",
                        args.agent_name
                    )));
                    emit(
                        delegation.progress_tx,
                        AgentEvent::Delegating {
                            agent: args.agent_name.clone(),
                            instruction: args.instruction.clone(),
                        },
                    )
                    .await;
                    plans.push(Planned::Delegate(args));
                }
                Err(e) => plans.push(Planned::BadDelegateArgs(format!(
                    "Error: invalid arguments for '{DELEGATE_TOOL}': {e}"
                ))),
            }
        }

        let branches = tool_calls.iter().zip(plans).map(|(call, plan)| async move {
            match plan {
                Planned::Delegate(args) => delegation
                    .delegate(&args)
                    .await
                    .map(|text| Message::tool(&call.id, DELEGATE_TOOL, &text)),
                Planned::BadDelegateArgs(text) => Ok(Message::tool(&call.id, DELEGATE_TOOL, &text)),
                Planned::Tool => execute_single_tool_call(call, tool_ctx).await,
            }
        });
        let outcomes = join_all(branches).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(message) => results.push(message),
                Err(e) => {
                    warn!(error = %e, "Delegation branch failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}
