//! Delegation tool and single-branch execution
//!
//! The supervisor hands work to other agents by calling `delegate_to_agent`.
//! Each call becomes one independent run of the target agent.

use super::progress::AgentEvent;
use super::runner::{AgentRunner, AgentRunnerConfig, AgentRunnerContext};
use super::tool_bridge::resolve_agent_tools;
use super::{AgentError, AgentRoster};
use crate::config::SandboxSettings;
use crate::llm::ToolDefinition;
use crate::sandbox::{SandboxConfig, SandboxKind, SandboxManager, SandboxSharing};
use crate::tools::ToolManager;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Name of the synthetic delegation tool
pub const DELEGATE_TOOL: &str = "delegate_to_agent";

/// Definition of the delegation tool, with the roster's names as the allowed agents
#[must_use]
pub fn delegate_tool_definition(roster: &AgentRoster) -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_TOOL.to_string(),
        description: "Delegate a task to a specific agent.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string", "enum": roster.names()},
                "instruction": {"type": "string"}
            },
            "required": ["agent_name", "instruction"]
        }),
    }
}

/// Arguments of a delegation call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DelegateArgs {
    /// Target agent
    pub agent_name: String,
    /// Task for the agent, used as its first user input
    pub instruction: String,
}

impl DelegateArgs {
    /// Parse the JSON arguments of a delegation call
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed or incomplete arguments.
    pub fn parse(arguments: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(arguments)
    }
}

/// Which sandbox delegated agents get
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// Requested backend kind
    pub kind: SandboxKind,
    /// Backend configuration
    pub config: SandboxConfig,
    /// Shared per session or isolated per agent
    pub sharing: SandboxSharing,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from_settings(&SandboxSettings::default())
    }
}

impl SandboxPolicy {
    /// Policy described by the sandbox settings section
    #[must_use]
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            kind: settings.kind,
            config: settings.sandbox_config(),
            sharing: settings.sharing,
        }
    }

    /// Manager key of the sandbox `agent` uses within `session_key`
    #[must_use]
    pub fn sandbox_key(&self, session_key: &str, agent: &str) -> String {
        match self.sharing {
            SandboxSharing::Shared => session_key.to_string(),
            SandboxSharing::PerAgent => format!("{session_key}/{agent}"),
        }
    }
}

/// Inputs shared by every delegation branch of one request
pub struct DelegationContext<'a> {
    /// Runs the delegated agent
    pub runner: &'a AgentRunner,
    /// Agents that can be delegated to
    pub roster: &'a AgentRoster,
    /// Skill and remote tool lookup
    pub tools: &'a ToolManager,
    /// Source of sandboxes
    pub sandboxes: &'a SandboxManager,
    /// Sandbox selection and sharing
    pub sandbox_policy: &'a SandboxPolicy,
    /// Session the request belongs to
    pub session_key: &'a str,
    /// Model and budget for delegated runs
    pub runner_config: &'a AgentRunnerConfig,
    /// Progress event channel
    pub progress_tx: Option<&'a Sender<AgentEvent>>,
    /// Aborts every branch
    pub cancel: &'a CancellationToken,
}

impl DelegationContext<'_> {
    /// Run the target agent on the instruction and format its answer.
    ///
    /// An unknown agent yields an inline "not found" result with no model call.
    ///
    /// # Errors
    ///
    /// Returns model, sandbox and cancellation errors from the delegated run.
    #[instrument(skip_all, fields(agent = %args.agent_name))]
    pub async fn delegate(&self, args: &DelegateArgs) -> Result<String, AgentError> {
        let Some(agent) = self.roster.get(&args.agent_name) else {
            return Ok(format!("Agent {} not found.", args.agent_name));
        };
        info!(
            instruction = %crate::utils::truncate_str(&args.instruction, 200),
            "Delegating task"
        );

        let sandbox = if agent.uses_sandbox() {
            let key = self
                .sandbox_policy
                .sandbox_key(self.session_key, &agent.name);
            Some(
                self.sandboxes
                    .get_or_create_for_session(
                        &key,
                        self.sandbox_policy.kind,
                        &self.sandbox_policy.config,
                    )
                    .await?,
            )
        } else {
            None
        };

        let tools = resolve_agent_tools(agent, self.tools, sandbox.as_ref(), self.cancel);
        let ctx = AgentRunnerContext {
            agent_name: &agent.name,
            system_prompt: &agent.system_prompt,
            history: &[],
            input: &args.instruction,
            tools: &tools,
            progress_tx: self.progress_tx,
            cancel: self.cancel,
            config: self.runner_config,
        };
        let output = self.runner.run(&ctx).await?;

        Ok(format!("Agent {} result: {}", agent.name, output.content))
    }
}
