//! Fixed agent pipelines
//!
//! A workflow names its agents and a routing rule. Sequential routing passes
//! each agent's answer to the next one; concurrent routing gives every agent
//! the same input.

use super::progress::AgentEvent;
use super::runner::{AgentRunner, AgentRunnerConfig, AgentRunnerContext};
use super::tool_bridge::resolve_agent_tools;
use super::{AgentDefinition, AgentError};
use crate::llm::ModelInvoker;
use crate::sandbox::Sandbox;
use crate::tools::ToolManager;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Errors raised by the workflow runner
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Routing does not name a start agent
    #[error("Workflow routing must define a 'start' agent")]
    MissingStart,
    /// Start agent is not part of the workflow
    #[error("Start agent '{0}' not found in workflow")]
    UnknownStart(String),
    /// Workflow document could not be parsed
    #[error("Invalid workflow definition: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// An agent run failed
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// How agents in a workflow are chained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One after another, each answer feeding the next agent
    #[default]
    Sequential,
    /// All at once on the same input
    Concurrent,
}

/// Routing rule of a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRouting {
    /// First agent to run
    #[serde(default)]
    pub start: Option<String>,
    /// Chaining mode
    #[serde(default)]
    pub mode: RoutingMode,
}

/// A multi-agent workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,
    /// What the workflow does
    #[serde(default)]
    pub description: String,
    /// Participating agents in declared order
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Routing rule
    #[serde(default)]
    pub routing: WorkflowRouting,
}

impl WorkflowDefinition {
    /// Parse a workflow from YAML
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Parse` for invalid documents.
    pub fn from_yaml(source: &str) -> Result<Self, WorkflowError> {
        Ok(serde_yaml::from_str(source)?)
    }

    fn start_index(&self) -> Result<usize, WorkflowError> {
        let start = self
            .routing
            .start
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(WorkflowError::MissingStart)?;
        self.agents
            .iter()
            .position(|a| a.name == start)
            .ok_or_else(|| WorkflowError::UnknownStart(start.to_string()))
    }
}

/// One agent run within a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    /// Agent name
    pub agent: String,
    /// Input the agent received
    pub input: String,
    /// Agent's answer
    pub output: String,
}

/// Result of a workflow run
#[derive(Debug, Clone)]
pub struct WorkflowOutput {
    /// Final answer: the last agent's output, or every output joined in
    /// declared order for concurrent routing
    pub output: String,
    /// Every agent run in execution order
    pub transcript: Vec<WorkflowStep>,
}

/// Executes workflow definitions
pub struct WorkflowRunner {
    runner: AgentRunner,
    tools: Arc<ToolManager>,
    sandbox: Option<Arc<Sandbox>>,
    config: AgentRunnerConfig,
}

impl WorkflowRunner {
    /// Create a runner that invokes `model` through `invoker`
    #[must_use]
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        tools: Arc<ToolManager>,
        config: AgentRunnerConfig,
    ) -> Self {
        Self {
            runner: AgentRunner::new(invoker),
            tools,
            sandbox: None,
            config,
        }
    }

    /// Let agents that declare sandbox tools use `sandbox`
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    async fn run_agent(
        &self,
        agent: &AgentDefinition,
        input: &str,
        progress_tx: Option<&Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowStep, AgentError> {
        let tools = resolve_agent_tools(agent, &self.tools, self.sandbox.as_ref(), cancel);
        let ctx = AgentRunnerContext {
            agent_name: &agent.name,
            system_prompt: &agent.system_prompt,
            history: &[],
            input,
            tools: &tools,
            progress_tx,
            cancel,
            config: &self.config,
        };
        let output = self.runner.run(&ctx).await?;
        Ok(WorkflowStep {
            agent: agent.name.clone(),
            input: input.to_string(),
            output: output.content,
        })
    }

    /// Run `workflow` on `input`.
    ///
    /// # Errors
    ///
    /// Returns `MissingStart` or `UnknownStart` before any model call, and
    /// `Agent` if an agent run fails.
    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        input: &str,
        progress_tx: Option<&Sender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutput, WorkflowError> {
        let start = workflow.start_index()?;
        let count = workflow.agents.len();

        let transcript = match workflow.routing.mode {
            RoutingMode::Sequential => {
                let mut transcript = Vec::with_capacity(count);
                let mut current = input.to_string();
                for offset in 0..count {
                    let agent = &workflow.agents[(start + offset) % count];
                    let step = self.run_agent(agent, &current, progress_tx, cancel).await?;
                    current.clone_from(&step.output);
                    transcript.push(step);
                }
                transcript
            }
            RoutingMode::Concurrent => join_all(
                workflow
                    .agents
                    .iter()
                    .map(|agent| self.run_agent(agent, input, progress_tx, cancel)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?,
        };

        let output = match workflow.routing.mode {
            RoutingMode::Sequential => transcript
                .last()
                .map(|s| s.output.clone())
                .unwrap_or_default(),
            RoutingMode::Concurrent => transcript
                .iter()
                .map(|s| s.output.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        info!(steps = transcript.len(), "Workflow finished");
        Ok(WorkflowOutput { output, transcript })
    }
}
