//! Tool descriptors and the sources that supply them
//!
//! Tools come from three places: XML skill definitions ([`skills`]), remote
//! tool servers ([`remote`]) and the sandbox itself ([`sandbox`]).
//! [`ToolManager`] merges the first two; sandbox tools are bound per run.

pub mod manager;
pub mod remote;
pub mod sandbox;
pub mod skills;

pub use manager::ToolManager;
pub use remote::RemoteToolRegistry;
pub use skills::{SkillLoader, SkillRegistry};

use crate::llm::ToolDefinition;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Synchronous tool body, run on the blocking pool
pub type BlockingFn = dyn Fn(Value) -> Result<String> + Send + Sync;

/// Asynchronous tool body
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with parsed JSON arguments
    async fn call(&self, args: Value) -> Result<String>;
}

/// How a tool is executed, fixed when the tool is registered
#[derive(Clone)]
pub enum ToolInvocation {
    /// Synchronous function
    Blocking(Arc<BlockingFn>),
    /// Async handler
    Suspending(Arc<dyn ToolHandler>),
    /// Declaration only, nothing to run
    Unbound,
}

impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Blocking(_) => "Blocking",
            Self::Suspending(_) => "Suspending",
            Self::Unbound => "Unbound",
        })
    }
}

/// Aborts the spawned tool task when the invocation is dropped
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A tool the model can call
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Tool name as seen by the model
    pub name: String,
    /// Description shown to the model
    pub description: Option<String>,
    /// JSON-Schema-like parameter description
    pub parameters: Value,
    /// Execution capability
    pub invocation: ToolInvocation,
    /// Sandbox this tool operates on, if any
    pub sandbox_id: Option<String>,
}

impl ToolDescriptor {
    /// Tool without a handler (skills and remote tools)
    #[must_use]
    pub fn declared(name: &str, description: Option<String>, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description,
            parameters,
            invocation: ToolInvocation::Unbound,
            sandbox_id: None,
        }
    }

    /// Tool backed by a synchronous function
    #[must_use]
    pub fn blocking<F>(name: &str, description: &str, parameters: Value, f: F) -> Self
    where
        F: Fn(Value) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            invocation: ToolInvocation::Blocking(Arc::new(f)),
            ..Self::declared(name, Some(description.to_string()), parameters)
        }
    }

    /// Tool backed by an async handler
    #[must_use]
    pub fn suspending(
        name: &str,
        description: &str,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            invocation: ToolInvocation::Suspending(handler),
            ..Self::declared(name, Some(description.to_string()), parameters)
        }
    }

    /// Bind the tool to a sandbox
    #[must_use]
    pub fn with_sandbox(mut self, sandbox_id: &str) -> Self {
        self.sandbox_id = Some(sandbox_id.to_string());
        self
    }

    /// Definition sent to the model
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            parameters: self.parameters.clone(),
        }
    }

    /// Run the tool.
    ///
    /// Handler panics are caught and surface as errors. Dropping the returned
    /// future aborts a suspending handler. A blocking function that has
    /// already started runs to completion on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, a panic message, or an error for
    /// declaration-only tools.
    pub async fn invoke(&self, args: Value) -> Result<String> {
        match &self.invocation {
            ToolInvocation::Blocking(f) => {
                let f = Arc::clone(f);
                let mut task = AbortOnDrop(tokio::task::spawn_blocking(move || f(args)));
                (&mut task.0)
                    .await
                    .map_err(|e| anyhow!("tool '{}' panicked: {e}", self.name))?
            }
            ToolInvocation::Suspending(handler) => {
                let handler = Arc::clone(handler);
                let mut task = AbortOnDrop(tokio::spawn(async move { handler.call(args).await }));
                (&mut task.0)
                    .await
                    .map_err(|e| anyhow!("tool '{}' panicked: {e}", self.name))?
            }
            ToolInvocation::Unbound => Err(anyhow!(
                "tool '{}' has no executable handler",
                self.name
            )),
        }
    }
}
