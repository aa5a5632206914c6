//! Sandbox-bound tools: `write_file`, `read_file` and `exec_command`.
//!
//! Failures are rendered into the result text so the model can react to them.

use super::{ToolDescriptor, ToolHandler};
use crate::sandbox::Sandbox;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Name of the file-writing tool
pub const WRITE_FILE: &str = "write_file";
/// Name of the file-reading tool
pub const READ_FILE: &str = "read_file";
/// Name of the command tool
pub const EXEC_COMMAND: &str = "exec_command";

/// Names of every sandbox-bound tool
pub const SANDBOX_TOOL_NAMES: [&str; 3] = [WRITE_FILE, READ_FILE, EXEC_COMMAND];

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ExecCommandArgs {
    command: String,
}

struct WriteFile {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: Value) -> Result<String> {
        let args: WriteFileArgs =
            serde_json::from_value(args).context("invalid write_file arguments")?;
        debug!(path = %args.path, size = args.content.len(), "write_file");

        let result = async {
            let scratch = tempfile::NamedTempFile::new()?;
            tokio::fs::write(scratch.path(), args.content.as_bytes()).await?;
            self.sandbox
                .upload_file(scratch.path(), &args.path)
                .await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        Ok(match result {
            Ok(()) => format!("Successfully wrote to {}", args.path),
            Err(e) => format!("Error writing file: {e}"),
        })
    }
}

struct ReadFile {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: Value) -> Result<String> {
        let args: ReadFileArgs =
            serde_json::from_value(args).context("invalid read_file arguments")?;
        debug!(path = %args.path, "read_file");

        let result = async {
            let scratch = tempfile::NamedTempFile::new()?;
            self.sandbox
                .download_file(&args.path, scratch.path())
                .await?;
            let bytes = tokio::fs::read(scratch.path()).await?;
            Ok::<_, anyhow::Error>(String::from_utf8_lossy(&bytes).into_owned())
        }
        .await;

        Ok(result.unwrap_or_else(|e| format!("Error reading file: {e}")))
    }
}

struct ExecCommand {
    sandbox: Arc<Sandbox>,
    cancel: CancellationToken,
}

#[async_trait]
impl ToolHandler for ExecCommand {
    async fn call(&self, args: Value) -> Result<String> {
        let args: ExecCommandArgs =
            serde_json::from_value(args).context("invalid exec_command arguments")?;
        let result = self
            .sandbox
            .execute_command(&args.command, &self.cancel)
            .await?;
        Ok(result.render())
    }
}

/// Build the sandbox tool set bound to `sandbox`.
///
/// Commands run with the sandbox's default timeout and stop when `cancel` fires.
#[must_use]
pub fn sandbox_tools(sandbox: &Arc<Sandbox>, cancel: &CancellationToken) -> Vec<ToolDescriptor> {
    let id = sandbox.id();
    vec![
        ToolDescriptor::suspending(
            WRITE_FILE,
            "Write content to a file in the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            Arc::new(WriteFile {
                sandbox: Arc::clone(sandbox),
            }),
        )
        .with_sandbox(id),
        ToolDescriptor::suspending(
            READ_FILE,
            "Read content from a file in the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
            Arc::new(ReadFile {
                sandbox: Arc::clone(sandbox),
            }),
        )
        .with_sandbox(id),
        ToolDescriptor::suspending(
            EXEC_COMMAND,
            "Execute a shell command in the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"}
                },
                "required": ["command"]
            }),
            Arc::new(ExecCommand {
                sandbox: Arc::clone(sandbox),
                cancel: cancel.clone(),
            }),
        )
        .with_sandbox(id),
    ]
}
