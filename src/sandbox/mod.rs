//! Sandboxed execution for delegated agents
//!
//! A [`Sandbox`] wraps one [`SandboxBackend`] (Docker container today) and
//! tracks its lifecycle. Sandboxes are owned by the [`SandboxManager`]; callers
//! only ever hold an `Arc` reference or the sandbox id.

pub mod docker;
pub mod manager;

pub use docker::{DockerBackendFactory, DockerSandbox};
pub use manager::{BackendSelection, SandboxManager, ShutdownError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{
    SANDBOX_CPU_PERIOD, SANDBOX_CPU_QUOTA, SANDBOX_EXEC_TIMEOUT_SECS, SANDBOX_IMAGE,
    SANDBOX_MEMORY_LIMIT, SANDBOX_WORKDIR,
};

/// Exit code reported for a command killed on timeout
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Errors raised by sandbox backends and the manager
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Provisioning or teardown failed
    #[error("Sandbox lifecycle error: {0}")]
    Lifecycle(String),
    /// Operation requires a running sandbox
    #[error("Sandbox {0} is not running")]
    NotRunning(String),
    /// `start()` called on a sandbox that was already started
    #[error("Sandbox {0} was already started")]
    AlreadyStarted(String),
    /// Requested backend kind is unsupported and substitution is disabled
    #[error("Sandbox backend '{0}' is not supported")]
    Unsupported(SandboxKind),
    /// Command execution was cancelled
    #[error("Sandbox command cancelled")]
    Cancelled,
    /// Backend-level failure while executing or copying
    #[error("Sandbox backend error: {0}")]
    Backend(String),
    /// Host-side I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Container-backed sandbox (Docker)
    #[default]
    Container,
    /// Micro-VM backed sandbox (Firecracker)
    MicroVm,
}

impl SandboxKind {
    /// The variant every deployment is expected to support
    #[must_use]
    pub const fn most_portable() -> Self {
        Self::Container
    }

    /// Short name used in logs and container names
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::MicroVm => "micro_vm",
        }
    }
}

impl fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether delegated agents of one session share a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxSharing {
    /// One sandbox per session, shared by every delegated agent.
    ///
    /// Concurrent operations from different agents are not serialized.
    #[default]
    Shared,
    /// One sandbox per (session, agent) pair
    PerAgent,
}

/// Lifecycle state of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Constructed, backend not provisioned yet
    Created,
    /// Backend provisioned and accepting commands
    Running,
    /// Backend torn down
    Stopped,
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container image
    pub image: String,
    /// Memory limit in bytes
    pub memory_limit: i64,
    /// CPU period
    pub cpu_period: i64,
    /// CPU quota
    pub cpu_quota: i64,
    /// Working directory for commands and relative paths
    pub working_dir: String,
    /// Default per-command timeout
    pub exec_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: SANDBOX_IMAGE.to_string(),
            memory_limit: SANDBOX_MEMORY_LIMIT,
            cpu_period: SANDBOX_CPU_PERIOD,
            cpu_quota: SANDBOX_CPU_QUOTA,
            working_dir: SANDBOX_WORKDIR.to_string(),
            exec_timeout: Duration::from_secs(SANDBOX_EXEC_TIMEOUT_SECS),
        }
    }
}

/// Result of executing a command in the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code of the command
    pub exit_code: i64,
    /// Standard output of the command
    pub stdout: String,
    /// Standard error of the command
    pub stderr: String,
}

impl ExecResult {
    /// Sentinel result for a command killed after `timeout`
    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
        }
    }

    /// Check if the command succeeded (exit code 0)
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether this is the timeout sentinel
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// Render in the `Exit Code / Stdout / Stderr` text format
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Exit Code: {}\nStdout: {}\nStderr: {}",
            self.exit_code, self.stdout, self.stderr
        )
    }
}

/// Isolated execution backend
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend variant
    fn kind(&self) -> SandboxKind;

    /// Provision the backend
    async fn start(&self) -> Result<(), SandboxError>;

    /// Tear the backend down. Must be a no-op when already stopped.
    async fn stop(&self) -> Result<(), SandboxError>;

    /// Run `command`, killing it once `timeout` elapses or `cancel` fires.
    ///
    /// A timeout is reported through [`ExecResult::timed_out`], never as an error.
    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, SandboxError>;

    /// Copy a host file into the sandbox
    async fn upload_file(&self, src: &Path, dest: &str) -> Result<(), SandboxError>;

    /// Copy a sandbox file to the host
    async fn download_file(&self, src: &str, dest: &Path) -> Result<(), SandboxError>;
}

/// Builds backends for the kinds it supports
#[cfg_attr(test, mockall::automock)]
pub trait BackendFactory: Send + Sync {
    /// Whether `kind` can be built by this factory
    fn supports(&self, kind: SandboxKind) -> bool;

    /// Build an unstarted backend for sandbox `id`
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Unsupported` if the kind cannot be built.
    fn build(
        &self,
        id: &str,
        kind: SandboxKind,
        config: &SandboxConfig,
    ) -> Result<Box<dyn SandboxBackend>, SandboxError>;
}

/// A provisioned sandbox with its lifecycle state
pub struct Sandbox {
    id: String,
    backend: Box<dyn SandboxBackend>,
    state: RwLock<SandboxState>,
    exec_timeout: Duration,
    working_dir: String,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("kind", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Wrap an unstarted backend
    #[must_use]
    pub fn new(id: String, backend: Box<dyn SandboxBackend>, config: &SandboxConfig) -> Self {
        Self {
            id,
            backend,
            state: RwLock::new(SandboxState::Created),
            exec_timeout: config.exec_timeout,
            working_dir: config.working_dir.clone(),
        }
    }

    /// Sandbox id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Backend variant
    #[must_use]
    pub fn kind(&self) -> SandboxKind {
        self.backend.kind()
    }

    /// Default per-command timeout
    #[must_use]
    pub const fn exec_timeout(&self) -> Duration {
        self.exec_timeout
    }

    /// Working directory for relative paths
    #[must_use]
    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SandboxState {
        *self.state.read().await
    }

    /// Check if the sandbox accepts commands
    pub async fn is_running(&self) -> bool {
        self.state().await == SandboxState::Running
    }

    /// Provision the backend. Allowed once per sandbox.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` on a second call, or the backend's lifecycle error.
    #[instrument(skip(self), fields(sandbox_id = %self.id, kind = %self.kind()))]
    pub async fn start(&self) -> Result<(), SandboxError> {
        let mut state = self.state.write().await;
        if *state != SandboxState::Created {
            return Err(SandboxError::AlreadyStarted(self.id.clone()));
        }
        match self.backend.start().await {
            Ok(()) => {
                *state = SandboxState::Running;
                info!("Sandbox started");
                Ok(())
            }
            Err(e) => {
                *state = SandboxState::Stopped;
                warn!(error = %e, "Sandbox failed to start");
                Err(e)
            }
        }
    }

    /// Tear the backend down. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the backend's lifecycle error if teardown fails.
    #[instrument(skip(self), fields(sandbox_id = %self.id))]
    pub async fn stop(&self) -> Result<(), SandboxError> {
        let mut state = self.state.write().await;
        if *state == SandboxState::Stopped {
            debug!("Sandbox already stopped");
            return Ok(());
        }
        let result = self.backend.stop().await;
        *state = SandboxState::Stopped;
        if result.is_ok() {
            info!("Sandbox stopped");
        }
        result
    }

    async fn ensure_running(&self) -> Result<(), SandboxError> {
        if self.is_running().await {
            Ok(())
        } else {
            Err(SandboxError::NotRunning(self.id.clone()))
        }
    }

    /// Execute a command with the sandbox's default timeout
    ///
    /// # Errors
    ///
    /// Returns `NotRunning`, `Cancelled`, or a backend error. Timeouts are not errors.
    pub async fn execute_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, SandboxError> {
        self.execute_command_with_timeout(command, self.exec_timeout, cancel)
            .await
    }

    /// Execute a command with an explicit timeout
    ///
    /// # Errors
    ///
    /// Returns `NotRunning`, `Cancelled`, or a backend error. Timeouts are not errors.
    #[instrument(skip(self, cancel), fields(sandbox_id = %self.id))]
    pub async fn execute_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, SandboxError> {
        self.ensure_running().await?;
        self.backend.execute_command(command, timeout, cancel).await
    }

    /// Copy a host file into the sandbox
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` or a backend error.
    pub async fn upload_file(&self, src: &Path, dest: &str) -> Result<(), SandboxError> {
        self.ensure_running().await?;
        self.backend.upload_file(src, dest).await
    }

    /// Copy a sandbox file to the host
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` or a backend error.
    pub async fn download_file(&self, src: &str, dest: &Path) -> Result<(), SandboxError> {
        self.ensure_running().await?;
        self.backend.download_file(src, dest).await
    }
}

/// Drive `exec` to completion under a deadline and a cancellation token.
///
/// On timeout or cancellation `kill` runs before returning, so the process is
/// gone by the time the caller sees the result.
pub async fn run_with_deadline<E, K, KFut>(
    exec: E,
    timeout: Duration,
    cancel: &CancellationToken,
    kill: K,
) -> Result<ExecResult, SandboxError>
where
    E: Future<Output = Result<ExecResult, SandboxError>>,
    K: FnOnce() -> KFut,
    KFut: Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("Command cancelled, killing process");
            kill().await;
            Err(SandboxError::Cancelled)
        }
        res = tokio::time::timeout(timeout, exec) => {
            if let Ok(result) = res {
                result
            } else {
                warn!(timeout_secs = timeout.as_secs(), "Command timed out, killing process");
                kill().await;
                Ok(ExecResult::timed_out(timeout))
            }
        }
    }
}
