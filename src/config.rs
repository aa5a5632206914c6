//! Configuration and settings management
//!
//! Loads settings from optional config files and environment variables and
//! defines the compile-time defaults.

use crate::sandbox::{SandboxConfig, SandboxKind, SandboxSharing};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// Sandbox defaults
/// Default sandbox image
pub const SANDBOX_IMAGE: &str = "alpine:latest";
/// Memory limit for sandbox containers
pub const SANDBOX_MEMORY_LIMIT: i64 = 512 * 1024 * 1024; // 512MB
/// CPU period for sandbox containers
pub const SANDBOX_CPU_PERIOD: i64 = 100_000;
/// CPU quota for sandbox containers
pub const SANDBOX_CPU_QUOTA: i64 = 100_000; // 1 CPU
/// Working directory inside the sandbox
pub const SANDBOX_WORKDIR: &str = "/workspace";
/// Per-command timeout inside the sandbox
pub const SANDBOX_EXEC_TIMEOUT_SECS: u64 = 30;

// Agent defaults
/// Turn budget for a delegated agent
pub const AGENT_MAX_TURNS: usize = 10;
/// Turn budget for the supervisor
pub const SUPERVISOR_MAX_TURNS: usize = 5;
/// Name of the supervisor agent in the default roster
pub const SUPERVISOR_AGENT: &str = "supervisor";

// Tool source defaults
/// HTTP timeout when fetching remote tool and skill definitions
pub const REMOTE_TOOLS_TIMEOUT_SECS: u64 = 10;

/// Application settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Sandbox provisioning settings
    pub sandbox: SandboxSettings,
    /// Agent turn budgets and roster settings
    pub agents: AgentSettings,
    /// Tool source settings
    pub tools: ToolSettings,
}

/// Sandbox provisioning settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    /// Requested backend kind
    pub kind: SandboxKind,
    /// Container image
    pub image: String,
    /// Memory limit in bytes
    pub memory_limit: i64,
    /// CPU period
    pub cpu_period: i64,
    /// CPU quota
    pub cpu_quota: i64,
    /// Per-command timeout in seconds
    pub exec_timeout_secs: u64,
    /// Substitute the most portable backend when the requested one is unsupported
    pub allow_substitution: bool,
    /// Whether delegated agents share the session sandbox
    pub sharing: SandboxSharing,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            kind: SandboxKind::Container,
            image: SANDBOX_IMAGE.to_string(),
            memory_limit: SANDBOX_MEMORY_LIMIT,
            cpu_period: SANDBOX_CPU_PERIOD,
            cpu_quota: SANDBOX_CPU_QUOTA,
            exec_timeout_secs: SANDBOX_EXEC_TIMEOUT_SECS,
            allow_substitution: true,
            sharing: SandboxSharing::Shared,
        }
    }
}

impl SandboxSettings {
    /// Backend configuration derived from these settings
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            image: self.image.clone(),
            memory_limit: self.memory_limit,
            cpu_period: self.cpu_period,
            cpu_quota: self.cpu_quota,
            working_dir: SANDBOX_WORKDIR.to_string(),
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
        }
    }
}

/// Agent turn budgets
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AgentSettings {
    /// Name of the supervisor agent
    pub supervisor: String,
    /// Turn budget for delegated agents
    pub max_turns: usize,
    /// Turn budget for the supervisor
    pub supervisor_max_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            supervisor: SUPERVISOR_AGENT.to_string(),
            max_turns: AGENT_MAX_TURNS,
            supervisor_max_turns: SUPERVISOR_MAX_TURNS,
        }
    }
}

/// Tool source settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ToolSettings {
    /// Local XML skill definition files
    pub skill_files: Vec<PathBuf>,
    /// URLs serving XML skill definition documents
    pub skill_registries: Vec<String>,
    /// Remote tool servers (name -> base URL)
    pub mcp_servers: BTreeMap<String, String>,
    /// HTTP timeout for remote sources in seconds
    pub remote_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            skill_files: Vec::new(),
            skill_registries: Vec::new(),
            mcp_servers: BTreeMap::new(),
            remote_timeout_secs: REMOTE_TOOLS_TIMEOUT_SECS,
        }
    }
}

impl ToolSettings {
    /// HTTP timeout for remote sources
    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

impl Settings {
    /// Create new settings by loading from config files and environment
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oxide_cowork::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg. `APP__SANDBOX__IMAGE=python:3.12-alpine` sets `sandbox.image`
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
