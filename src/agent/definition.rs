//! Agent definitions and the roster the orchestrator delegates to

use crate::tools::sandbox::SANDBOX_TOOL_NAMES;
use serde::{Deserialize, Serialize};

/// A specialized agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique name within a roster
    pub name: String,
    /// Free-form role label
    #[serde(default)]
    pub role: String,
    /// System prompt for every run of this agent
    pub system_prompt: String,
    /// Tools the agent may call, in order
    #[serde(default, alias = "tools")]
    pub tool_names: Vec<String>,
}

impl AgentDefinition {
    /// Create a definition
    #[must_use]
    pub fn new(name: &str, system_prompt: &str, tool_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            role: String::new(),
            system_prompt: system_prompt.to_string(),
            tool_names: tool_names.iter().map(ToString::to_string).collect(),
        }
    }

    /// Set the role label
    #[must_use]
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    /// Whether any declared tool needs a sandbox
    #[must_use]
    pub fn uses_sandbox(&self) -> bool {
        self.tool_names
            .iter()
            .any(|t| SANDBOX_TOOL_NAMES.contains(&t.as_str()))
    }
}

/// Immutable set of agents, in declaration order
#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    agents: Vec<AgentDefinition>,
}

impl AgentRoster {
    /// Build a roster. A later definition with a duplicate name is ignored.
    #[must_use]
    pub fn new(definitions: Vec<AgentDefinition>) -> Self {
        let mut agents: Vec<AgentDefinition> = Vec::with_capacity(definitions.len());
        for def in definitions {
            if agents.iter().any(|a| a.name == def.name) {
                tracing::warn!(agent = %def.name, "Duplicate agent name ignored");
                continue;
            }
            agents.push(def);
        }
        Self { agents }
    }

    /// Supervisor, researcher and coder
    #[must_use]
    pub fn cowork_default() -> Self {
        Self::new(vec![
            AgentDefinition::new(
                "supervisor",
                "You are a supervisor agent. Your goal is to coordinate other agents to solve \
                 the user's problem. You have access to the following agents: 'researcher', \
                 'coder'. You can delegate tasks to them simultaneously by calling \
                 'delegate_to_agent' multiple times. Combine their outputs to answer the user.",
                &["delegate_to_agent"],
            )
            .with_role("Supervisor"),
            AgentDefinition::new(
                "researcher",
                "You are a researcher agent. You can search for information and summarize it.",
                &[],
            )
            .with_role("Researcher"),
            AgentDefinition::new(
                "coder",
                "You are a coder agent. You can write and analyze code. You have access to a \
                 sandbox environment to execute code. Use 'write_file' to create files, \
                 'exec_command' to run them, and 'read_file' to read results. Always verify \
                 your code by executing it.",
                &SANDBOX_TOOL_NAMES,
            )
            .with_role("CodeGenerator"),
        ])
    }

    /// Look up an agent by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Agent names in declaration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    /// Iterate agents in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.iter()
    }

    /// Number of agents
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the roster is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_three_agents() {
        let roster = AgentRoster::cowork_default();
        assert_eq!(roster.names(), vec!["supervisor", "researcher", "coder"]);
        assert!(roster.get("coder").is_some_and(AgentDefinition::uses_sandbox));
        assert!(!roster
            .get("researcher")
            .is_some_and(AgentDefinition::uses_sandbox));
        assert!(roster.get("auditor").is_none());
    }

    #[test]
    fn duplicate_names_keep_first() {
        let roster = AgentRoster::new(vec![
            AgentDefinition::new("a", "first", &[]),
            AgentDefinition::new("a", "second", &[]),
        ]);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("a").map(|a| a.system_prompt.as_str()), Some("first"));
    }
}
