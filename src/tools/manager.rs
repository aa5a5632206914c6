//! Unified lookup over skills and remote tools.

use super::{RemoteToolRegistry, SkillRegistry, ToolDescriptor};
use crate::config::ToolSettings;
use std::time::Duration;
use tracing::{debug, info};

/// Resolves tool names against the skill set, then the remote tool set
#[derive(Debug, Default)]
pub struct ToolManager {
    skills: SkillRegistry,
    remote: RemoteToolRegistry,
}

impl ToolManager {
    /// Create an empty manager whose HTTP fetches time out after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            skills: SkillRegistry::new(timeout),
            remote: RemoteToolRegistry::new(timeout),
        }
    }

    /// Build a manager and load every source named in `settings`.
    ///
    /// Unreachable or malformed sources contribute nothing.
    pub async fn from_settings(settings: &ToolSettings) -> Self {
        let mut manager = Self::new(settings.remote_timeout());

        for path in &settings.skill_files {
            manager.skills.load_from_file(path).await;
        }
        for url in &settings.skill_registries {
            manager.skills.load_from_registry(url).await;
        }
        for (name, url) in &settings.mcp_servers {
            manager.remote.register_server(name, url);
        }
        manager.remote.load_tools_from_all_servers().await;

        info!(
            skills = manager.skills.get_all_skills().len(),
            remote = manager.remote.get_all_tools().len(),
            "Tool sources loaded"
        );
        manager
    }

    /// Parse an XML skill document into the skill set. Returns the count.
    pub fn load_skills_from_definition(&mut self, definition: &str) -> usize {
        self.skills.load_definition(definition)
    }

    /// Load the tools listed by a remote server. Returns the count.
    pub async fn load_mcp_tools_from_server(&mut self, server_url: &str) -> usize {
        self.remote.load_tools_from_server(server_url).await
    }

    /// Skill set
    #[must_use]
    pub const fn skills(&self) -> &SkillRegistry {
        &self.skills
    }

    /// Mutable skill set
    pub fn skills_mut(&mut self) -> &mut SkillRegistry {
        &mut self.skills
    }

    /// Remote tool set
    #[must_use]
    pub const fn remote(&self) -> &RemoteToolRegistry {
        &self.remote
    }

    /// Mutable remote tool set
    pub fn remote_mut(&mut self) -> &mut RemoteToolRegistry {
        &mut self.remote
    }

    /// Find a tool by name; skills shadow remote tools
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        let found = self
            .skills
            .get_skill(name)
            .or_else(|| self.remote.get_tool(name));
        if found.is_none() {
            debug!(tool = %name, "Tool not found in any source");
        }
        found
    }

    /// Every tool from every source, skills first.
    ///
    /// A name present in both sources appears twice.
    #[must_use]
    pub fn get_all_tools(&self) -> Vec<ToolDescriptor> {
        self.skills
            .get_all_skills()
            .iter()
            .chain(self.remote.get_all_tools())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager_with_overlap() -> ToolManager {
        let mut manager = ToolManager::default();
        manager.load_skills_from_definition(
            "<tools><tool><name>search</name><description>skill</description></tool>\
             <tool><name>summarize</name></tool></tools>",
        );
        manager.remote_mut().register_tool(ToolDescriptor::declared(
            "search",
            Some("remote".to_string()),
            json!({}),
        ));
        manager.remote_mut().register_tool(ToolDescriptor::declared(
            "fetch",
            Some("remote".to_string()),
            json!({}),
        ));
        manager
    }

    #[test]
    fn skills_take_precedence() {
        let manager = manager_with_overlap();
        let tool = manager.get_tool("search").expect("search resolves");
        assert_eq!(tool.description.as_deref(), Some("skill"));
        assert_eq!(
            manager.get_tool("fetch").and_then(|t| t.description.as_deref()),
            Some("remote")
        );
        assert!(manager.get_tool("nonexistent").is_none());
    }

    #[test]
    fn listing_does_not_deduplicate() {
        let manager = manager_with_overlap();
        let names: Vec<String> = manager
            .get_all_tools()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["search", "summarize", "search", "fetch"]);
    }
}
