//! XML skill definitions
//!
//! A definition document is either a single `<tool>` element or a container
//! element holding `<tool>` children:
//!
//! ```xml
//! <tools>
//!   <tool>
//!     <name>get_weather</name>
//!     <description>Get the current weather for a location.</description>
//!     <parameters>
//!       <parameter>
//!         <name>location</name>
//!         <type>string</type>
//!         <description>City and state</description>
//!       </parameter>
//!     </parameters>
//!   </tool>
//! </tools>
//! ```

use super::ToolDescriptor;
use roxmltree::{Document, Node};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parses skill definition documents into tool descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillLoader;

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl SkillLoader {
    /// Parse every well-formed `<tool>` in `definition`.
    ///
    /// Never fails: malformed XML yields nothing and a `<tool>` without a
    /// non-empty `<name>` is skipped.
    #[must_use]
    pub fn load_skills_from_definition(&self, definition: &str) -> Vec<ToolDescriptor> {
        let doc = match Document::parse(definition) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(error = %e, "Skill definition is not valid XML");
                return Vec::new();
            }
        };

        let root = doc.root_element();
        let tool_nodes: Vec<Node<'_, '_>> = if root.has_tag_name("tool") {
            vec![root]
        } else {
            root.children().filter(|n| n.has_tag_name("tool")).collect()
        };

        tool_nodes.into_iter().filter_map(Self::parse_tool).collect()
    }

    fn parse_tool(node: Node<'_, '_>) -> Option<ToolDescriptor> {
        let Some(name) = child_text(node, "name") else {
            debug!("Skipping skill without a name");
            return None;
        };
        let description = child_text(node, "description");

        let mut properties = Map::new();
        if let Some(params) = child(node, "parameters") {
            for param in params.children().filter(|n| n.has_tag_name("parameter")) {
                let Some(param_name) = child_text(param, "name") else {
                    continue;
                };
                let mut schema = Map::new();
                schema.insert(
                    "type".to_string(),
                    Value::String(child_text(param, "type").unwrap_or_else(|| "string".into())),
                );
                if let Some(desc) = child_text(param, "description") {
                    schema.insert("description".to_string(), Value::String(desc));
                }
                properties.insert(param_name, Value::Object(schema));
            }
        }

        Some(ToolDescriptor::declared(
            &name,
            description,
            json!({"type": "object", "properties": properties}),
        ))
    }
}

/// Skills keyed by name, in registration order
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: Vec<ToolDescriptor>,
    loader: SkillLoader,
    http: reqwest::Client,
}

impl SkillRegistry {
    /// Create an empty registry whose HTTP fetches time out after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let http = crate::utils::create_http_client(timeout);
        Self {
            skills: Vec::new(),
            loader: SkillLoader,
            http,
        }
    }

    /// Register a skill, replacing any earlier skill with the same name in place
    pub fn register_skill(&mut self, skill: ToolDescriptor) {
        if let Some(existing) = self.skills.iter_mut().find(|s| s.name == skill.name) {
            *existing = skill;
        } else {
            self.skills.push(skill);
        }
    }

    /// Look up a skill by name
    #[must_use]
    pub fn get_skill(&self, name: &str) -> Option<&ToolDescriptor> {
        self.skills.iter().find(|s| s.name == name)
    }

    /// All skills in registration order
    #[must_use]
    pub fn get_all_skills(&self) -> &[ToolDescriptor] {
        &self.skills
    }

    /// Parse `definition` and register every skill it yields. Returns the count.
    pub fn load_definition(&mut self, definition: &str) -> usize {
        let skills = self.loader.load_skills_from_definition(definition);
        let count = skills.len();
        for skill in skills {
            self.register_skill(skill);
        }
        count
    }

    /// Fetch a definition document from `registry_url` and register its skills.
    ///
    /// Fetch failures are logged and register nothing.
    pub async fn load_from_registry(&mut self, registry_url: &str) -> usize {
        let response = match self.http.get(registry_url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %registry_url, error = %e, "Failed to fetch skill registry");
                return 0;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %registry_url, status = %status, "Skill registry returned error status");
            return 0;
        }

        match response.text().await {
            Ok(body) => {
                let count = self.load_definition(&body);
                info!(url = %registry_url, count, "Loaded skills from registry");
                count
            }
            Err(e) => {
                warn!(url = %registry_url, error = %e, "Failed to read skill registry body");
                0
            }
        }
    }

    /// Read a definition document from disk and register its skills.
    ///
    /// Read failures are logged and register nothing.
    pub async fn load_from_file(&mut self, path: &Path) -> usize {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => {
                let count = self.load_definition(&body);
                info!(path = %path.display(), count, "Loaded skills from file");
                count
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read skill file");
                0
            }
        }
    }
}
