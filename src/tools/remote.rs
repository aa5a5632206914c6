//! Remote tool servers
//!
//! A server lists its tools at `GET {url}/tools` as a JSON array of
//! `{name, description, parameters}` objects.

use super::ToolDescriptor;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Tools fetched from remote servers, keyed by name in registration order
#[derive(Debug, Default)]
pub struct RemoteToolRegistry {
    servers: BTreeMap<String, String>,
    tools: Vec<ToolDescriptor>,
    http: reqwest::Client,
}

impl RemoteToolRegistry {
    /// Create an empty registry whose fetches time out after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let http = crate::utils::create_http_client(timeout);
        Self {
            servers: BTreeMap::new(),
            tools: Vec::new(),
            http,
        }
    }

    /// Remember a server under `name`
    pub fn register_server(&mut self, name: &str, url: &str) {
        self.servers.insert(name.to_string(), url.to_string());
    }

    /// Registered servers (name -> URL)
    #[must_use]
    pub const fn servers(&self) -> &BTreeMap<String, String> {
        &self.servers
    }

    /// Load tools from every registered server. Returns the total loaded.
    pub async fn load_tools_from_all_servers(&mut self) -> usize {
        let urls: Vec<(String, String)> = self
            .servers
            .iter()
            .map(|(name, url)| (name.clone(), url.clone()))
            .collect();

        let mut total = 0;
        for (name, url) in urls {
            let count = self.load_tools_from_server(&url).await;
            debug!(server = %name, count, "Server tools loaded");
            total += count;
        }
        total
    }

    /// Fetch and register the tools listed by `server_url`. Returns the count.
    ///
    /// Network failures, error statuses and malformed bodies are logged and
    /// register nothing.
    #[instrument(skip(self))]
    pub async fn load_tools_from_server(&mut self, server_url: &str) -> usize {
        let endpoint = format!("{}/tools", server_url.trim_end_matches('/'));

        let response = match self.http.get(&endpoint).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %endpoint, error = %e, "Failed to reach tool server");
                return 0;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %endpoint, status = %status, "Tool server returned error status");
            return 0;
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %endpoint, error = %e, "Tool server returned invalid JSON");
                return 0;
            }
        };

        let Value::Array(entries) = body else {
            warn!(url = %endpoint, "Tool server response is not a JSON array");
            return 0;
        };

        let mut count = 0;
        for entry in &entries {
            if let Some(tool) = Self::parse_tool(entry) {
                self.register_tool(tool);
                count += 1;
            }
        }
        info!(url = %endpoint, count, "Loaded remote tools");
        count
    }

    fn parse_tool(entry: &Value) -> Option<ToolDescriptor> {
        let name = entry.get("name").and_then(Value::as_str);
        let description = entry.get("description").and_then(Value::as_str);
        let (Some(name), Some(description)) = (name, description) else {
            warn!(
                entry = %crate::utils::truncate_str(entry.to_string(), 200),
                "Remote tool definition missing name or description"
            );
            return None;
        };

        let parameters = entry
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Some(ToolDescriptor::declared(
            name,
            Some(description.to_string()),
            parameters,
        ))
    }

    /// Register a tool, replacing any earlier tool with the same name in place
    pub fn register_tool(&mut self, tool: ToolDescriptor) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name == tool.name) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// Look up a tool by name
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// All tools in registration order
    #[must_use]
    pub fn get_all_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_without_name_or_description_are_skipped() {
        assert!(RemoteToolRegistry::parse_tool(&json!({"name": "x"})).is_none());
        assert!(RemoteToolRegistry::parse_tool(&json!({"description": "y"})).is_none());

        let tool = RemoteToolRegistry::parse_tool(&json!({"name": "x", "description": "y"}))
            .expect("valid entry");
        assert_eq!(tool.parameters, json!({}));
    }

    #[test]
    fn servers_are_tracked_by_name() {
        let mut registry = RemoteToolRegistry::default();
        registry.register_server("files", "http://localhost:9000");
        registry.register_server("files", "http://localhost:9001");
        assert_eq!(registry.servers().len(), 1);
        assert_eq!(registry.servers()["files"], "http://localhost:9001");
    }
}
