//! Per-request conversation context

use crate::llm::Message;
use serde_json::Value;

/// Everything the orchestrator needs from the conversational pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Conversation session, if the pipeline has one
    pub session_id: Option<String>,
    /// Id of this request
    pub query_id: String,
    /// Prior conversation turns
    pub history: Vec<Message>,
    /// The newest user message
    pub user_message: Message,
    /// Model to invoke
    pub model: String,
    /// Provider-specific arguments passed through on every invocation
    pub extra_args: Value,
}

impl RequestContext {
    /// Create a context with no history and no session
    #[must_use]
    pub fn new(query_id: &str, model: &str, user_message: &str) -> Self {
        Self {
            session_id: None,
            query_id: query_id.to_string(),
            history: Vec::new(),
            user_message: Message::user(user_message),
            model: model.to_string(),
            extra_args: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach a session id
    #[must_use]
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Attach prior conversation turns
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Key used to look up the session's sandbox: session id, else query id
    #[must_use]
    pub fn session_key(&self) -> &str {
        self.session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.query_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_falls_back_to_query_id() {
        let ctx = RequestContext::new("q-1", "gpt", "hi");
        assert_eq!(ctx.session_key(), "q-1");
        assert_eq!(ctx.clone().with_session("s-9").session_key(), "s-9");
        assert_eq!(ctx.with_session("").session_key(), "q-1");
    }
}
