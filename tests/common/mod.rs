//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use oxide_cowork::llm::{LlmError, Message, ModelInvoker, ToolDefinition};
use oxide_cowork::sandbox::{
    BackendFactory, ExecResult, SandboxBackend, SandboxConfig, SandboxError, SandboxKind,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static TRACING: Once = Once::new();

/// Route library logs to the test output, filtered by `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// What the scripted model does for one call
pub struct Reply {
    pub delay: Duration,
    pub result: Result<Message, LlmError>,
}

impl Reply {
    pub fn now(message: Message) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(message),
        }
    }

    pub fn after(delay: Duration, message: Message) -> Self {
        Self {
            delay,
            result: Ok(message),
        }
    }
}

type Script = dyn Fn(&[Message], &[ToolDefinition]) -> Reply + Send + Sync;

/// Model fake driven by a closure over the request.
///
/// Records every call and the order in which calls completed, keyed by the
/// system prompt of the conversation.
pub struct ScriptedInvoker {
    script: Box<Script>,
    calls: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&[Message], &[ToolDefinition]) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        })
    }

    /// Model that answers with the content of the newest user message.
    pub fn echo() -> Arc<Self> {
        Self::new(|messages, _| {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == oxide_cowork::llm::MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Reply::now(Message::assistant(&last_user))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        _extra_args: &serde_json::Value,
    ) -> Result<Message, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.script)(messages, tools);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        let system = messages.first().map(|m| m.content.clone()).unwrap_or_default();
        self.completed.lock().expect("lock").push(system);
        reply.result
    }
}

/// Backend keeping files in memory and echoing commands
#[derive(Default)]
pub struct MemoryBackend {
    files: tokio::sync::Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SandboxBackend for MemoryBackend {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    async fn start(&self) -> Result<(), SandboxError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn execute_command(
        &self,
        command: &str,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<ExecResult, SandboxError> {
        Ok(ExecResult {
            exit_code: 0,
            stdout: format!("ran: {command}"),
            stderr: String::new(),
        })
    }

    async fn upload_file(&self, src: &Path, dest: &str) -> Result<(), SandboxError> {
        let bytes = tokio::fs::read(src).await?;
        self.files.lock().await.insert(dest.to_string(), bytes);
        Ok(())
    }

    async fn download_file(&self, src: &str, dest: &Path) -> Result<(), SandboxError> {
        let bytes = self
            .files
            .lock()
            .await
            .get(src)
            .cloned()
            .ok_or_else(|| SandboxError::Backend(format!("No such file: {src}")))?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

/// Factory building [`MemoryBackend`]s and counting how many it built
#[derive(Default)]
pub struct CountingFactory {
    pub builds: AtomicUsize,
}

impl CountingFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl BackendFactory for CountingFactory {
    fn supports(&self, kind: SandboxKind) -> bool {
        kind == SandboxKind::Container
    }

    fn build(
        &self,
        _id: &str,
        kind: SandboxKind,
        _config: &SandboxConfig,
    ) -> Result<Box<dyn SandboxBackend>, SandboxError> {
        if !self.supports(kind) {
            return Err(SandboxError::Unsupported(kind));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBackend::default()))
    }
}
