//! Sandbox registry
//!
//! Owns every live [`Sandbox`] and maps conversation sessions to them. At most
//! one sandbox exists per session key.

use super::{BackendFactory, Sandbox, SandboxConfig, SandboxError, SandboxKind};
use crate::config::SandboxSettings;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Outcome of backend negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSelection {
    /// Kind the caller asked for
    pub requested: SandboxKind,
    /// Kind that will actually be built
    pub selected: SandboxKind,
}

impl BackendSelection {
    /// Whether the requested kind was replaced
    #[must_use]
    pub fn substituted(&self) -> bool {
        self.requested != self.selected
    }
}

/// Teardown failures collected during [`SandboxManager::shutdown`]
#[derive(Debug, Error)]
pub struct ShutdownError {
    /// `(sandbox id, error)` for every sandbox that failed to stop
    pub failures: Vec<(String, SandboxError)>,
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sandbox(es) failed to stop:", self.failures.len())?;
        for (id, err) in &self.failures {
            write!(f, " [{id}: {err}]")?;
        }
        Ok(())
    }
}

type SessionSlot = Arc<Mutex<Option<String>>>;

/// Registry of live sandboxes
pub struct SandboxManager {
    factory: Arc<dyn BackendFactory>,
    allow_substitution: bool,
    instances: RwLock<HashMap<String, Arc<Sandbox>>>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    // Set under the `instances` write lock so registration cannot race shutdown
    closed: AtomicBool,
}

impl fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxManager")
            .field("allow_substitution", &self.allow_substitution)
            .finish_non_exhaustive()
    }
}

impl SandboxManager {
    /// Create an empty manager backed by `factory`
    #[must_use]
    pub fn new(factory: Arc<dyn BackendFactory>, allow_substitution: bool) -> Self {
        Self {
            factory,
            allow_substitution,
            instances: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a manager honoring the `sandbox.allow_substitution` setting
    #[must_use]
    pub fn from_settings(factory: Arc<dyn BackendFactory>, settings: &SandboxSettings) -> Self {
        Self::new(factory, settings.allow_substitution)
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error() -> SandboxError {
        SandboxError::Lifecycle("Sandbox manager is shut down".to_string())
    }

    /// Decide which backend kind to build for `requested`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` when the kind is unavailable and substitution is
    /// disabled, or when even the fallback kind is unavailable.
    pub fn negotiate(&self, requested: SandboxKind) -> Result<BackendSelection, SandboxError> {
        if self.factory.supports(requested) {
            return Ok(BackendSelection {
                requested,
                selected: requested,
            });
        }

        let fallback = SandboxKind::most_portable();
        if !self.allow_substitution || !self.factory.supports(fallback) {
            return Err(SandboxError::Unsupported(requested));
        }

        warn!(
            requested = %requested,
            selected = %fallback,
            "Sandbox backend unsupported, substituting"
        );
        Ok(BackendSelection {
            requested,
            selected: fallback,
        })
    }

    /// Provision and register a new sandbox.
    ///
    /// Nothing is registered if the backend fails to start. A sandbox that
    /// finishes starting after [`shutdown`](Self::shutdown) is stopped again.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` from negotiation, the backend's lifecycle error,
    /// or `Lifecycle` once the manager is shut down.
    #[instrument(skip(self, config))]
    pub async fn create(
        &self,
        kind: SandboxKind,
        config: &SandboxConfig,
    ) -> Result<Arc<Sandbox>, SandboxError> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        let selection = self.negotiate(kind)?;
        let id = Uuid::new_v4().to_string();
        let backend = self.factory.build(&id, selection.selected, config)?;
        let sandbox = Arc::new(Sandbox::new(id.clone(), backend, config));

        sandbox.start().await?;

        let mut instances = self.instances.write().await;
        if self.is_closed() {
            drop(instances);
            warn!(sandbox_id = %id, "Manager shut down during provisioning, stopping sandbox");
            if let Err(e) = sandbox.stop().await {
                warn!(sandbox_id = %id, error = %e, "Failed to stop late sandbox");
            }
            return Err(Self::closed_error());
        }
        instances.insert(id.clone(), Arc::clone(&sandbox));
        drop(instances);
        info!(sandbox_id = %id, kind = %selection.selected, "Sandbox registered");
        Ok(sandbox)
    }

    /// Look up a sandbox by id
    pub async fn get(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.instances.read().await.get(id).cloned()
    }

    /// Stop and unregister a sandbox. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the stop fails. The entry is removed
    /// either way.
    #[instrument(skip(self))]
    pub async fn destroy(&self, id: &str) -> Result<(), SandboxError> {
        let Some(sandbox) = self.instances.write().await.remove(id) else {
            debug!("Sandbox not registered, nothing to destroy");
            return Ok(());
        };

        self.forget_sessions_for(id).await;
        sandbox.stop().await
    }

    /// Destroy every registered sandbox, collecting failures.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] listing each sandbox that failed to stop.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let drained: Vec<(String, Arc<Sandbox>)> = {
            let mut instances = self.instances.write().await;
            self.closed.store(true, Ordering::SeqCst);
            instances.drain().collect()
        };
        self.sessions.lock().await.clear();

        info!(count = drained.len(), "Shutting down sandboxes");
        let mut failures = Vec::new();
        for (id, sandbox) in drained {
            if let Err(e) = sandbox.stop().await {
                warn!(sandbox_id = %id, error = %e, "Sandbox failed to stop during shutdown");
                failures.push((id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    /// Return the session's sandbox, provisioning it on first use.
    ///
    /// Concurrent callers for the same key wait on a per-session lock, so the
    /// backend is provisioned exactly once.
    ///
    /// # Errors
    ///
    /// Returns the creation error if provisioning fails.
    #[instrument(skip_all, fields(session = %session_key, kind = %kind))]
    pub async fn get_or_create_for_session(
        &self,
        session_key: &str,
        kind: SandboxKind,
        config: &SandboxConfig,
    ) -> Result<Arc<Sandbox>, SandboxError> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(session_key.to_string()).or_default())
        };

        let mut bound = slot.lock().await;
        if let Some(id) = bound.as_deref() {
            if let Some(sandbox) = self.get(id).await {
                debug!(sandbox_id = %id, "Reusing session sandbox");
                return Ok(sandbox);
            }
            debug!(sandbox_id = %id, "Session sandbox gone, provisioning a new one");
        }

        let sandbox = self.create(kind, config).await?;
        *bound = Some(sandbox.id().to_string());
        Ok(sandbox)
    }

    /// Sandbox currently bound to `session_key`, if any
    pub async fn session_sandbox(&self, session_key: &str) -> Option<Arc<Sandbox>> {
        let slot = self.sessions.lock().await.get(session_key).cloned()?;
        let id = slot.lock().await.clone()?;
        self.get(&id).await
    }

    /// Destroy the sandbox bound to `session_key`, if any
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the stop fails.
    pub async fn release_session(&self, session_key: &str) -> Result<(), SandboxError> {
        let Some(slot) = self.sessions.lock().await.remove(session_key) else {
            return Ok(());
        };
        let id = slot.lock().await.take();
        match id {
            Some(id) => self.destroy(&id).await,
            None => Ok(()),
        }
    }

    /// Number of registered sandboxes
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Whether no sandboxes are registered
    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    async fn forget_sessions_for(&self, id: &str) {
        let slots: Vec<(String, SessionSlot)> = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut stale = Vec::new();
        for (key, slot) in slots {
            // A slot held by an in-flight provisioning cannot point at `id`.
            let Ok(mut bound) = slot.try_lock() else {
                continue;
            };
            if bound.as_deref() == Some(id) {
                *bound = None;
                stale.push(key);
            }
        }

        if !stale.is_empty() {
            let mut sessions = self.sessions.lock().await;
            for key in stale {
                sessions.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecResult, MockBackendFactory, SandboxBackend};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct StubBackend {
        kind: SandboxKind,
        fail_start: bool,
        fail_stop: bool,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SandboxBackend for StubBackend {
        fn kind(&self) -> SandboxKind {
            self.kind
        }

        async fn start(&self) -> Result<(), SandboxError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail_start {
                return Err(SandboxError::Lifecycle("daemon unreachable".to_string()));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), SandboxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(SandboxError::Lifecycle("remove failed".to_string()));
            }
            Ok(())
        }

        async fn execute_command(
            &self,
            _command: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<ExecResult, SandboxError> {
            Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn upload_file(&self, _src: &Path, _dest: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn download_file(&self, _src: &str, _dest: &Path) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    fn stub(kind: SandboxKind) -> Box<dyn SandboxBackend> {
        Box::new(StubBackend {
            kind,
            ..StubBackend::default()
        })
    }

    fn container_only_factory(builds: Arc<AtomicUsize>) -> MockBackendFactory {
        let mut factory = MockBackendFactory::new();
        factory
            .expect_supports()
            .returning(|kind| kind == SandboxKind::Container);
        factory.expect_build().returning(move |_, kind, _| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(stub(kind))
        });
        factory
    }

    #[tokio::test]
    async fn substitution_is_reported() {
        let manager = SandboxManager::new(
            Arc::new(container_only_factory(Arc::default())),
            true,
        );
        let selection = manager
            .negotiate(SandboxKind::MicroVm)
            .expect("substitution allowed");
        assert!(selection.substituted());
        assert_eq!(selection.selected, SandboxKind::Container);

        let sandbox = manager
            .create(SandboxKind::MicroVm, &SandboxConfig::default())
            .await
            .expect("created with fallback");
        assert_eq!(sandbox.kind(), SandboxKind::Container);
    }

    #[tokio::test]
    async fn unsupported_kind_fails_without_substitution() {
        let builds = Arc::new(AtomicUsize::new(0));
        let manager = SandboxManager::new(
            Arc::new(container_only_factory(Arc::clone(&builds))),
            false,
        );
        let err = manager
            .create(SandboxKind::MicroVm, &SandboxConfig::default())
            .await
            .expect_err("must not substitute");
        assert!(matches!(err, SandboxError::Unsupported(SandboxKind::MicroVm)));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn failed_start_registers_nothing() {
        let mut factory = MockBackendFactory::new();
        factory.expect_supports().return_const(true);
        factory.expect_build().returning(|_, kind, _| {
            Ok(Box::new(StubBackend {
                kind,
                fail_start: true,
                ..StubBackend::default()
            }))
        });
        let manager = SandboxManager::new(Arc::new(factory), true);

        let err = manager
            .create(SandboxKind::Container, &SandboxConfig::default())
            .await
            .expect_err("start fails");
        assert!(matches!(err, SandboxError::Lifecycle(_)));
        assert_eq!(manager.len().await, 0);
    }

    #[tokio::test]
    async fn destroy_removes_entry_and_ignores_unknown_ids() {
        let manager = SandboxManager::new(
            Arc::new(container_only_factory(Arc::default())),
            true,
        );
        let sandbox = manager
            .get_or_create_for_session("s1", SandboxKind::Container, &SandboxConfig::default())
            .await
            .expect("created");

        manager.destroy(sandbox.id()).await.expect("destroy");
        assert!(manager.get(sandbox.id()).await.is_none());
        assert!(manager.session_sandbox("s1").await.is_none());
        assert!(!sandbox.is_running().await);

        manager.destroy("missing").await.expect("no-op");
    }

    #[tokio::test]
    async fn session_acquisition_is_idempotent_under_concurrency() {
        let builds = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(SandboxManager::new(
            Arc::new(container_only_factory(Arc::clone(&builds))),
            true,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .get_or_create_for_session(
                            "session-a",
                            SandboxKind::Container,
                            &SandboxConfig::default(),
                        )
                        .await
                        .map(|sb| sb.id().to_string())
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join").expect("sandbox"));
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn release_session_allows_fresh_sandbox() {
        let builds = Arc::new(AtomicUsize::new(0));
        let manager = SandboxManager::new(
            Arc::new(container_only_factory(Arc::clone(&builds))),
            true,
        );
        let config = SandboxConfig::default();

        let first = manager
            .get_or_create_for_session("s", SandboxKind::Container, &config)
            .await
            .expect("first");
        manager.release_session("s").await.expect("release");
        let second = manager
            .get_or_create_for_session("s", SandboxKind::Container, &config)
            .await
            .expect("second");

        assert_ne!(first.id(), second.id());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        manager.release_session("never-seen").await.expect("no-op");
    }

    #[tokio::test]
    async fn shutdown_collects_failures_and_empties_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut factory = MockBackendFactory::new();
        factory.expect_supports().return_const(true);
        let counter = Arc::clone(&calls);
        factory.expect_build().returning(move |_, kind, _| {
            // every other sandbox refuses to stop
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubBackend {
                kind,
                fail_stop: n % 2 == 1,
                ..StubBackend::default()
            }))
        });
        let manager = SandboxManager::new(Arc::new(factory), true);
        let config = SandboxConfig::default();
        for _ in 0..4 {
            manager
                .create(SandboxKind::Container, &config)
                .await
                .expect("create");
        }

        let err = manager.shutdown().await.expect_err("two stops fail");
        assert_eq!(err.failures.len(), 2);
        assert!(manager.is_empty().await);
        assert!(err.to_string().starts_with("2 sandbox(es) failed to stop"));
    }

    #[tokio::test(start_paused = true)]
    async fn sandbox_finishing_start_after_shutdown_is_stopped() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut factory = MockBackendFactory::new();
        factory.expect_supports().return_const(true);
        let counter = Arc::clone(&stops);
        factory.expect_build().returning(move |_, kind, _| {
            Ok(Box::new(StubBackend {
                kind,
                stops: Arc::clone(&counter),
                ..StubBackend::default()
            }))
        });
        let manager = Arc::new(SandboxManager::new(Arc::new(factory), true));

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .get_or_create_for_session("s", SandboxKind::Container, &SandboxConfig::default())
                    .await
                    .map(|sb| sb.id().to_string())
            })
        };
        // StubBackend::start takes 10ms
        tokio::time::sleep(Duration::from_millis(2)).await;
        manager.shutdown().await.expect("nothing registered yet");

        let err = pending.await.expect("join").expect_err("manager closed");
        assert!(matches!(err, SandboxError::Lifecycle(_)));
        assert_eq!(manager.len().await, 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(manager.is_closed());

        let again = manager
            .get_or_create_for_session("s", SandboxKind::Container, &SandboxConfig::default())
            .await;
        assert!(matches!(again, Err(SandboxError::Lifecycle(_))));
        assert_eq!(manager.len().await, 0);
    }

    #[tokio::test]
    async fn settings_can_forbid_substitution() {
        let builds = Arc::new(AtomicUsize::new(0));
        let settings = SandboxSettings {
            kind: SandboxKind::MicroVm,
            allow_substitution: false,
            ..SandboxSettings::default()
        };
        let manager = SandboxManager::from_settings(
            Arc::new(container_only_factory(Arc::clone(&builds))),
            &settings,
        );

        let err = manager
            .create(settings.kind, &settings.sandbox_config())
            .await
            .expect_err("substitution disabled");
        assert!(matches!(err, SandboxError::Unsupported(SandboxKind::MicroVm)));
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let permissive = SandboxManager::from_settings(
            Arc::new(container_only_factory(Arc::default())),
            &SandboxSettings {
                kind: SandboxKind::MicroVm,
                ..SandboxSettings::default()
            },
        );
        assert!(permissive
            .negotiate(SandboxKind::MicroVm)
            .expect("substitution allowed by default")
            .substituted());
    }
}
