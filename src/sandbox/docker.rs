//! Docker sandbox backend using Bollard
//!
//! One container per sandbox, kept alive with `sleep infinity` and driven
//! through exec and the archive copy API.

use super::{
    run_with_deadline, BackendFactory, ExecResult, SandboxBackend, SandboxConfig, SandboxError,
    SandboxKind,
};
use crate::utils::resolve_sandbox_path;
use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http_body_util::{Either, Full};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const KILL_CONFIRM_ATTEMPTS: usize = 10;
const KILL_CONFIRM_INTERVAL: Duration = Duration::from_millis(100);

fn backend_err(context: &str, e: impl std::fmt::Display) -> SandboxError {
    SandboxError::Backend(format!("{context}: {e}"))
}

fn lifecycle_err(context: &str, e: impl std::fmt::Display) -> SandboxError {
    SandboxError::Lifecycle(format!("{context}: {e}"))
}

#[derive(Clone)]
struct ContainerHandle {
    docker: Docker,
    container_id: String,
}

/// Container-backed sandbox
pub struct DockerSandbox {
    id: String,
    config: SandboxConfig,
    handle: RwLock<Option<ContainerHandle>>,
}

impl DockerSandbox {
    /// Create an unstarted Docker sandbox
    #[must_use]
    pub fn new(id: &str, config: SandboxConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
            handle: RwLock::new(None),
        }
    }

    /// Name of the backing container
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("cowork-sandbox-{}", self.id)
    }

    async fn running_handle(&self) -> Result<ContainerHandle, SandboxError> {
        self.handle
            .read()
            .await
            .clone()
            .ok_or_else(|| SandboxError::NotRunning(self.id.clone()))
    }

    async fn exec_in(
        handle: &ContainerHandle,
        cmd: Vec<String>,
        working_dir: Option<&str>,
    ) -> Result<String, SandboxError> {
        let exec_options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            working_dir: working_dir.map(ToString::to_string),
            ..Default::default()
        };

        let exec = handle
            .docker
            .create_exec(&handle.container_id, exec_options)
            .await
            .map_err(|e| backend_err("Failed to create exec", e))?;
        Ok(exec.id)
    }

    /// Run the exec and collect output
    async fn run_exec(docker: &Docker, exec_id: &str) -> Result<ExecResult, SandboxError> {
        let output = docker
            .start_exec(exec_id, None)
            .await
            .map_err(|e| backend_err("Failed to start exec", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = output {
            while let Some(msg) = output.next().await {
                match msg.map_err(|e| backend_err("Exec stream failed", e))? {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| backend_err("Failed to inspect exec", e))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Kill the process recorded in `pid_file` and wait for the exec to stop.
    async fn kill_exec(handle: &ContainerHandle, exec_id: &str, pid_file: &str) {
        let kill_cmd = format!(
            "pid=$(cat {pid_file} 2>/dev/null) && {{ kill -9 -- -$pid 2>/dev/null || kill -9 $pid 2>/dev/null; }}; rm -f {pid_file}"
        );

        match Self::exec_in(handle, vec!["sh".into(), "-c".into(), kill_cmd], None).await {
            Ok(kill_exec_id) => {
                let _ = tokio::time::timeout(
                    Duration::from_secs(2),
                    Self::run_exec(&handle.docker, &kill_exec_id),
                )
                .await;
            }
            Err(e) => {
                warn!(container_id = %handle.container_id, error = %e, "Failed to create kill exec");
                return;
            }
        }

        for _ in 0..KILL_CONFIRM_ATTEMPTS {
            match handle.docker.inspect_exec(exec_id).await {
                Ok(inspect) if inspect.running != Some(true) => {
                    info!(exec_id = %exec_id, "Timed out process terminated");
                    return;
                }
                Ok(_) => tokio::time::sleep(KILL_CONFIRM_INTERVAL).await,
                Err(e) => {
                    warn!(exec_id = %exec_id, error = %e, "Failed to inspect killed exec");
                    return;
                }
            }
        }
        warn!(exec_id = %exec_id, "Process still running after kill");
    }
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    #[instrument(skip(self), fields(sandbox_id = %self.id, image = %self.config.image))]
    async fn start(&self) -> Result<(), SandboxError> {
        let mut guard = self.handle.write().await;
        if guard.is_some() {
            return Err(SandboxError::AlreadyStarted(self.id.clone()));
        }

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| lifecycle_err("Failed to connect to Docker daemon", e))?;
        docker
            .ping()
            .await
            .map_err(|e| lifecycle_err("Failed to ping Docker daemon", e))?;

        let host_config = HostConfig {
            memory: Some(self.config.memory_limit),
            cpu_period: Some(self.config.cpu_period),
            cpu_quota: Some(self.config.cpu_quota),
            network_mode: Some("bridge".to_string()),
            auto_remove: Some(true),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(self.config.image.clone()),
            hostname: Some("sandbox".to_string()),
            working_dir: Some(self.config.working_dir.clone()),
            host_config: Some(host_config),
            labels: Some(HashMap::from([
                ("cowork.sandbox_id".to_string(), self.id.clone()),
                ("cowork.sandbox".to_string(), "true".to_string()),
            ])),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(self.container_name()),
            ..Default::default()
        };

        let response = docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| lifecycle_err("Failed to create sandbox container", e))?;
        let container_id = response.id;
        info!(container_id = %container_id, "Sandbox container created");

        if let Err(e) = docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
        {
            let _ = docker
                .remove_container(
                    &container_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(lifecycle_err("Failed to start sandbox container", e));
        }

        *guard = Some(ContainerHandle {
            docker,
            container_id: container_id.clone(),
        });
        info!(container_id = %container_id, "Sandbox container started");
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox_id = %self.id))]
    async fn stop(&self) -> Result<(), SandboxError> {
        let Some(handle) = self.handle.write().await.take() else {
            return Ok(());
        };

        info!(container_id = %handle.container_id, "Destroying sandbox container");
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match handle
            .docker
            .remove_container(&handle.container_id, Some(options))
            .await
        {
            Ok(()) => {
                info!(container_id = %handle.container_id, "Sandbox container destroyed");
                Ok(())
            }
            // auto_remove may have beaten us to it
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %handle.container_id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(lifecycle_err("Failed to remove sandbox container", e)),
        }
    }

    #[instrument(skip(self, cancel), fields(sandbox_id = %self.id))]
    async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, SandboxError> {
        let handle = self.running_handle().await?;

        // The pid file lets a separate exec kill the command on timeout.
        let pid_file = format!("/tmp/.cowork-exec-{}.pid", Uuid::new_v4().simple());
        let wrapped = format!(
            "echo $$ > {pid_file}; exec sh -c {}",
            shell_escape::escape(command.into())
        );
        debug!(cmd = %crate::utils::truncate_str(command, 200), "Executing command in sandbox");

        let exec_id = Self::exec_in(
            &handle,
            vec!["sh".into(), "-c".into(), wrapped],
            Some(&self.config.working_dir),
        )
        .await?;

        let result = run_with_deadline(
            Self::run_exec(&handle.docker, &exec_id),
            timeout,
            cancel,
            || Self::kill_exec(&handle, &exec_id, &pid_file),
        )
        .await?;

        debug!(
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Command completed"
        );
        Ok(result)
    }

    /// Uses the tar archive format required by the Docker API and creates
    /// parent directories first.
    #[instrument(skip(self), fields(sandbox_id = %self.id))]
    async fn upload_file(&self, src: &Path, dest: &str) -> Result<(), SandboxError> {
        let handle = self.running_handle().await?;
        let content = tokio::fs::read(src).await?;

        let container_path = resolve_sandbox_path(dest, &self.config.working_dir);
        let path = Path::new(&container_path);
        let parent = path.parent().map_or_else(
            || self.config.working_dir.clone(),
            |p| p.to_string_lossy().to_string(),
        );
        let file_name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().to_string());

        let mkdir_id = Self::exec_in(
            &handle,
            vec!["mkdir".into(), "-p".into(), parent.clone()],
            None,
        )
        .await?;
        let mkdir = Self::run_exec(&handle.docker, &mkdir_id).await?;
        if !mkdir.success() {
            return Err(SandboxError::Backend(format!(
                "Failed to create directory {parent}: {}",
                mkdir.stderr.trim()
            )));
        }

        let mut tar_buffer = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_buffer);
            let mut header = tar::Header::new_gnu();
            header.set_path(&file_name)?;
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            );
            header.set_cksum();
            builder.append(&header, content.as_slice())?;
            builder.finish()?;
        }

        handle
            .docker
            .upload_to_container(
                &handle.container_id,
                Some(UploadToContainerOptions {
                    path: parent,
                    ..Default::default()
                }),
                Either::Left(Full::new(Bytes::from(tar_buffer))),
            )
            .await
            .map_err(|e| backend_err("Failed to upload file to container", e))?;

        info!(path = %container_path, size = content.len(), "File uploaded to sandbox");
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox_id = %self.id))]
    async fn download_file(&self, src: &str, dest: &Path) -> Result<(), SandboxError> {
        let handle = self.running_handle().await?;
        let container_path = resolve_sandbox_path(src, &self.config.working_dir);

        let chunks = handle
            .docker
            .download_from_container(
                &handle.container_id,
                Some(DownloadFromContainerOptions {
                    path: container_path.clone(),
                }),
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| backend_err(&format!("Failed to download {container_path}"), e))?;

        let tar_data: Vec<u8> = chunks.into_iter().flatten().collect();

        let content = {
            let mut archive = tar::Archive::new(tar_data.as_slice());
            let mut entries = archive.entries()?;
            let Some(entry) = entries.next() else {
                return Err(SandboxError::Backend(format!(
                    "Empty archive received for {container_path}"
                )));
            };
            let mut entry = entry?;
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            content
        };

        tokio::fs::write(dest, &content).await?;
        info!(path = %container_path, size = content.len(), "File downloaded from sandbox");
        Ok(())
    }
}

/// Factory for Docker-backed sandboxes
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerBackendFactory;

impl BackendFactory for DockerBackendFactory {
    fn supports(&self, kind: SandboxKind) -> bool {
        kind == SandboxKind::Container
    }

    fn build(
        &self,
        id: &str,
        kind: SandboxKind,
        config: &SandboxConfig,
    ) -> Result<Box<dyn SandboxBackend>, SandboxError> {
        if !self.supports(kind) {
            return Err(SandboxError::Unsupported(kind));
        }
        Ok(Box::new(DockerSandbox::new(id, config.clone())))
    }
}
