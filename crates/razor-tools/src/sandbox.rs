//! Resource-limited container sandbox for running migrated code.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use razor_types::RazorError;

use crate::environment::{shell_quote, ExecutionEnvironment};

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub image: String,
}

#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn start(&self, image: &str, volumes: &[VolumeBinding])
        -> razor_types::Result<SandboxHandle>;

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout_ms: u64,
    ) -> razor_types::Result<SandboxOutput>;

    async fn stop(&self, handle: SandboxHandle) -> razor_types::Result<()>;
}

// ---------------------------------------------------------------------------
// DockerSandbox
// ---------------------------------------------------------------------------

/// Drives the `docker` CLI. Containers idle on `tail -f /dev/null` until
/// commands are exec'd into them.
pub struct DockerSandbox {
    env: Arc<dyn ExecutionEnvironment>,
    memory_limit: String,
    cpu_quota: u64,
    control_timeout_ms: u64,
}

impl DockerSandbox {
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        Self {
            env,
            memory_limit: "512m".to_string(),
            cpu_quota: 50_000,
            control_timeout_ms: 120_000,
        }
    }

    pub fn with_limits(mut self, memory_limit: impl Into<String>, cpu_quota: u64) -> Self {
        self.memory_limit = memory_limit.into();
        self.cpu_quota = cpu_quota;
        self
    }

    fn run_command(&self, image: &str, volumes: &[VolumeBinding]) -> String {
        let mut parts = vec![
            "docker run -d".to_string(),
            format!("--memory {}", shell_quote(&self.memory_limit)),
            format!("--cpu-quota {}", self.cpu_quota),
        ];
        for v in volumes {
            let mut spec = format!("{}:{}", v.host.display(), v.container);
            if v.read_only {
                spec.push_str(":ro");
            }
            parts.push(format!("-v {}", shell_quote(&spec)));
        }
        if let Some(first) = volumes.first() {
            parts.push(format!("-w {}", shell_quote(&first.container)));
        }
        parts.push(shell_quote(image));
        parts.push("tail -f /dev/null".to_string());
        parts.join(" ")
    }

    async fn docker(&self, command: &str) -> razor_types::Result<String> {
        let result = self
            .env
            .exec_command(command, self.control_timeout_ms, None, None)
            .await?;
        if result.timed_out {
            return Err(RazorError::CommandTimeout {
                timeout_ms: self.control_timeout_ms,
            });
        }
        if result.exit_code != 0 {
            return Err(RazorError::ToolError {
                tool: "docker".into(),
                message: result.stderr.trim().to_string(),
            });
        }
        Ok(result.stdout.trim().to_string())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn start(
        &self,
        image: &str,
        volumes: &[VolumeBinding],
    ) -> razor_types::Result<SandboxHandle> {
        let id = self.docker(&self.run_command(image, volumes)).await?;
        if id.is_empty() {
            return Err(RazorError::ToolError {
                tool: "docker".into(),
                message: "docker run returned no container id".into(),
            });
        }
        tracing::info!(container = %id, image, "Sandbox started");
        Ok(SandboxHandle {
            id,
            image: image.to_string(),
        })
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout_ms: u64,
    ) -> razor_types::Result<SandboxOutput> {
        let line = format!(
            "docker exec {} sh -c {}",
            shell_quote(&handle.id),
            shell_quote(command)
        );
        let result = self.env.exec_command(&line, timeout_ms, None, None).await?;
        let mut output = result.stdout;
        if !result.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&result.stderr);
        }
        tracing::debug!(container = %handle.id, exit_code = result.exit_code, "Sandbox exec finished");
        Ok(SandboxOutput {
            exit_code: result.exit_code,
            output,
            timed_out: result.timed_out,
        })
    }

    async fn stop(&self, handle: SandboxHandle) -> razor_types::Result<()> {
        self.docker(&format!("docker rm -f {}", shell_quote(&handle.id)))
            .await?;
        tracing::info!(container = %handle.id, "Sandbox stopped");
        Ok(())
    }
}
