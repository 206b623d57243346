//! Local file system and subprocess execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use razor_types::RazorError;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

use crate::environment::{DirEntry, ExecResult, ExecutionEnvironment};

/// Environment backed by the local file system and `bash`.
///
/// Relative paths resolve against `root`. Commands run in their own process
/// group with secret-looking variables removed from the inherited
/// environment.
pub struct LocalExecutionEnvironment {
    root: PathBuf,
}

/// Variable name endings withheld from child processes.
const SECRET_SUFFIXES: [&str; 5] = ["_api_key", "_secret", "_token", "_password", "_credential"];

/// Grace period between SIGTERM and SIGKILL for a timed-out command.
const TERM_GRACE: Duration = Duration::from_secs(2);

impl LocalExecutionEnvironment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn current_dir() -> std::io::Result<Self> {
        std::env::current_dir().map(Self::new)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        match path.is_absolute() {
            true => path.to_path_buf(),
            false => self.root.join(path),
        }
    }

    fn scrubbed_env() -> impl Iterator<Item = (String, String)> {
        std::env::vars().filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !SECRET_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
        })
    }
}

/// Read a child pipe to the end on its own task.
fn drain<R>(pipe: R) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut pipe = pipe;
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Child pipe closed early");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// SIGTERM the child's process group, then SIGKILL after [`TERM_GRACE`].
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: the child leads its own process group (`process_group(0)`).
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
            if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Kill after timeout failed");
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &Path) -> razor_types::Result<String> {
        let resolved = self.absolute(path);
        Ok(tokio::fs::read_to_string(&resolved).await?)
    }

    async fn write_file(&self, path: &Path, content: &str) -> razor_types::Result<()> {
        let resolved = self.absolute(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(&resolved, content).await?)
    }

    async fn file_size(&self, path: &Path) -> razor_types::Result<Option<u64>> {
        match tokio::fs::metadata(self.absolute(path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_directory(&self, path: &Path) -> razor_types::Result<Vec<DirEntry>> {
        let resolved = self.absolute(path);
        let mut read_dir = tokio::fs::read_dir(&resolved).await?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let entry_path = entry.path();
            // Follow symlinks so a linked directory is walked as a directory.
            let (is_dir, size) = match tokio::fs::metadata(&entry_path).await {
                Ok(meta) => (meta.is_dir(), meta.len()),
                Err(e) => {
                    tracing::debug!(path = %entry_path.display(), error = %e, "Dangling entry");
                    (false, 0)
                }
            };
            let canonical = tokio::fs::canonicalize(&entry_path)
                .await
                .unwrap_or_else(|_| entry_path.clone());
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                is_dir,
                size,
                resolved: canonical,
            });
        }
        Ok(entries)
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        cwd: Option<&Path>,
        env_vars: Option<&HashMap<String, String>>,
    ) -> razor_types::Result<ExecResult> {
        let dir = cwd.map_or_else(|| self.root.clone(), |p| self.absolute(p));
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&dir)
            .env_clear()
            .envs(Self::scrubbed_env())
            .envs(env_vars.into_iter().flatten())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn()?;
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (drain(out), drain(err)),
            _ => {
                return Err(RazorError::Other(format!(
                    "no output pipes for `{}`",
                    command
                )))
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
            Ok(status) => {
                let status = status?;
                Ok(ExecResult {
                    stdout: stdout.await.unwrap_or_default(),
                    stderr: stderr.await.unwrap_or_default(),
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(_) => {
                terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                tracing::warn!(command, timeout_ms, dir = %dir.display(), "Command timed out");
                Ok(ExecResult {
                    stdout: String::new(),
                    stderr: format!("timed out after {}ms", timeout_ms),
                    exit_code: -1,
                    timed_out: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    fn working_directory(&self) -> &Path {
        &self.root
    }
}
