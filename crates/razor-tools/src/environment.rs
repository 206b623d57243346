use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Result of executing a shell command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// One entry of a single-level directory listing.
///
/// `is_dir` follows symlinks; `resolved` is the canonical target path and is
/// what cycle detection compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub resolved: PathBuf,
}

/// Abstraction over the file system and process execution the pipeline
/// operates in.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn read_file(&self, path: &Path) -> razor_types::Result<String>;

    /// Writes `content`, creating parent directories as needed.
    async fn write_file(&self, path: &Path, content: &str) -> razor_types::Result<()>;

    /// Size in bytes, or `None` when nothing exists at `path`.
    async fn file_size(&self, path: &Path) -> razor_types::Result<Option<u64>>;

    async fn file_exists(&self, path: &Path) -> razor_types::Result<bool> {
        Ok(self.file_size(path).await?.is_some())
    }

    /// Immediate children of `path`, in no particular order.
    async fn list_directory(&self, path: &Path) -> razor_types::Result<Vec<DirEntry>>;

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        cwd: Option<&Path>,
        env_vars: Option<&HashMap<String, String>>,
    ) -> razor_types::Result<ExecResult>;

    fn working_directory(&self) -> &Path;
}

/// Quotes `arg` for safe interpolation into a `bash -c` command line.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
