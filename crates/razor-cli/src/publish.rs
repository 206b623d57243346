//! Commit the migrated tree and push it to a branch with the `git` CLI.

use std::path::Path;

use razor_tools::{shell_quote, ExecutionEnvironment};
use razor_types::RazorError;

use crate::config::PublishConfig;

const GIT_TIMEOUT_MS: u64 = 120_000;

/// What [`publish`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub branch: String,
    pub committed: bool,
}

/// Initialise `repo_dir` as a repository if needed, commit everything in it
/// on `publish.branch`, and push the branch. A clean tree is pushed without
/// a new commit.
pub async fn publish(
    env: &dyn ExecutionEnvironment,
    publish: &PublishConfig,
    repo_dir: &Path,
) -> razor_types::Result<PublishOutcome> {
    if !env.file_exists(&repo_dir.join(".git")).await? {
        git(env, repo_dir, "git init").await?;
    }
    git(
        env,
        repo_dir,
        &format!("git checkout -B {}", shell_quote(&publish.branch)),
    )
    .await?;
    git(env, repo_dir, "git add -A").await?;

    let status = git(env, repo_dir, "git status --porcelain").await?;
    let committed = !status.trim().is_empty();
    if committed {
        git(
            env,
            repo_dir,
            &format!("git commit -m {}", shell_quote(&publish.commit_message)),
        )
        .await?;
    } else {
        tracing::info!("Nothing to commit");
    }

    git(
        env,
        repo_dir,
        &format!(
            "git push -u {} {}",
            shell_quote(&publish.remote),
            shell_quote(&publish.branch)
        ),
    )
    .await?;
    tracing::info!(branch = %publish.branch, remote = %publish.remote, committed, "Published migrated code");

    Ok(PublishOutcome {
        branch: publish.branch.clone(),
        committed,
    })
}

async fn git(
    env: &dyn ExecutionEnvironment,
    repo_dir: &Path,
    command: &str,
) -> razor_types::Result<String> {
    tracing::debug!(command, "Running git");
    let result = env
        .exec_command(command, GIT_TIMEOUT_MS, Some(repo_dir), None)
        .await?;
    if result.timed_out {
        return Err(RazorError::CommandTimeout {
            timeout_ms: GIT_TIMEOUT_MS,
        });
    }
    if !result.success() {
        return Err(RazorError::ToolError {
            tool: "git".into(),
            message: format!("`{}` failed: {}", command, result.stderr.trim()),
        });
    }
    Ok(result.stdout)
}
