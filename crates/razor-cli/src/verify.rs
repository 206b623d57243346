//! Optional post-migration check inside a container sandbox.

use std::path::Path;

use razor_tools::{Sandbox, SandboxOutput, VolumeBinding};

use crate::config::VerifyConfig;

/// Container path the migrated tree is mounted at.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Run `verify.command` against `target_root`. The container is stopped
/// whether or not the command succeeds.
pub async fn run_verification(
    sandbox: &dyn Sandbox,
    verify: &VerifyConfig,
    target_root: &Path,
) -> razor_types::Result<SandboxOutput> {
    let volumes = [VolumeBinding {
        host: target_root.to_path_buf(),
        container: WORKSPACE_MOUNT.to_string(),
        read_only: false,
    }];
    let handle = sandbox.start(&verify.image, &volumes).await?;
    tracing::info!(image = %verify.image, command = %verify.command, "Verifying migrated code");

    let result = sandbox.exec(&handle, &verify.command, verify.timeout_ms).await;
    if let Err(e) = sandbox.stop(handle).await {
        tracing::warn!(error = %e, "Failed to stop verification sandbox");
    }
    result
}
