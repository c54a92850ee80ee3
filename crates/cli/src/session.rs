//! Upload sessions persisted between invocations.
//!
//! `depot token` writes the session next to the credentials it prints so
//! that `depot cancel` and `depot complete` can pick it up later.

use anyhow::{Context, Result};
use depot_core::UploadSession;
use std::path::Path;

pub async fn load_session(path: &Path) -> Result<UploadSession> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read session file: {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse session file: {}", path.display()))
}

pub async fn save_session(path: &Path, session: &UploadSession) -> Result<()> {
    let json = serde_json::to_vec_pretty(session)?;

    // The file carries the callback secret
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("failed to write session file: {}", tmp.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to write session file: {}", path.display()))?;
    Ok(())
}
