// node/src/snapshot.rs

use crate::Oracle;
use anyhow::Context;
use std::path::Path;

/// Persist the whole oracle state as one bincode file
pub fn save_snapshot(oracle: &Oracle, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let bytes = bincode::serialize(oracle)?;
    // Write then rename so a crash never leaves a truncated snapshot
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;

    tracing::info!(
        "Snapshot saved to {} ({} bytes, height {})",
        path.display(),
        bytes.len(),
        oracle.now().height
    );
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> anyhow::Result<Oracle> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let oracle: Oracle = bincode::deserialize(&bytes)
        .with_context(|| format!("decoding snapshot {}", path.display()))?;
    tracing::debug!("Snapshot loaded from {} at height {}", path.display(), oracle.now().height);
    Ok(oracle)
}

/// Write the event log from `since` onwards as JSON, one entry per line
pub fn export_events(oracle: &Oracle, since: u64, out: &mut impl std::io::Write) -> anyhow::Result<usize> {
    let entries = oracle.events().entries_since(since);
    for entry in entries {
        serde_json::to_writer(&mut *out, entry)?;
        out.write_all(b"\n")?;
    }
    Ok(entries.len())
}
