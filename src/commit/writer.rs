use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::CommitError;
use crate::ledger::MigrationLedger;
use crate::migration::remote_commit_filename;

/// Write `<timestamp>_remote_commit.sql`, then record `timestamp` as applied.
///
/// The file is kept if recording fails; the error names it so it can be
/// reconciled by hand.
pub async fn write_migration<L: MigrationLedger>(
    ledger: &L,
    migrations_dir: &Path,
    timestamp: &str,
    content: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(migrations_dir).with_context(|| {
        format!(
            "Failed to create migrations directory {}",
            migrations_dir.display()
        )
    })?;

    let path = migrations_dir.join(remote_commit_filename(timestamp));
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write migration {}", path.display()))?;

    if let Err(e) = ledger.record_version(timestamp).await {
        return Err(CommitError::LedgerWrite {
            path,
            reason: format!("{:#}", e),
        }
        .into());
    }

    info!("Wrote {}", path.display());
    Ok(path)
}

/// Record `timestamp` as applied, then write `<timestamp>_remote_commit.sql`.
///
/// Used for the initial dump of the remote schema. If the file cannot be
/// written the ledger row stays; the error names the version to remove.
pub async fn record_then_write<L: MigrationLedger>(
    ledger: &L,
    migrations_dir: &Path,
    timestamp: &str,
    content: &str,
) -> Result<PathBuf> {
    ledger.record_version(timestamp).await?;

    let path = migrations_dir.join(remote_commit_filename(timestamp));
    std::fs::create_dir_all(migrations_dir)
        .and_then(|()| std::fs::write(&path, content))
        .with_context(|| {
            format!(
                "Recorded version {} in the remote migration history but failed to write {}",
                timestamp,
                path.display()
            )
        })?;

    info!("Wrote {}", path.display());
    Ok(path)
}
