use tracing::debug;

use crate::config::types::Ledger;
use crate::error::CommitError;
use crate::ledger::display_ledger_table;
use crate::migration::LocalMigration;

/// First point where the remote history and the local files diverge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMismatch {
    Length { remote: usize, local: usize },
    Version {
        index: usize,
        remote: String,
        local: String,
    },
}

/// Compare applied versions against local migrations position by position
pub fn find_mismatch(remote: &[String], local: &[LocalMigration]) -> Option<SyncMismatch> {
    if remote.len() != local.len() {
        return Some(SyncMismatch::Length {
            remote: remote.len(),
            local: local.len(),
        });
    }

    remote
        .iter()
        .zip(local)
        .enumerate()
        .find(|(_, (version, migration))| **version != migration.timestamp)
        .map(|(index, (version, migration))| SyncMismatch::Version {
            index,
            remote: version.clone(),
            local: migration.timestamp.clone(),
        })
}

/// Fail with [`CommitError::Conflict`] unless both histories are identical
pub fn check_sync(
    remote: &[String],
    local: &[LocalMigration],
    migrations_dir: &str,
    ledger: &Ledger,
) -> Result<(), CommitError> {
    match find_mismatch(remote, local) {
        None => Ok(()),
        Some(mismatch) => {
            debug!("Migration history mismatch: {:?}", mismatch);
            Err(CommitError::Conflict {
                migrations_dir: migrations_dir.to_string(),
                ledger_table: display_ledger_table(ledger),
            })
        }
    }
}
