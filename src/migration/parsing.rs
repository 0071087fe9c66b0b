use crate::constants::{LEGACY_INIT_CUTOFF, REMOTE_COMMIT_SUFFIX, TIMESTAMP_FORMAT, TIMESTAMP_LEN};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// A migration file read from the local migrations directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMigration {
    pub timestamp: String,
    pub filename: String,
    pub path: PathBuf,
    pub content: String,
}

/// Parse a migration filename like "20230101000000_add_users.sql" into
/// its timestamp and slug.
pub fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
    let name_without_ext = filename.strip_suffix(".sql")?;
    let (timestamp, slug) = name_without_ext.split_once('_')?;

    if timestamp.is_empty() || !timestamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some((timestamp.to_string(), slug.to_string()))
}

/// Timestamp portion of a migration filename, if it follows the naming convention
pub fn extract_timestamp(filename: &str) -> Option<String> {
    parse_migration_filename(filename).map(|(timestamp, _)| timestamp)
}

/// Whether `filename` is an `<ts>_init.sql` written by older tooling, which
/// must not be replayed.
pub fn is_legacy_init(filename: &str) -> bool {
    let Some(timestamp) = filename.strip_suffix("_init.sql") else {
        return false;
    };
    if timestamp.len() != TIMESTAMP_LEN || !timestamp.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    timestamp
        .parse::<u64>()
        .is_ok_and(|ts| ts < LEGACY_INIT_CUTOFF)
}

/// Migrations that should be replayed into a shadow database, in order.
///
/// Only the first migration is eligible for the legacy skip.
pub fn migrations_to_replay(migrations: &[LocalMigration]) -> &[LocalMigration] {
    match migrations.first() {
        Some(first) if is_legacy_init(&first.filename) => &migrations[1..],
        _ => migrations,
    }
}

/// Read every migration in `migrations_dir`, sorted by filename.
///
/// A missing directory is an empty history.
pub fn load_local_migrations(migrations_dir: &Path) -> Result<Vec<LocalMigration>> {
    let mut migrations = Vec::new();

    if !migrations_dir.exists() {
        return Ok(migrations);
    }

    let entries = std::fs::read_dir(migrations_dir).with_context(|| {
        format!(
            "Failed to read migrations directory {}",
            migrations_dir.display()
        )
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if let Some(filename) = path.file_name().and_then(|n| n.to_str())
            && let Some(timestamp) = extract_timestamp(filename)
        {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read migration {}", path.display()))?;
            migrations.push(LocalMigration {
                timestamp,
                filename: filename.to_string(),
                path,
                content,
            });
        }
    }

    // Filenames start with the timestamp, so this is chronological order
    migrations.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(migrations)
}

/// Run timestamp in the migration naming format
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn current_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Filename for a migration captured from the remote database
pub fn remote_commit_filename(timestamp: &str) -> String {
    format!("{}{}", timestamp, REMOTE_COMMIT_SUFFIX)
}
