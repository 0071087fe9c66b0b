//! Scripts and SQL embedded in the binary.

use anyhow::{Context, Result, bail};
use std::path::Path;

use crate::config::types::Shadow;
use crate::constants::MAX_BASELINE_SCHEMA_BYTES;

/// Schema-only dump of the remote, used when there are no local migrations yet
pub const DUMP_INITIAL_MIGRATION: &str = include_str!("dump_initial_migration.sh");

/// Recreates the shadow database from `$SCHEMA`
pub const RESET_SHADOW: &str = include_str!("reset.sh");

pub const GLOBALS_SQL: &str = include_str!("globals.sql");
pub const INITIAL_SCHEMA_SQL: &str = include_str!("initial_schema.sql");

/// SQL used to prepare a shadow database before replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTemplates {
    /// Cluster-wide statements applied once the server is reachable
    pub globals: String,
    /// Contents of the fresh database; travels through an environment variable
    pub baseline_schema: String,
}

impl Default for ShadowTemplates {
    fn default() -> Self {
        Self {
            globals: GLOBALS_SQL.to_string(),
            baseline_schema: INITIAL_SCHEMA_SQL.to_string(),
        }
    }
}

impl ShadowTemplates {
    /// Embedded templates, replaced by any files configured in `shadow`.
    ///
    /// Relative paths are resolved against `base_dir`.
    pub fn load(shadow: &Shadow, base_dir: &Path) -> Result<Self> {
        let read = |file: &str| -> Result<String> {
            let path = base_dir.join(file);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))
        };

        let mut templates = Self::default();
        if let Some(file) = &shadow.globals_file {
            templates.globals = read(file)?;
        }
        if let Some(file) = &shadow.baseline_schema_file {
            templates.baseline_schema = read(file)?;
        }

        check_baseline_size(&templates.baseline_schema)?;
        Ok(templates)
    }
}

/// The baseline schema is handed to the reset script as `$SCHEMA`
pub fn check_baseline_size(schema: &str) -> Result<()> {
    if schema.len() > MAX_BASELINE_SCHEMA_BYTES {
        bail!(
            "Baseline schema is {} bytes; it must not exceed {} bytes to fit in an environment variable",
            schema.len(),
            MAX_BASELINE_SCHEMA_BYTES
        );
    }
    Ok(())
}
