//! The remote bookkeeping table recording which migrations were applied.

use crate::config::types::Ledger;
use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::future::Future;
use tracing::debug;

/// Read/append access to the applied-migration history
pub trait MigrationLedger: Send + Sync {
    /// Applied versions in ascending order
    fn applied_versions(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Append one version
    fn record_version(&self, version: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Safely format a schema-qualified table name for SQL queries
/// This prevents SQL injection by properly escaping SQL identifiers
pub fn format_ledger_table_name(ledger: &Ledger) -> Result<String> {
    // PostgreSQL identifier rules: letters, digits, underscore, dollar sign
    fn is_valid_sql_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    }

    if !is_valid_sql_identifier(&ledger.schema) {
        return Err(anyhow::anyhow!(
            "Invalid schema name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
            ledger.schema
        ));
    }

    if !is_valid_sql_identifier(&ledger.table) {
        return Err(anyhow::anyhow!(
            "Invalid table name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with letter or underscore",
            ledger.table
        ));
    }

    Ok(format!(r#""{}"."{}""#, ledger.schema, ledger.table))
}

/// Unquoted `schema.table` for messages
pub fn display_ledger_table(ledger: &Ledger) -> String {
    format!("{}.{}", ledger.schema, ledger.table)
}

/// Ledger stored in the remote database
pub struct RemoteLedger {
    pool: PgPool,
    ledger: Ledger,
}

impl RemoteLedger {
    pub fn new(pool: PgPool, ledger: Ledger) -> Self {
        Self { pool, ledger }
    }

    /// Close the underlying connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_table_exists(&self) -> Result<()> {
        let table_name = format_ledger_table_name(&self.ledger)?;

        sqlx::query(&format!(
            r#"CREATE SCHEMA IF NOT EXISTS "{}""#,
            self.ledger.schema
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create schema {}", self.ledger.schema))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version TEXT NOT NULL PRIMARY KEY)",
            table_name
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create ledger table {}", table_name))?;

        Ok(())
    }
}

/// undefined_table / invalid_schema_name: nothing has been recorded yet
fn is_missing_table(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "42P01" || code == "3F000")
}

impl MigrationLedger for RemoteLedger {
    async fn applied_versions(&self) -> Result<Vec<String>> {
        let table_name = format_ledger_table_name(&self.ledger)?;

        let rows = match sqlx::query(&format!(
            "SELECT version FROM {} ORDER BY version",
            table_name
        ))
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => {
                debug!("Ledger table {} does not exist yet", table_name);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read ledger table {}", table_name));
            }
        };

        rows.iter()
            .map(|row| row.try_get::<String, _>("version"))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read versions from ledger table {}", table_name))
    }

    async fn record_version(&self, version: &str) -> Result<()> {
        let table_name = format_ledger_table_name(&self.ledger)?;
        self.ensure_table_exists().await?;

        sqlx::query(&format!("INSERT INTO {} (version) VALUES ($1)", table_name))
            .bind(version)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record version {} in {}", version, table_name))?;

        debug!("Recorded version {} in {}", version, table_name);
        Ok(())
    }
}
