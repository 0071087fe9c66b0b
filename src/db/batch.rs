//! Applying SQL batches through a connection handle.
//!
//! The shadow builder only talks to these traits, which keeps it independent
//! of how statements reach the server.

use anyhow::Result;
use sqlx::PgPool;
use sqlx::postgres::PgConnectOptions;
use std::future::Future;

use super::connection::connect_quiet;
use super::error_context::SqlErrorContext;

pub const TRANSACTION_PREFIX: &str = "BEGIN;\n";
pub const TRANSACTION_SUFFIX: &str = "\nCOMMIT;";

/// Result of a batch that the server accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows_affected: u64,
}

/// Wrap `sql` so the whole batch commits or fails as one transaction
pub fn wrap_in_transaction(sql: &str) -> String {
    format!("{}{}{}", TRANSACTION_PREFIX, sql, TRANSACTION_SUFFIX)
}

/// A connected database that can run multi-statement SQL
pub trait SqlTarget: Send + Sync {
    fn apply_batch(
        &self,
        sql: &str,
    ) -> impl Future<Output = Result<BatchOutcome, SqlErrorContext>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens [`SqlTarget`]s from connection options
pub trait SqlConnector: Send + Sync {
    type Target: SqlTarget;

    fn connect(
        &self,
        options: &PgConnectOptions,
    ) -> impl Future<Output = Result<Self::Target>> + Send;
}

/// PostgreSQL connector backed by sqlx
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

pub struct PgTarget {
    pool: PgPool,
}

impl SqlConnector for PgConnector {
    type Target = PgTarget;

    async fn connect(&self, options: &PgConnectOptions) -> Result<PgTarget> {
        let pool = connect_quiet(options.clone()).await?;
        Ok(PgTarget { pool })
    }
}

impl SqlTarget for PgTarget {
    async fn apply_batch(&self, sql: &str) -> Result<BatchOutcome, SqlErrorContext> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|result| BatchOutcome {
                rows_affected: result.rows_affected(),
            })
            .map_err(|e| SqlErrorContext::from_sqlx_error(&e))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
