use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::time::Duration;
use tracing::debug;
use tracing::log::LevelFilter;

use crate::config::Remote;

/// Open the single connection used for the remote ledger.
///
/// The pool is capped at one connection so the run is its only user.
pub async fn connect_remote(remote: &Remote) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&remote.host)
        .port(remote.port)
        .username(&remote.username)
        .password(&remote.password)
        .database(&remote.database)
        .log_slow_statements(LevelFilter::Off, Duration::from_secs(0));

    debug!(
        "Connecting to remote database {}:{}/{}",
        remote.host, remote.port, remote.database
    );

    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to remote database at {}:{}/{}",
                remote.host, remote.port, remote.database
            )
        })
}

/// Single-connection pool with a short timeout and no slow query logging.
///
/// Migration batches can be large; sqlx would otherwise log the whole
/// statement whenever one takes longer than a second.
pub async fn connect_quiet(options: PgConnectOptions) -> Result<PgPool> {
    let location = format!(
        "{}:{}/{}",
        options.get_host(),
        options.get_port(),
        options.get_database().unwrap_or_default()
    );
    let options = options.log_slow_statements(LevelFilter::Off, Duration::from_secs(0));

    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {}", location))
}
