//! Building a disposable database that reflects the local migrations.

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::types::{Config, escape_conninfo};
use crate::constants::POSTGRES_PORT;
use crate::db::batch::TRANSACTION_PREFIX;
use crate::db::{SqlConnector, SqlTarget, wrap_in_transaction};
use crate::docker::{
    ContainerRuntime, ContainerSpec, PullPolicy, RunContext, exec_once,
    network_create_if_absent, pull_image_if_absent, registry_image_url, run,
};
use crate::error::CommitError;
use crate::migration::{LocalMigration, migrations_to_replay};
use crate::progress::ProgressSender;
use crate::templates::{RESET_SHADOW, ShadowTemplates};

/// Where the builder is; each stage is only entered after the previous one
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowStage {
    Start,
    NetworkReady,
    ImagesReady,
    DbContainerRunning,
    DbReachable,
    SchemaReset,
    MigrationsReplayed(usize),
    Ready,
}

/// A running shadow server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowDatabase {
    /// Container name, also its host name on the run network
    pub container: String,
    /// Port published on 127.0.0.1
    pub host_port: u16,
    pub database: String,
    pub password: String,
}

impl ShadowDatabase {
    /// Options for connecting from this process through the published port
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host("127.0.0.1")
            .port(self.host_port)
            .username("postgres")
            .password(&self.password)
            .database(database)
            .ssl_mode(PgSslMode::Disable)
    }

    /// Connection string for containers on the run network
    pub fn network_conninfo(&self) -> String {
        format!(
            "dbname='{}' user='postgres' host='{}' port={} password='{}'",
            escape_conninfo(&self.database),
            escape_conninfo(&self.container),
            POSTGRES_PORT,
            escape_conninfo(&self.password)
        )
    }
}

pub struct ShadowBuilder<'a, R, C> {
    runtime: &'a R,
    connector: &'a C,
    ctx: &'a RunContext,
    config: &'a Config,
    templates: &'a ShadowTemplates,
    progress: &'a ProgressSender,
    stage: ShadowStage,
}

impl<'a, R, C> ShadowBuilder<'a, R, C>
where
    R: ContainerRuntime,
    C: SqlConnector,
{
    pub fn new(
        runtime: &'a R,
        connector: &'a C,
        ctx: &'a RunContext,
        config: &'a Config,
        templates: &'a ShadowTemplates,
        progress: &'a ProgressSender,
    ) -> Self {
        Self {
            runtime,
            connector,
            ctx,
            config,
            templates,
            progress,
            stage: ShadowStage::Start,
        }
    }

    pub fn stage(&self) -> ShadowStage {
        self.stage
    }

    fn advance(&mut self, stage: ShadowStage) {
        debug!("Shadow database: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    /// Run every stage up to [`ShadowStage::Ready`]
    pub async fn build(&mut self, migrations: &[LocalMigration]) -> Result<ShadowDatabase> {
        network_create_if_absent(self.runtime, self.ctx).await?;
        self.advance(ShadowStage::NetworkReady);

        self.pull_images().await?;
        self.advance(ShadowStage::ImagesReady);

        let mut shadow = self.start_container().await?;
        self.advance(ShadowStage::DbContainerRunning);

        self.wait_until_reachable(&shadow).await?;
        self.apply_globals(&shadow).await?;
        self.advance(ShadowStage::DbReachable);

        self.reset_schema(&mut shadow).await?;
        self.advance(ShadowStage::SchemaReset);

        let applied = self.replay(&shadow, migrations).await?;
        self.advance(ShadowStage::MigrationsReplayed(applied));

        self.advance(ShadowStage::Ready);
        Ok(shadow)
    }

    async fn pull_images(&self) -> Result<()> {
        let docker = &self.config.docker;
        let policy = PullPolicy::from(docker);

        for image in [&self.config.shadow.image, &self.config.differ.image] {
            let image = registry_image_url(&docker.registry, &docker.image_namespace, image);
            self.progress.status(format!("Pulling {}...", image));
            pull_image_if_absent(self.runtime, &image, &policy, self.ctx.cancel_token()).await?;
        }
        Ok(())
    }

    async fn start_container(&self) -> Result<ShadowDatabase> {
        let shadow_config = &self.config.shadow;
        let docker = &self.config.docker;
        let name = self.ctx.db_container();

        self.progress.status("Creating shadow database...");

        let command = shadow_config.command();
        let spec = ContainerSpec {
            image: registry_image_url(
                &docker.registry,
                &docker.image_namespace,
                &shadow_config.image,
            ),
            env: vec![format!("POSTGRES_PASSWORD={}", shadow_config.password)],
            cmd: (!command.is_empty()).then_some(command),
            labels: self.ctx.labels().clone(),
            network: Some(self.ctx.network()),
            publish_port: Some(POSTGRES_PORT),
            ..Default::default()
        };

        // Server output is not shown; the stream is dropped
        let (id, _output) = run(self.runtime, self.ctx, &name, &spec).await?;
        let host_port = self.runtime.published_port(&id, POSTGRES_PORT).await?;
        info!("Shadow database container {} on port {}", name, host_port);

        Ok(ShadowDatabase {
            container: name,
            host_port,
            database: "postgres".to_string(),
            password: shadow_config.password.clone(),
        })
    }

    /// Poll until the server answers `SELECT 1`, bounded by the readiness deadline
    async fn wait_until_reachable(&self, shadow: &ShadowDatabase) -> Result<()> {
        let shadow_config = &self.config.shadow;
        let timeout = Duration::from_secs(shadow_config.readiness_timeout_secs);
        let poll_interval = Duration::from_millis(shadow_config.poll_interval_ms);
        let deadline = Instant::now() + timeout;
        let options = shadow.connect_options("postgres");
        let cancel = self.ctx.cancel_token();

        let mut attempts = 0u32;
        loop {
            cancel.check()?;
            attempts += 1;

            let last_error = match self.connector.connect(&options).await {
                Ok(target) => {
                    let reply = target.apply_batch("SELECT 1").await;
                    target.close().await;
                    match reply {
                        Ok(_) => {
                            debug!("Shadow database reachable after {} attempt(s)", attempts);
                            return Ok(());
                        }
                        Err(e) => e.to_string(),
                    }
                }
                Err(e) => format!("{:#}", e),
            };

            if Instant::now() >= deadline {
                return Err(CommitError::ReadinessTimeout {
                    timeout_secs: shadow_config.readiness_timeout_secs,
                    last_error,
                }
                .into());
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = cancel.cancelled() => return Err(CommitError::Aborted.into()),
            }
        }
    }

    async fn apply_globals(&self, shadow: &ShadowDatabase) -> Result<()> {
        let target = self
            .connector
            .connect(&shadow.connect_options("postgres"))
            .await
            .map_err(|e| CommitError::ShadowStartup(format!("{:#}", e)))?;

        let result = target
            .apply_batch(&wrap_in_transaction(&self.templates.globals))
            .await;
        target.close().await;

        result.map(|_| ()).map_err(|e| {
            CommitError::ShadowStartup(e.format(
                "globals.sql",
                &self.templates.globals,
                TRANSACTION_PREFIX.len(),
            ))
            .into()
        })
    }

    async fn reset_schema(&self, shadow: &mut ShadowDatabase) -> Result<()> {
        self.progress.status("Resetting database...");
        let database = &self.config.shadow.database;

        let env = [
            format!("DB_NAME={}", database),
            format!("SCHEMA={}", self.templates.baseline_schema),
        ];
        let cmd = [
            "/bin/bash".to_string(),
            "-c".to_string(),
            RESET_SHADOW.to_string(),
        ];

        let output = match exec_once(self.runtime, self.ctx, &shadow.container, &env, &cmd).await {
            Ok(output) => output,
            Err(e) if CommitError::is_aborted(&e) => return Err(e),
            Err(e) => return Err(CommitError::ShadowCreation(format!("{:#}", e)).into()),
        };

        if !output.stderr.trim().is_empty() {
            return Err(CommitError::ShadowCreation(output.stderr.trim().to_string()).into());
        }

        shadow.database = database.clone();
        Ok(())
    }

    /// Apply local migrations one at a time; returns how many were applied
    async fn replay(&self, shadow: &ShadowDatabase, migrations: &[LocalMigration]) -> Result<usize> {
        let to_replay = migrations_to_replay(migrations);
        if to_replay.len() < migrations.len() {
            debug!("Skipping legacy migration {}", migrations[0].filename);
        }

        let target = self.connector.connect(&shadow.connect_options(&shadow.database)).await?;
        let result = self.apply_each(&target, to_replay).await;
        target.close().await;
        self.progress.progress(None);

        result.map(|()| to_replay.len())
    }

    async fn apply_each(&self, target: &C::Target, migrations: &[LocalMigration]) -> Result<()> {
        let cancel = self.ctx.cancel_token();
        let total = migrations.len();

        for (index, migration) in migrations.iter().enumerate() {
            cancel.check()?;
            self.progress
                .status(format!("Applying migration {}...", migration.filename));
            self.progress.progress(Some(index as f64 / total as f64));
            debug!("Applying {}", migration.filename);

            if let Err(e) = target
                .apply_batch(&wrap_in_transaction(&migration.content))
                .await
            {
                return Err(CommitError::MigrationFailed {
                    file: migration.filename.clone(),
                    details: e.format(
                        &migration.filename,
                        &migration.content,
                        TRANSACTION_PREFIX.len(),
                    ),
                }
                .into());
            }
        }
        Ok(())
    }
}
