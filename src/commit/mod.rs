//! Capturing drift on the remote database as a new local migration.
//!
//! A run checks that both histories agree, replays the local migrations into
//! a shadow database, diffs it against the remote and writes the result.
//! Containers and the run network are removed however the run ends.

pub mod diff;
pub mod shadow;
pub mod sync;
pub mod writer;

use anyhow::Result;
use futures_util::{Stream, stream};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::types::Config;
use crate::db::SqlConnector;
use crate::docker::{
    ContainerRuntime, ContainerSpec, PullPolicy, RunContext, pull_image_if_absent,
    registry_image_url, remove_all, run_once,
};
use crate::error::CommitError;
use crate::ledger::MigrationLedger;
use crate::migration::{LocalMigration, load_local_migrations};
use crate::progress::{self, Presenter, PresenterExit, ProgressSender};
use crate::templates::{DUMP_INITIAL_MIGRATION, ShadowTemplates};

pub use diff::{DIFF_HEADER, is_empty_diff};
pub use shadow::{ShadowBuilder, ShadowDatabase, ShadowStage};
pub use sync::{SyncMismatch, check_sync, find_mismatch};
pub use writer::{record_then_write, write_migration};

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A migration was written and recorded
    Written(PathBuf),
    /// The remote matches the local migrations
    NoChanges,
}

/// Everything a single remote commit needs
pub struct RemoteCommit<'a, R, C, L> {
    pub runtime: &'a R,
    pub connector: &'a C,
    pub ledger: &'a L,
    pub config: &'a Config,
    pub templates: &'a ShadowTemplates,
    pub migrations_dir: &'a Path,
    /// Run start time; names the file and the ledger row
    pub timestamp: String,
}

impl<'a, R, C, L> RemoteCommit<'a, R, C, L>
where
    R: ContainerRuntime,
    C: SqlConnector,
    L: MigrationLedger,
{
    /// Run the pipeline, then tear down everything `ctx` tracked.
    pub async fn execute(&self, ctx: &RunContext, progress: &ProgressSender) -> Result<CommitOutcome> {
        let result = self.pipeline(ctx, progress).await;

        progress.status("Removing containers...");
        remove_all(self.runtime, ctx).await;

        match result {
            // Errors caused by teardown racing a cancelled run are still a cancellation
            Err(e) if ctx.cancel_token().is_cancelled() && !CommitError::is_aborted(&e) => {
                debug!("Error after cancellation: {:#}", e);
                Err(CommitError::Aborted.into())
            }
            other => other,
        }
    }

    async fn pipeline(&self, ctx: &RunContext, progress: &ProgressSender) -> Result<CommitOutcome> {
        let cancel = ctx.cancel_token();

        self.runtime.ping().await?;

        progress.status("Checking migration history...");
        let remote = self.ledger.applied_versions().await?;
        let local = load_local_migrations(self.migrations_dir)?;
        check_sync(
            &remote,
            &local,
            &self.config.directories.migrations,
            &self.config.ledger,
        )?;
        cancel.check()?;

        if local.is_empty() {
            return self.commit_initial(ctx, progress).await;
        }

        self.commit_diff(ctx, progress, &local).await
    }

    /// No local migrations yet: the whole remote schema becomes the first one
    async fn commit_initial(&self, ctx: &RunContext, progress: &ProgressSender) -> Result<CommitOutcome> {
        progress.status("Committing initial migration on remote database...");

        let docker = &self.config.docker;
        let remote = &self.config.remote;
        let image = registry_image_url(
            &docker.registry,
            &docker.image_namespace,
            &self.config.shadow.image,
        );
        pull_image_if_absent(
            self.runtime,
            &image,
            &PullPolicy::from(docker),
            ctx.cancel_token(),
        )
        .await?;

        let spec = ContainerSpec {
            image,
            env: vec![
                format!("PGHOST={}", remote.host),
                format!("PGPORT={}", remote.port),
                format!("PGUSER={}", remote.username),
                format!("PGPASSWORD={}", remote.password),
                format!("EXCLUDED_SCHEMAS={}", remote.excluded_schemas.join("|")),
                format!("DB_URL={}", remote.database),
            ],
            cmd: Some(vec![
                "bash".to_string(),
                "-c".to_string(),
                DUMP_INITIAL_MIGRATION.to_string(),
            ]),
            labels: ctx.labels().clone(),
            ..Default::default()
        };

        let dump = run_once(self.runtime, ctx, &ctx.dump_container(), &spec)
            .await
            .map_err(|e| {
                if CommitError::is_aborted(&e) {
                    e
                } else {
                    e.context("Error running pg_dump on remote database")
                }
            })?;

        let path =
            record_then_write(self.ledger, self.migrations_dir, &self.timestamp, &dump).await?;
        Ok(CommitOutcome::Written(path))
    }

    async fn commit_diff(
        &self,
        ctx: &RunContext,
        progress: &ProgressSender,
        local: &[LocalMigration],
    ) -> Result<CommitOutcome> {
        let mut builder = ShadowBuilder::new(
            self.runtime,
            self.connector,
            ctx,
            self.config,
            self.templates,
            progress,
        );
        let shadow = builder.build(local).await?;
        info!("Shadow database ready after {:?}", builder.stage());

        let artifact = diff::run_differ(self.runtime, ctx, self.config, &shadow, progress).await?;
        ctx.cancel_token().check()?;

        if is_empty_diff(&artifact) {
            info!("No schema changes found");
            return Ok(CommitOutcome::NoChanges);
        }

        let path =
            write_migration(self.ledger, self.migrations_dir, &self.timestamp, &artifact).await?;
        Ok(CommitOutcome::Written(path))
    }
}

/// Every Ctrl-C; ends at once if the handler cannot be installed
fn ctrl_c_signals() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
}

/// Run `commit` next to the interactive display.
///
/// An interrupt cancels the run and removes its containers before the
/// display returns; the run itself then ends with [`CommitError::Aborted`].
/// A second interrupt during that cleanup stops waiting for it and ends with
/// [`CommitError::ForceQuit`].
pub async fn run_interactive<R, C, L>(commit: &RemoteCommit<'_, R, C, L>) -> Result<CommitOutcome>
where
    R: ContainerRuntime,
    C: SqlConnector,
    L: MigrationLedger,
{
    run_with_interrupts(commit, ctrl_c_signals()).await
}

/// [`run_interactive`] with the interrupt source supplied by the caller
pub async fn run_with_interrupts<R, C, L, S>(
    commit: &RemoteCommit<'_, R, C, L>,
    interrupts: S,
) -> Result<CommitOutcome>
where
    R: ContainerRuntime,
    C: SqlConnector,
    L: MigrationLedger,
    S: Stream<Item = ()>,
{
    let cancel = CancelToken::new();
    let ctx = RunContext::new(&commit.config.docker.project_id, cancel.clone());
    let (progress, events) = progress::channel();
    let (result_tx, result_rx) = oneshot::channel();

    let orchestration = async {
        let result = commit.execute(&ctx, &progress).await;
        // The receiver is awaited below and cannot be gone
        let _ = result_tx.send(result);
        progress.done();
    };

    let presentation = Presenter::new().run(events, interrupts, || async {
        cancel.cancel();
        remove_all(commit.runtime, &ctx).await;
    });

    tokio::pin!(orchestration, presentation);
    let mut orchestrated = false;
    let exit = loop {
        tokio::select! {
            () = &mut orchestration, if !orchestrated => orchestrated = true,
            exit = &mut presentation => break exit,
        }
    };

    match exit {
        PresenterExit::Forced => {
            warn!(
                "Stopped waiting for cleanup; containers and network {} may be left behind",
                ctx.network()
            );
            return Err(CommitError::ForceQuit.into());
        }
        PresenterExit::Interrupted => debug!("Run interrupted"),
        PresenterExit::Finished => {}
    }
    if !orchestrated {
        orchestration.await;
    }

    result_rx
        .await
        .unwrap_or_else(|_| Err(CommitError::Aborted.into()))
}
