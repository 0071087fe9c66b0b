use anyhow::Result;
use console::style;
use std::path::Path;
use tracing::debug;

use crate::commit::{CommitOutcome, RemoteCommit, run_interactive};
use crate::config::Config;
use crate::db::PgConnector;
use crate::db::connection::connect_remote;
use crate::docker::DockerManager;
use crate::error::CommitError;
use crate::ledger::RemoteLedger;
use crate::migration::current_timestamp;
use crate::templates::ShadowTemplates;

pub async fn cmd_remote_commit(config: &Config, root_dir: &Path) -> Result<()> {
    // Taken before anything else so the file name reflects when the run began
    let timestamp = current_timestamp();

    let templates = ShadowTemplates::load(&config.shadow, root_dir)?;
    let runtime = DockerManager::connect().await?;

    let pool = connect_remote(&config.remote).await?;
    let ledger = RemoteLedger::new(pool, config.ledger.clone());
    let migrations_dir = root_dir.join(&config.directories.migrations);
    debug!("Migrations directory: {}", migrations_dir.display());

    let commit = RemoteCommit {
        runtime: &runtime,
        connector: &PgConnector,
        ledger: &ledger,
        config,
        templates: &templates,
        migrations_dir: &migrations_dir,
        timestamp,
    };

    let result = run_interactive(&commit).await;
    ledger.close().await;

    match result {
        Ok(CommitOutcome::Written(path)) => {
            println!(
                "Finished {}. Wrote {}",
                style("pgdrift commit").cyan(),
                style(path.display()).bold()
            );
            println!(
                "WARNING: The diff tool is not foolproof, so you may need to manually rearrange and modify the generated migration.\n\
                 Replay all migrations into a fresh local database to verify that the new migration does not generate errors."
            );
            Ok(())
        }
        Ok(CommitOutcome::NoChanges) => {
            println!("No schema changes found");
            Ok(())
        }
        Err(e) if CommitError::is_aborted(&e) => {
            eprintln!("{}", style("Aborted").yellow());
            Err(e)
        }
        Err(e) => Err(e),
    }
}
