//! Outcomes of a remote commit that callers need to tell apart.
//!
//! Everything else travels as a plain `anyhow::Error`; these variants are
//! wrapped in `anyhow` too and recovered with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommitError {
    /// The docker daemon could not be reached before any work started.
    #[error("Docker is not available: {0}")]
    DockerUnavailable(String),

    /// Local migration files and the remote ledger disagree.
    #[error(
        "The remote database's migration history is not in sync with the contents of {migrations_dir}. Resolve this by:\n\
         - Updating the project from version control to get the latest {migrations_dir},\n\
         - Pushing unapplied migrations to the remote database,\n\
         - Or failing that, manually inserting/deleting rows from the {ledger_table} table on the remote database."
    )]
    Conflict {
        migrations_dir: String,
        ledger_table: String,
    },

    /// The reset script failed inside the shadow container.
    #[error("error creating shadow database: {0}")]
    ShadowCreation(String),

    /// Global bootstrap statements failed on the fresh shadow server.
    #[error("Error starting shadow database: {0}")]
    ShadowStartup(String),

    /// The shadow server never accepted connections before the deadline.
    #[error("Shadow database was not ready after {timeout_secs}s: {last_error}")]
    ReadinessTimeout {
        timeout_secs: u64,
        last_error: String,
    },

    /// A local migration raised an error while being replayed.
    #[error("Error applying migration {file} to the shadow database:\n{details}")]
    MigrationFailed { file: String, details: String },

    /// A one-shot container or exec returned a non-zero exit code.
    #[error("error running {what} (exit code {code}): {output}")]
    ContainerExit {
        what: String,
        code: i64,
        output: String,
    },

    /// The differ reported an error or exited abnormally.
    #[error("Error diffing schema: {0}")]
    DiffFailed(String),

    /// The migration file exists but the ledger row could not be inserted.
    #[error(
        "Wrote {path} but failed to record it in the remote migration history: {reason}\n\
         Either delete the file or insert its version into the ledger table manually."
    )]
    LedgerWrite { path: PathBuf, reason: String },

    /// The run was cancelled by the user.
    #[error("Aborted")]
    Aborted,

    /// The user interrupted again while containers were being removed.
    #[error("Aborted without waiting for cleanup")]
    ForceQuit,
}

impl CommitError {
    /// True if `err` (or anything it wraps) is a cancellation
    pub fn is_aborted(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CommitError>(), Some(CommitError::Aborted))
    }

    /// True if `err` is a second interrupt that skipped cleanup
    pub fn is_force_quit(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CommitError>(), Some(CommitError::ForceQuit))
    }
}
