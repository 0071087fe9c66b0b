//! Running the external differ and turning its output into a migration.

use anyhow::Result;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use super::shadow::ShadowDatabase;
use crate::config::types::Config;
use crate::constants::DIFF_HEADER_THRESHOLD;
use crate::docker::{
    ContainerRuntime, ContainerSpec, OutputChunk, OutputStream, RunContext, decode_stderr,
    decode_stdout, registry_image_url, run,
};
use crate::error::CommitError;
use crate::progress::ProgressSender;

/// Comment block at the top of every generated migration.
///
/// Exactly [`DIFF_HEADER_THRESHOLD`] bytes long, so any statement after it
/// makes the artifact non-empty.
pub const DIFF_HEADER: &str = "\
-- This script was generated by pgdrift by comparing the live remote database
-- (source) with a shadow database built from the local migrations (target).
-- The schema comparison is not foolproof: review every statement, reorder or
-- edit them where needed, and replay all migrations locally before pushing.
-- Statements are grouped by category.

";

/// One line of differ output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DifferFrame {
    Progress {
        message: String,
        #[serde(default)]
        percent: Option<f64>,
    },
    Diff {
        entries: Vec<DiffEntry>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiffEntry {
    pub status: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub diff_ddl: String,
}

/// Parse a line as a frame; anything else is plain log output
pub fn parse_line(line: &str) -> Option<DifferFrame> {
    serde_json::from_str(line.trim()).ok()
}

/// Whether `schema` matches an exclusion; a trailing `*` matches any suffix
pub fn is_excluded_schema(schema: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => schema.starts_with(prefix),
        None => schema == pattern,
    })
}

/// Drop unchanged objects and objects in excluded schemas
pub fn filter_entries(entries: Vec<DiffEntry>, excluded: &[String]) -> Vec<DiffEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.status != "identical")
        .filter(|entry| {
            !entry
                .schema
                .as_deref()
                .is_some_and(|schema| is_excluded_schema(schema, excluded))
        })
        .filter(|entry| !entry.diff_ddl.trim().is_empty())
        .collect()
}

/// Header followed by each remaining statement
pub fn render_artifact(entries: &[DiffEntry]) -> String {
    let mut artifact = String::from(DIFF_HEADER);
    for entry in entries {
        artifact.push_str(entry.diff_ddl.trim());
        artifact.push_str("\n\n");
    }
    artifact
}

/// Header-only output means there is nothing to commit
pub fn is_empty_diff(artifact: &str) -> bool {
    artifact.len() <= DIFF_HEADER_THRESHOLD
}

/// Splits streamed bytes into complete lines.
///
/// Lines are decoded only once their newline has arrived, so a character
/// split across frames is reassembled first.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = decode_stdout(line, "differ")?;
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        Ok(lines)
    }

    pub fn finish(&mut self) -> Result<Option<String>> {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            return Ok(None);
        }
        decode_stdout(rest, "differ").map(Some)
    }
}

/// What the differ produced, before judging success
#[derive(Debug, Default, PartialEq)]
pub struct DifferReport {
    pub entries: Option<Vec<DiffEntry>>,
    pub error: Option<String>,
    pub stderr: String,
}

impl DifferReport {
    fn handle_line(&mut self, line: &str, progress: &ProgressSender) {
        match parse_line(line) {
            Some(DifferFrame::Progress { message, percent }) => {
                progress.status(message);
                progress.progress(percent.map(|p| p / 100.0));
            }
            Some(DifferFrame::Diff { entries }) => {
                self.entries.get_or_insert_with(Vec::new).extend(entries);
            }
            Some(DifferFrame::Error { message }) => self.error = Some(message),
            None if line.trim().is_empty() => {}
            None => progress.log_line(line),
        }
    }

    /// Entries to write, or why the differ failed
    pub fn into_entries(self, exit_code: i64) -> Result<Vec<DiffEntry>, CommitError> {
        if let Some(message) = self.error {
            return Err(CommitError::DiffFailed(message));
        }

        let stderr = self.stderr.trim().to_string();
        if exit_code != 0 {
            let reason = if stderr.is_empty() {
                format!("differ exited with code {}", exit_code)
            } else {
                stderr
            };
            return Err(CommitError::DiffFailed(reason));
        }

        match self.entries {
            Some(entries) => {
                if !stderr.is_empty() {
                    debug!("Differ stderr: {}", stderr);
                }
                Ok(entries)
            }
            None if !stderr.is_empty() => Err(CommitError::DiffFailed(stderr)),
            None => Ok(Vec::new()),
        }
    }
}

/// Read differ output until the stream ends
pub async fn consume_output(mut output: OutputStream, progress: &ProgressSender) -> Result<DifferReport> {
    let mut report = DifferReport::default();
    let mut stdout = LineBuffer::default();
    let mut stderr = Vec::new();

    while let Some(chunk) = output.next().await {
        match chunk? {
            OutputChunk::Stdout(bytes) => {
                for line in stdout.push(&bytes)? {
                    report.handle_line(&line, progress);
                }
            }
            OutputChunk::Stderr(bytes) => stderr.extend_from_slice(&bytes),
        }
    }
    if let Some(line) = stdout.finish()? {
        report.handle_line(&line, progress);
    }
    report.stderr = decode_stderr(&stderr);

    progress.progress(None);
    progress.clear_log();
    Ok(report)
}

/// Quote `value` as one POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Diff the live remote (source) against the shadow database (target)
pub async fn run_differ<R: ContainerRuntime>(
    runtime: &R,
    ctx: &RunContext,
    config: &Config,
    shadow: &ShadowDatabase,
    progress: &ProgressSender,
) -> Result<String> {
    progress.status("Diffing local migrations with remote database...");

    let source = config.remote.conninfo();
    let target = shadow.network_conninfo();
    let script = format!(
        "{} --json-diff {} {}",
        config.differ.command,
        shell_quote(&source),
        shell_quote(&target)
    );

    let docker = &config.docker;
    let spec = ContainerSpec {
        image: registry_image_url(&docker.registry, &docker.image_namespace, &config.differ.image),
        entrypoint: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        labels: ctx.labels().clone(),
        network: Some(ctx.network()),
        ..Default::default()
    };

    let name = ctx.differ_container();
    let (id, output) = run(runtime, ctx, &name, &spec).await?;

    let cancel = ctx.cancel_token();
    let (report, exit_code) = tokio::select! {
        result = async {
            let report = consume_output(output, progress).await?;
            let code = runtime.wait_exit_code(&id).await?;
            Ok::<_, anyhow::Error>((report, code))
        } => result?,
        _ = cancel.cancelled() => return Err(CommitError::Aborted.into()),
    };

    let entries = report.into_entries(exit_code)?;
    let total = entries.len();
    let entries = filter_entries(entries, &config.remote.excluded_schemas);
    if entries.len() < total {
        debug!("Dropped {} unchanged or excluded entries", total - entries.len());
    }
    if entries.is_empty() && total > 0 {
        warn!("Every difference belongs to an excluded schema or is unchanged");
    }

    Ok(render_artifact(&entries))
}
