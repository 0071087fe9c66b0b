//! Structured details of an error raised by PostgreSQL while applying a batch.

use sqlx::postgres::{PgDatabaseError, PgErrorPosition};

/// What PostgreSQL reported about a failed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlErrorContext {
    pub message: String,
    /// 1-indexed character position within the submitted batch
    pub position: Option<usize>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// e.g. PL/pgSQL call stack
    pub context: Option<String>,
    /// SQLSTATE, e.g. "42P01" for undefined_table
    pub code: Option<String>,
}

impl SqlErrorContext {
    /// Extract the structured fields from a sqlx error
    pub fn from_sqlx_error(error: &sqlx::Error) -> Self {
        if let Some(db_error) = error.as_database_error()
            && let Some(pg_error) = db_error.try_downcast_ref::<PgDatabaseError>()
        {
            let position = pg_error.position().map(|pos| match pos {
                PgErrorPosition::Original(p) => p,
                PgErrorPosition::Internal { position, .. } => position,
            });

            return Self {
                message: pg_error.message().to_string(),
                position,
                detail: pg_error.detail().map(|s| s.to_string()),
                hint: pg_error.hint().map(|s| s.to_string()),
                context: pg_error.r#where().map(|s| s.to_string()),
                code: Some(pg_error.code().to_string()),
            };
        }

        // Connection-level failures carry no position
        Self::message_only(error.to_string())
    }

    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
            detail: None,
            hint: None,
            context: None,
            code: None,
        }
    }

    /// Line of the error inside `content`, when `content` was submitted after
    /// `prefix_len` bytes of wrapper text.
    pub fn line_in(&self, content: &str, prefix_len: usize) -> Option<usize> {
        let position = self.position?.checked_sub(prefix_len)?;
        if position == 0 {
            return None;
        }
        Some(position_to_line(content, position))
    }

    /// Render the error for a file, with an excerpt around the failing line
    pub fn format(&self, file_name: &str, content: &str, prefix_len: usize) -> String {
        let line = self.line_in(content, prefix_len);

        let mut msg = format!("SQL error in '{}'", file_name);
        if let Some(line) = line {
            msg.push_str(&format!(" at line {}", line));
        }
        msg.push_str(":\n\n");
        msg.push_str(&format!("  {}\n", self.message));

        if let Some(detail) = &self.detail {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        if let Some(ctx) = &self.context {
            msg.push_str(&format!("\n  Context: {}", ctx));
        }

        if let Some(line) = line {
            msg.push_str(&format!("\n\n{}", format_line_context(content, line)));
        }

        msg
    }
}

impl std::fmt::Display for SqlErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for SqlErrorContext {}

/// Convert 1-indexed character position to line number
pub fn position_to_line(content: &str, position: usize) -> usize {
    content
        .chars()
        .take(position.saturating_sub(1))
        .filter(|c| *c == '\n')
        .count()
        + 1
}

/// Format SQL content showing context around the error line
pub fn format_line_context(content: &str, error_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    const CONTEXT_LINES: usize = 3;

    let error_idx = error_line.saturating_sub(1).min(total_lines);
    let start_idx = error_idx.saturating_sub(CONTEXT_LINES);
    let end_idx = (error_idx + CONTEXT_LINES + 1).min(total_lines);

    let mut result = String::new();

    if start_idx > 0 {
        result.push_str(&format!("  ... [{} lines above]\n", start_idx));
    }

    for (idx, line) in lines[start_idx..end_idx].iter().enumerate() {
        let line_num = start_idx + idx + 1;
        let marker = if line_num == error_line { ">" } else { " " };
        result.push_str(&format!("  {} {:4} | {}\n", marker, line_num, line));
    }

    if end_idx < total_lines {
        result.push_str(&format!("  ... [{} lines below]", total_lines - end_idx));
    }

    result
}
