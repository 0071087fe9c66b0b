use std::time::Duration;

// Configuration file name
pub const CONFIG_FILENAME: &str = "pgdrift.yaml";

// Migration file naming conventions
pub const REMOTE_COMMIT_SUFFIX: &str = "_remote_commit.sql";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
pub const TIMESTAMP_LEN: usize = 14;

/// First migrations named `<ts>_init.sql` older than this were generated by
/// earlier tooling and are skipped during replay.
pub const LEGACY_INIT_CUTOFF: u64 = 20211209000000;

/// Diff output at or below this size only contains the generated header.
pub const DIFF_HEADER_THRESHOLD: usize = 350;

/// Upper bound for the baseline schema, which is passed to the reset script
/// through an environment variable.
pub const MAX_BASELINE_SCHEMA_BYTES: usize = 32 * 1024;

// Run-scoped docker resource name prefixes
pub const NETWORK_PREFIX: &str = "pgdrift_remote_commit_network";
pub const DB_CONTAINER_PREFIX: &str = "pgdrift_remote_commit_db";
pub const DIFFER_CONTAINER_PREFIX: &str = "pgdrift_remote_commit_differ";
pub const DUMP_CONTAINER_PREFIX: &str = "pgdrift_remote_commit_dump";

// Labels applied to every network and container
pub const PROJECT_LABEL: &str = "com.pgdrift.project";
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

pub const POSTGRES_PORT: u16 = 5432;

// Progress display
pub const MAX_LOG_LINES: usize = 5;
pub const SPINNER_TICK: Duration = Duration::from_millis(120);
