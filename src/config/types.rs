use clap::Args;
use serde::{Deserialize, Serialize};

/// Raw configuration input - all fields Optional for merging
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub remote: Option<RemoteInput>,
    pub directories: Option<DirectoriesInput>,
    pub ledger: Option<LedgerInput>,
    pub shadow: Option<ShadowInput>,
    pub differ: Option<DifferInput>,
    pub docker: Option<DockerInput>,
}

/// Resolved configuration with all defaults applied
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub remote: Remote,
    pub directories: Directories,
    pub ledger: Ledger,
    pub shadow: Shadow,
    pub differ: Differ,
    pub docker: Docker,
}

// Remote database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteInput {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    /// Never read from the config file; only CLI or environment
    #[serde(skip)]
    pub password: Option<String>,
    pub database: Option<String>,
    pub excluded_schemas: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Remote {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub excluded_schemas: Vec<String>,
}

impl Remote {
    /// libpq key/value connection string, as understood by the differ
    pub fn conninfo(&self) -> String {
        format!(
            "dbname='{}' user='{}' host='{}' port={} password='{}'",
            escape_conninfo(&self.database),
            escape_conninfo(&self.username),
            escape_conninfo(&self.host),
            self.port,
            escape_conninfo(&self.password)
        )
    }
}

/// Escape a value for use inside single quotes in a libpq conninfo string
pub fn escape_conninfo(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

// Directory configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DirectoriesInput {
    pub migrations_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Directories {
    pub migrations: String,
}

// Ledger (applied migration history) configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerInput {
    pub schema: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pub schema: String,
    pub table: String,
}

// Shadow database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShadowInput {
    pub image: Option<String>,
    pub major_version: Option<u32>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub readiness_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub globals_file: Option<String>,
    pub baseline_schema_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Shadow {
    pub image: String,
    pub major_version: u32,
    pub password: String,
    pub database: String,
    pub readiness_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub globals_file: Option<String>,
    pub baseline_schema_file: Option<String>,
}

impl Shadow {
    /// Server command override; newer images ship their own config file
    pub fn command(&self) -> Vec<String> {
        if self.major_version >= 14 {
            vec![
                "postgres".to_string(),
                "-c".to_string(),
                "config_file=/etc/postgresql/postgresql.conf".to_string(),
            ]
        } else {
            Vec::new()
        }
    }
}

// Differ configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DifferInput {
    pub image: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Differ {
    pub image: String,
    pub command: String,
}

// Docker configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DockerInput {
    pub registry: Option<String>,
    pub image_namespace: Option<String>,
    pub project_id: Option<String>,
    pub pull_retries: Option<u32>,
    pub pull_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Docker {
    pub registry: String,
    pub image_namespace: String,
    pub project_id: String,
    pub pull_retries: u32,
    pub pull_backoff_secs: u64,
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct RemoteArgs {
    #[arg(long, help = "Remote database host")]
    pub host: Option<String>,

    #[arg(long, help = "Remote database port")]
    pub port: Option<u16>,

    #[arg(long, short = 'U', help = "Remote database user")]
    pub username: Option<String>,

    #[arg(long, short = 'p', help = "Remote database password")]
    pub password: Option<String>,

    #[arg(long, short = 'd', help = "Remote database name")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DirectoryArgs {
    #[arg(long, help = "Migrations directory path")]
    pub migrations_dir: Option<String>,
}

// Conversion functions from CLI args to config input
impl From<RemoteArgs> for RemoteInput {
    fn from(args: RemoteArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            username: args.username,
            password: args.password,
            database: args.database,
            excluded_schemas: None, // Exclusions come from file only
        }
    }
}

impl From<DirectoryArgs> for DirectoriesInput {
    fn from(args: DirectoryArgs) -> Self {
        Self {
            migrations_dir: args.migrations_dir,
        }
    }
}
