use crate::config::{merge::Merge, types::*};
use anyhow::{Result, anyhow};

pub const REMOTE_HOST_ENV: &str = "PGDRIFT_REMOTE_HOST";
pub const REMOTE_PASSWORD_ENV: &str = "PGDRIFT_REMOTE_PASSWORD";

pub struct ConfigBuilder {
    config_input: ConfigInput,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let defaults = Config::default();

        Ok(Config {
            remote: self.resolve_remote(&defaults.remote)?,
            directories: self.resolve_directories(&defaults.directories),
            ledger: self.resolve_ledger(&defaults.ledger),
            shadow: self.resolve_shadow(&defaults.shadow)?,
            differ: self.resolve_differ(&defaults.differ),
            docker: self.resolve_docker(&defaults.docker),
        })
    }

    fn resolve_remote(&self, defaults: &Remote) -> Result<Remote> {
        let remote_input = self.config_input.remote.as_ref();

        let host = remote_input
            .and_then(|r| r.host.as_ref())
            .cloned()
            .or_else(|| std::env::var(REMOTE_HOST_ENV).ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Remote database host is not set. Use --host, remote.host in the config file, or {}",
                    REMOTE_HOST_ENV
                )
            })?;

        let password = remote_input
            .and_then(|r| r.password.as_ref())
            .cloned()
            .or_else(|| std::env::var(REMOTE_PASSWORD_ENV).ok())
            .ok_or_else(|| {
                anyhow!(
                    "Remote database password is not set. Use --password or {}",
                    REMOTE_PASSWORD_ENV
                )
            })?;

        Ok(Remote {
            host,
            port: remote_input.and_then(|r| r.port).unwrap_or(defaults.port),
            username: remote_input
                .and_then(|r| r.username.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.username.clone()),
            password,
            database: remote_input
                .and_then(|r| r.database.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.database.clone()),
            excluded_schemas: remote_input
                .and_then(|r| r.excluded_schemas.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.excluded_schemas.clone()),
        })
    }

    fn resolve_directories(&self, defaults: &Directories) -> Directories {
        let dir_input = self.config_input.directories.as_ref();

        Directories {
            migrations: dir_input
                .and_then(|d| d.migrations_dir.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.migrations.clone()),
        }
    }

    fn resolve_ledger(&self, defaults: &Ledger) -> Ledger {
        let ledger_input = self.config_input.ledger.as_ref();

        Ledger {
            schema: ledger_input
                .and_then(|l| l.schema.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.schema.clone()),
            table: ledger_input
                .and_then(|l| l.table.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.table.clone()),
        }
    }

    fn resolve_shadow(&self, defaults: &Shadow) -> Result<Shadow> {
        let shadow_input = self.config_input.shadow.as_ref();

        let poll_interval_ms = shadow_input
            .and_then(|s| s.poll_interval_ms)
            .unwrap_or(defaults.poll_interval_ms);
        if poll_interval_ms == 0 {
            return Err(anyhow!("shadow.poll_interval_ms must be greater than zero"));
        }

        Ok(Shadow {
            image: shadow_input
                .and_then(|s| s.image.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.image.clone()),
            major_version: shadow_input
                .and_then(|s| s.major_version)
                .unwrap_or(defaults.major_version),
            password: shadow_input
                .and_then(|s| s.password.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.password.clone()),
            database: shadow_input
                .and_then(|s| s.database.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.database.clone()),
            readiness_timeout_secs: shadow_input
                .and_then(|s| s.readiness_timeout_secs)
                .unwrap_or(defaults.readiness_timeout_secs),
            poll_interval_ms,
            globals_file: shadow_input
                .and_then(|s| s.globals_file.as_ref())
                .cloned()
                .or_else(|| defaults.globals_file.clone()),
            baseline_schema_file: shadow_input
                .and_then(|s| s.baseline_schema_file.as_ref())
                .cloned()
                .or_else(|| defaults.baseline_schema_file.clone()),
        })
    }

    fn resolve_differ(&self, defaults: &Differ) -> Differ {
        let differ_input = self.config_input.differ.as_ref();

        Differ {
            image: differ_input
                .and_then(|d| d.image.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.image.clone()),
            command: differ_input
                .and_then(|d| d.command.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.command.clone()),
        }
    }

    fn resolve_docker(&self, defaults: &Docker) -> Docker {
        let docker_input = self.config_input.docker.as_ref();

        Docker {
            registry: docker_input
                .and_then(|d| d.registry.as_ref())
                .map(|r| r.to_lowercase())
                .unwrap_or_else(|| defaults.registry.clone()),
            image_namespace: docker_input
                .and_then(|d| d.image_namespace.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.image_namespace.clone()),
            project_id: docker_input
                .and_then(|d| d.project_id.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.project_id.clone()),
            pull_retries: docker_input
                .and_then(|d| d.pull_retries)
                .unwrap_or(defaults.pull_retries),
            pull_backoff_secs: docker_input
                .and_then(|d| d.pull_backoff_secs)
                .unwrap_or(defaults.pull_backoff_secs),
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
