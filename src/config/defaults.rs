use crate::config::types::*;

// Config derives Default; Remote has no sensible host so it carries an empty one
// that the builder rejects.

impl Default for Remote {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            excluded_schemas: default_excluded_schemas(),
        }
    }
}

/// Schemas owned by the platform rather than by user migrations
pub fn default_excluded_schemas() -> Vec<String> {
    [
        "information_schema",
        "pg_*",
        "auth",
        "extensions",
        "graphql",
        "graphql_public",
        "pgbouncer",
        "pgsodium",
        "pgsodium_masks",
        "realtime",
        "storage",
        "supabase_functions",
        "supabase_migrations",
        "vault",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            migrations: "migrations".to_string(),
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            schema: "supabase_migrations".to_string(),
            table: "schema_migrations".to_string(),
        }
    }
}

impl Default for Shadow {
    fn default() -> Self {
        Self {
            image: "supabase/postgres:15.1.0.147".to_string(),
            major_version: 15,
            password: "postgres".to_string(),
            database: "contrib_regression".to_string(),
            readiness_timeout_secs: 120,
            poll_interval_ms: 100,
            globals_file: None,
            baseline_schema_file: None,
        }
    }
}

impl Default for Differ {
    fn default() -> Self {
        Self {
            image: "supabase/pgadmin-schema-diff:cli-0.0.5".to_string(),
            command: "/venv/bin/python3 -u cli.py".to_string(),
        }
    }
}

impl Default for Docker {
    fn default() -> Self {
        Self {
            registry: "docker.io".to_string(),
            image_namespace: "supabase".to_string(),
            project_id: "pgdrift".to_string(),
            pull_retries: 2,
            pull_backoff_secs: 2,
        }
    }
}
