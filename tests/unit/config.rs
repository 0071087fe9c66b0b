use crate::helpers::TestProject;
use anyhow::Result;
use pgdrift::config::{ConfigBuilder, ConfigInput, RemoteInput, load_config};

fn cli_password() -> ConfigInput {
    ConfigInput {
        remote: Some(RemoteInput {
            password: Some("cli-secret".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn test_load_config_from_project_file() -> Result<()> {
    let project = TestProject::new();
    let path = project.write_config(
        r#"
remote:
  host: db.example.com
  port: 6543
  excluded_schemas: [auth, "pg_*"]
directories:
  migrations_dir: supabase/migrations
ledger:
  schema: tracking
  table: versions
docker:
  registry: public.ecr.aws
  pull_retries: 4
"#,
    );

    let (input, root_dir) = load_config(path.to_str().unwrap())?;
    assert_eq!(root_dir, project.root());

    let config = ConfigBuilder::new()
        .with_file(input)
        .with_cli_args(cli_password())
        .resolve()?;

    assert_eq!(config.remote.host, "db.example.com");
    assert_eq!(config.remote.port, 6543);
    assert_eq!(config.remote.password, "cli-secret");
    assert_eq!(config.remote.excluded_schemas, vec!["auth", "pg_*"]);
    assert_eq!(config.directories.migrations, "supabase/migrations");
    assert_eq!(config.ledger.schema, "tracking");
    assert_eq!(config.ledger.table, "versions");
    assert_eq!(config.docker.registry, "public.ecr.aws");
    assert_eq!(config.docker.pull_retries, 4);
    // Untouched sections keep their defaults
    assert_eq!(config.shadow.database, "contrib_regression");
    assert_eq!(config.docker.project_id, "pgdrift");
    Ok(())
}

#[test]
fn test_missing_config_file_means_defaults() -> Result<()> {
    let project = TestProject::new();
    let path = project.root().join("absent.yaml");

    let (input, root_dir) = load_config(path.to_str().unwrap())?;

    assert!(input.remote.is_none());
    assert!(input.directories.is_none());
    assert_eq!(root_dir, project.root());
    Ok(())
}

#[test]
fn test_invalid_yaml_is_reported_with_the_file() {
    let project = TestProject::new();
    let path = project.write_config("remote: [not, a, mapping");

    let err = load_config(path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_cli_overrides_file_values() -> Result<()> {
    let project = TestProject::new();
    let path = project.write_config("remote:\n  host: file-host\n  database: filedb\n");
    let (input, _) = load_config(path.to_str().unwrap())?;

    let cli = ConfigInput {
        remote: Some(RemoteInput {
            host: Some("cli-host".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let config = ConfigBuilder::new().with_file(input).with_cli_args(cli).resolve()?;

    assert_eq!(config.remote.host, "cli-host");
    assert_eq!(config.remote.database, "filedb");
    Ok(())
}
