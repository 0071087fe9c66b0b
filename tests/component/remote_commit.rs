//! Remote commit runs against in-memory docker, shadow and ledger fakes

use crate::helpers::{FakeConnector, FakeLedger, FakeRuntime, ScriptedOutput, TestProject, test_config};
use anyhow::Result;
use pgdrift::cancel::CancelToken;
use futures_util::stream;
use pgdrift::commit::{CommitOutcome, RemoteCommit, run_with_interrupts};
use pgdrift::config::Config;
use pgdrift::constants::{DB_CONTAINER_PREFIX, DIFFER_CONTAINER_PREFIX, DUMP_CONTAINER_PREFIX};
use pgdrift::db::SqlErrorContext;
use pgdrift::docker::{ExecOutput, OutputChunk, RunContext};
use pgdrift::error::CommitError;
use pgdrift::progress::ProgressSender;
use pgdrift::templates::ShadowTemplates;
use std::path::Path;
use std::time::Duration;

const TIMESTAMP: &str = "20240101000000";
const PROFILES_DDL: &str = "CREATE TABLE public.profiles (id uuid PRIMARY KEY, name text);";

fn remote_commit<'a>(
    runtime: &'a FakeRuntime,
    connector: &'a FakeConnector,
    ledger: &'a FakeLedger,
    config: &'a Config,
    templates: &'a ShadowTemplates,
    migrations_dir: &'a Path,
) -> RemoteCommit<'a, FakeRuntime, FakeConnector, FakeLedger> {
    RemoteCommit {
        runtime,
        connector,
        ledger,
        config,
        templates,
        migrations_dir,
        timestamp: TIMESTAMP.to_string(),
    }
}

fn test_context(config: &Config) -> RunContext {
    RunContext::with_run_id("test", &config.docker.project_id, CancelToken::new())
}

fn diff_frame(entries: &[(&str, &str, &str)]) -> String {
    let entries: Vec<serde_json::Value> = entries
        .iter()
        .map(|(status, schema, ddl)| {
            serde_json::json!({
                "status": status,
                "group_name": "Tables",
                "schema": schema,
                "diff_ddl": ddl,
            })
        })
        .collect();
    format!("{}\n", serde_json::json!({ "type": "diff", "entries": entries }))
}

fn differ_output(stdout: &[String]) -> ScriptedOutput {
    ScriptedOutput {
        chunks: stdout
            .iter()
            .map(|line| OutputChunk::Stdout(line.clone().into_bytes()))
            .collect(),
        ..Default::default()
    }
}

/// Project with one migration the remote already has
fn in_sync_project() -> (TestProject, FakeLedger) {
    let project = TestProject::new();
    project.write_migration(
        "20230101000000_create_users.sql",
        "CREATE TABLE public.users (id serial PRIMARY KEY);",
    );
    (project, FakeLedger::with_versions(&["20230101000000"]))
}

#[tokio::test]
async fn test_empty_migrations_dir_dumps_remote_schema() -> Result<()> {
    let project = TestProject::new();
    let dump = "CREATE TABLE public.users (id serial PRIMARY KEY);\n";
    let runtime = FakeRuntime::new().with_output(
        DUMP_CONTAINER_PREFIX,
        ScriptedOutput {
            chunks: vec![OutputChunk::Stdout(dump.into())],
            ..Default::default()
        },
    );
    let connector = FakeConnector::new();
    let ledger = FakeLedger::default();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let outcome = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    let expected = migrations_dir.join("20240101000000_remote_commit.sql");
    assert_eq!(outcome, CommitOutcome::Written(expected.clone()));
    assert_eq!(std::fs::read_to_string(&expected)?, dump);
    assert_eq!(ledger.versions(), vec![TIMESTAMP.to_string()]);

    // The dump needs no shadow database and no network
    assert_eq!(runtime.state.lock().unwrap().network_creations, 0);
    assert!(connector.batches().is_empty());
    assert!(runtime.live_containers().is_empty());

    let spec = runtime.spec_for(DUMP_CONTAINER_PREFIX).expect("dump container");
    assert!(spec.env.contains(&"PGHOST=db.example.com".to_string()));
    assert!(spec.env.contains(&"PGPASSWORD=remote-secret".to_string()));
    assert!(
        spec.env
            .iter()
            .any(|e| e.starts_with("EXCLUDED_SCHEMAS=information_schema|pg_*|auth"))
    );
    Ok(())
}

#[tokio::test]
async fn test_dump_records_the_version_before_writing() -> Result<()> {
    let project = TestProject::new();
    // The migration path is taken by a directory, so only the write fails
    std::fs::create_dir_all(project.migrations_dir().join("20240101000000_remote_commit.sql"))?;
    let runtime = FakeRuntime::new().with_output(
        DUMP_CONTAINER_PREFIX,
        ScriptedOutput {
            chunks: vec![OutputChunk::Stdout("CREATE TABLE public.users ();\n".into())],
            ..Default::default()
        },
    );
    let connector = FakeConnector::new();
    let ledger = FakeLedger::default();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("failed to write"));
    assert_eq!(ledger.versions(), vec![TIMESTAMP.to_string()]);
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_dump_writes_nothing() -> Result<()> {
    let project = TestProject::new();
    let runtime = FakeRuntime::new().with_output(
        DUMP_CONTAINER_PREFIX,
        ScriptedOutput {
            chunks: vec![OutputChunk::Stderr(
                "pg_dump: error: connection refused\n".into(),
            )],
            exit_code: 1,
            ..Default::default()
        },
    );
    let connector = FakeConnector::new();
    let ledger = FakeLedger::default();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("Error running pg_dump on remote database"));
    assert!(message.contains("connection refused"));
    assert!(project.migration_files().is_empty());
    assert!(ledger.versions().is_empty());
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_mismatch_is_a_conflict() -> Result<()> {
    let project = TestProject::new();
    project.write_migration("20230101000000_create_users.sql", "SELECT 1;");
    project.write_migration("20230201000000_add_posts.sql", "SELECT 2;");
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::new();
    let ledger = FakeLedger::with_versions(&["20230101000000"]);
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CommitError>(),
        Some(CommitError::Conflict { .. })
    ));
    assert!(err.to_string().contains("supabase_migrations.schema_migrations"));
    assert!(runtime.created_names().is_empty());
    assert_eq!(project.migration_files().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_remote_only_history_is_a_conflict() -> Result<()> {
    let project = TestProject::new();
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::new();
    let ledger = FakeLedger::with_versions(&["20230101000000"]);
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CommitError>(),
        Some(CommitError::Conflict { .. })
    ));
    assert!(runtime.created_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_drift_is_written_and_recorded() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        differ_output(&[
            r#"{"type":"progress","message":"Comparing tables","percent":50}"#.to_string() + "\n",
            diff_frame(&[
                ("source_only", "public", PROFILES_DDL),
                ("identical", "public", "CREATE TABLE public.users ();"),
                ("source_only", "auth", "CREATE TABLE auth.sessions ();"),
            ]),
        ]),
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let outcome = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    let CommitOutcome::Written(path) = outcome else {
        panic!("expected a written migration, got {:?}", outcome);
    };
    let content = std::fs::read_to_string(&path)?;
    assert!(content.starts_with(pgdrift::commit::DIFF_HEADER));
    assert!(content.contains(PROFILES_DDL));
    assert!(!content.contains("auth.sessions"));
    assert!(!content.contains("public.users ()"));

    assert_eq!(
        project.migration_files(),
        vec![
            "20230101000000_create_users.sql".to_string(),
            "20240101000000_remote_commit.sql".to_string(),
        ]
    );
    assert_eq!(
        ledger.versions(),
        vec!["20230101000000".to_string(), TIMESTAMP.to_string()]
    );

    // Globals, then the replayed migration, each in its own transaction
    let batches = connector.batches();
    assert!(batches.iter().any(|b| b.contains("service_role")));
    assert!(
        batches
            .iter()
            .any(|b| b.starts_with("BEGIN;") && b.contains("CREATE TABLE public.users"))
    );

    // Readiness and globals go through the maintenance database, replay
    // through the freshly reset one
    let databases = connector.databases();
    assert_eq!(databases.first().map(String::as_str), Some("postgres"));
    assert_eq!(databases.last(), Some(&config.shadow.database));

    assert!(runtime.live_containers().is_empty());
    assert!(runtime.networks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shadow_and_differ_share_the_run_network() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    let db = runtime.spec_for(DB_CONTAINER_PREFIX).expect("shadow container");
    let differ = runtime.spec_for(DIFFER_CONTAINER_PREFIX).expect("differ container");
    assert_eq!(db.network, differ.network);
    assert_eq!(db.network.as_deref(), Some("pgdrift_remote_commit_network_test"));
    assert_eq!(db.publish_port, Some(5432));
    assert_eq!(
        db.labels.get(pgdrift::constants::PROJECT_LABEL).map(String::as_str),
        Some("pgdrift")
    );

    // Source is the remote, target is the shadow container on the network
    let script = differ.entrypoint.expect("differ entrypoint").join(" ");
    assert!(script.contains("--json-diff"));
    assert!(script.contains("db.example.com"));
    assert!(script.contains("pgdrift_remote_commit_db_test"));
    assert!(
        script.find("db.example.com").unwrap() < script.find("pgdrift_remote_commit_db_test").unwrap()
    );
    Ok(())
}

#[tokio::test]
async fn test_header_only_diff_is_no_changes() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        differ_output(&[diff_frame(&[])]),
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let outcome = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    assert_eq!(outcome, CommitOutcome::NoChanges);
    assert_eq!(project.migration_files().len(), 1);
    assert_eq!(ledger.versions(), vec!["20230101000000".to_string()]);
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_short_statement_is_still_written() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        differ_output(&[diff_frame(&[("target_only", "public", "DROP TABLE public.a;")])]),
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let outcome = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    let CommitOutcome::Written(path) = outcome else {
        panic!("expected a written migration, got {:?}", outcome);
    };
    assert!(std::fs::read_to_string(&path)?.contains("DROP TABLE public.a;"));
    assert_eq!(
        ledger.versions(),
        vec!["20230101000000".to_string(), TIMESTAMP.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_failing_migration_names_the_file() -> Result<()> {
    let project = TestProject::new();
    project.write_migration("20230101000000_create_users.sql", "CREATE TABLE users ();");
    project.write_migration(
        "20230201000000_broken.sql",
        "CREATE TABLE posts ();\nCREATE TABLE oops (id nosuchtype);",
    );
    let ledger = FakeLedger::with_versions(&["20230101000000", "20230201000000"]);
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::new().failing_on(
        "nosuchtype",
        SqlErrorContext::message_only("type \"nosuchtype\" does not exist"),
    );
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    match err.downcast_ref::<CommitError>() {
        Some(CommitError::MigrationFailed { file, details }) => {
            assert_eq!(file, "20230201000000_broken.sql");
            assert!(details.contains("nosuchtype"));
        }
        other => panic!("expected MigrationFailed, got {:?}", other),
    }
    assert!(runtime.created_names().iter().all(|n| !n.starts_with(DIFFER_CONTAINER_PREFIX)));
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.networks().is_empty());
    assert_eq!(project.migration_files().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_legacy_init_is_not_replayed() -> Result<()> {
    let project = TestProject::new();
    project.write_migration("20211201000000_init.sql", "CREATE SCHEMA legacy_marker;");
    project.write_migration("20220101000000_users.sql", "CREATE TABLE users ();");
    let ledger = FakeLedger::with_versions(&["20211201000000", "20220101000000"]);
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await?;

    let batches = connector.batches();
    assert!(!batches.iter().any(|b| b.contains("legacy_marker")));
    assert!(batches.iter().any(|b| b.contains("CREATE TABLE users")));
    Ok(())
}

#[tokio::test]
async fn test_reset_stderr_fails_shadow_creation() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_exec_output(ExecOutput {
        stderr: "ERROR:  database \"contrib_regression\" is being accessed by other users\n"
            .to_string(),
        ..Default::default()
    });
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CommitError>(),
        Some(CommitError::ShadowCreation(message)) if message.contains("being accessed")
    ));
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_differ_error_frame_fails_the_run() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        differ_output(&[
            r#"{"type":"error","message":"could not connect to source"}"#.to_string() + "\n",
        ]),
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CommitError>(),
        Some(CommitError::DiffFailed(message)) if message == "could not connect to source"
    ));
    assert_eq!(project.migration_files().len(), 1);
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_ledger_failure_keeps_the_file() -> Result<()> {
    let project = TestProject::new();
    project.write_migration("20230101000000_create_users.sql", "CREATE TABLE users ();");
    let ledger = FakeLedger::with_versions(&["20230101000000"]).failing_writes();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        differ_output(&[diff_frame(&[("source_only", "public", PROFILES_DDL)])]),
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    match err.downcast_ref::<CommitError>() {
        Some(CommitError::LedgerWrite { path, reason }) => {
            assert!(path.ends_with("20240101000000_remote_commit.sql"));
            assert!(path.exists());
            assert!(reason.contains("permission denied"));
        }
        other => panic!("expected LedgerWrite, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unreachable_shadow_times_out() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new();
    let connector = FakeConnector::unreachable();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    match err.downcast_ref::<CommitError>() {
        Some(CommitError::ReadinessTimeout {
            timeout_secs,
            last_error,
        }) => {
            assert_eq!(*timeout_secs, 1);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert!(runtime.live_containers().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancellation_aborts_and_cleans_up() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let config = test_config();
    let ctx = test_context(&config);
    let runtime = FakeRuntime::new().cancelling_on_exec(ctx.cancel_token().clone());
    let connector = FakeConnector::new();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&ctx, &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(CommitError::is_aborted(&err));
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.networks().is_empty());
    assert_eq!(project.migration_files().len(), 1);
    assert_eq!(ledger.versions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_interrupt_while_diffing_aborts() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new().with_output(
        DIFFER_CONTAINER_PREFIX,
        ScriptedOutput {
            hang: true,
            ..Default::default()
        },
    );
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let interrupt = stream::once(tokio::time::sleep(Duration::from_millis(200)));
    let err = run_with_interrupts(&commit, interrupt).await.unwrap_err();

    assert!(CommitError::is_aborted(&err));
    assert!(
        runtime
            .created_names()
            .iter()
            .any(|n| n.starts_with(DIFFER_CONTAINER_PREFIX))
    );
    assert!(runtime.live_containers().is_empty());
    assert!(runtime.networks().is_empty());
    assert_eq!(project.migration_files().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_second_interrupt_stops_waiting_for_cleanup() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime::new()
        .with_output(
            DIFFER_CONTAINER_PREFIX,
            ScriptedOutput {
                hang: true,
                ..Default::default()
            },
        )
        .with_slow_removals(Duration::from_secs(30));
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let interrupts = stream::unfold(0, |sent| async move {
        (sent < 2).then_some(())?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Some(((), sent + 1))
    });
    let err = tokio::time::timeout(Duration::from_secs(10), run_with_interrupts(&commit, interrupts))
        .await?
        .unwrap_err();

    assert!(CommitError::is_force_quit(&err));
    assert!(!CommitError::is_aborted(&err));
    assert_eq!(project.migration_files().len(), 1);
    assert_eq!(ledger.versions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_docker_fails_before_any_work() -> Result<()> {
    let (project, ledger) = in_sync_project();
    let runtime = FakeRuntime {
        unreachable: true,
        ..Default::default()
    };
    let connector = FakeConnector::new();
    let config = test_config();
    let templates = ShadowTemplates::default();
    let migrations_dir = project.migrations_dir();

    let commit = remote_commit(&runtime, &connector, &ledger, &config, &templates, &migrations_dir);
    let err = commit
        .execute(&test_context(&config), &ProgressSender::detached())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CommitError>(),
        Some(CommitError::DockerUnavailable(_))
    ));
    assert!(runtime.created_names().is_empty());
    Ok(())
}
