use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use pgdrift::commands;
use pgdrift::config;
use pgdrift::constants::CONFIG_FILENAME;
use pgdrift::error::CommitError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments for pgdrift commit
#[derive(Parser, Debug)]
struct CommitArgs {
    #[command(flatten)]
    remote_args: config::RemoteArgs,

    #[command(flatten)]
    directory_args: config::DirectoryArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Write changes made directly on the remote database as a new migration
    Commit(CommitArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    match run_main(cli).await {
        // Already reported; containers are gone by now
        Err(e) if CommitError::is_aborted(&e) => std::process::exit(1),
        Err(e) if CommitError::is_force_quit(&e) => {
            eprintln!("{}", e);
            std::process::exit(130)
        }
        result => result,
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_main(cli: Cli) -> Result<()> {
    let (file_config, root_dir) = config::load_config(&cli.config_file)?;

    match cli.command {
        Commands::Commit(args) => {
            let cli_config = config::ConfigInput {
                remote: Some(args.remote_args.into()),
                directories: Some(args.directory_args.into()),
                ..Default::default()
            };

            let config = config::ConfigBuilder::new()
                .with_file(file_config)
                .with_cli_args(cli_config)
                .resolve()?;

            info!(
                "Committing remote schema changes from {}:{}/{}",
                config.remote.host, config.remote.port, config.remote.database
            );
            commands::cmd_remote_commit(&config, &root_dir).await
        }
    }
}
