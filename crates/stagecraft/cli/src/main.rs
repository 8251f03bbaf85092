//! Stagecraft CLI - Provision workspaces and promote artifact bundles
//!
//! Exit codes: 0 completed, 1 unexpected error, 2 rolled back,
//! 3 partially failed, 4 validation error.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod engine;
mod error;
mod output;

use commands::audit::AuditCommands;
use commands::TargetArgs;
use config::StagecraftConfig;
use engine::Engine;
use error::CliResult;
use output::OutputFormat;

/// Stagecraft CLI
#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(about = "Stagecraft - Idempotent provisioning and stage promotion", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "STAGECRAFT_CONFIG")]
    config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Promote a bundle through one or more stages
    Promote(TargetArgs),

    /// Show what a promotion would create, without calling the control plane
    Plan(TargetArgs),

    /// Roll back every stage of a previous run
    Rollback {
        /// Run id printed by `promote`
        run_id: String,
    },

    /// Roll back transactions left open by an interrupted process
    Recover,

    /// Show the stages a version has reached
    Lineage {
        /// Artifact version, e.g. 1.4.0
        version: String,
    },

    /// Audit log tools
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match StagecraftConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let e = error::CliError::from(e);
            output::print_error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    };
    init_tracing(&cli, &config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let code = runtime.block_on(async {
        match run(cli, &config).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "Command failed");
                output::print_error(&e.to_string());
                e.exit_code()
            }
        }
    });

    // Let spawned tasks wind down before exiting
    drop(runtime);
    std::process::exit(code);
}

fn init_tracing(cli: &Cli, config: &StagecraftConfig) {
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli, config: &StagecraftConfig) -> CliResult<i32> {
    let engine = Engine::open(config).await?;
    let orchestrator = &engine.orchestrator;
    let format = cli.output;

    match cli.command {
        Commands::Promote(args) => commands::promote::execute(args, orchestrator, format).await,
        Commands::Plan(args) => commands::plan::execute(args, orchestrator, format).await,
        Commands::Rollback { run_id } => {
            commands::rollback::execute(&run_id, orchestrator, format).await
        }
        Commands::Recover => commands::rollback::recover(orchestrator, format).await,
        Commands::Lineage { version } => {
            commands::lineage::execute(&version, orchestrator, format).await
        }
        Commands::Audit { command } => {
            commands::audit::execute(command, &engine.audit_path, format).await
        }
    }
}
