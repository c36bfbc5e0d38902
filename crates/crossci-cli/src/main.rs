//! crossci CLI entrypoint.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod handlers;


use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "crossci")]
#[command(author, version, about = "Evaluate and run cross-compilation CI workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();

    let ok = match cli.command {
        Commands::Init { path, force } => {
            handlers::init(&path, force).await?;
            true
        }
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Evaluate { path, event } => handlers::evaluate(&config, &path, &event).await?,
        Commands::Run {
            path,
            event,
            job,
            host,
            workspace,
        } => handlers::run(&config, &path, &event, job.as_deref(), host, workspace).await?,
        Commands::Schema => {
            handlers::schema()?;
            true
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => handlers::show_config(&config)?,
                ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
            }
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
