use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use rollfleet_core::config::RollConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "rollfleet",
    about = "Rolling deploys and restarts across a tagged fleet",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to rollfleet.toml
    #[arg(long = "config-file", default_value = "rollfleet.toml")]
    config_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll a release (or config) across every instance of an app.
    ///
    /// Exactly one of --artifact and --config must be given.
    Deploy {
        /// Application to deploy
        app: String,
        /// Target environment (dev, stg, prd)
        environment: String,
        /// Artifact reference, e.g. s3://bucket/app/2024.30/build-77.tar.gz
        #[arg(short, long)]
        artifact: Option<String>,
        /// Deploy config: inline JSON, or a path to a JSON file
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Restart an app's service across every instance, one at a time
    Restart {
        app: String,
        environment: String,
    },
    /// Show the deployed version on every instance
    ShowVersion {
        app: String,
        environment: String,
    },
    /// List recent build artifacts for an app
    Artifacts {
        app: String,
        /// Trailing build weeks to list
        #[arg(short, long, default_value_t = 2)]
        weeks: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rollfleet=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_config(&cli.config_file)?;

    match cli.command {
        Commands::Deploy {
            app,
            environment,
            artifact,
            config,
        } => commands::deploy::run(settings, &app, &environment, artifact, config).await,
        Commands::Restart { app, environment } => {
            commands::restart::run(settings, &app, &environment).await
        }
        Commands::ShowVersion { app, environment } => {
            commands::version::run(settings, &app, &environment).await
        }
        Commands::Artifacts { app, weeks } => commands::artifacts::run(settings, &app, weeks).await,
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<RollConfig> {
    if path.exists() {
        Ok(RollConfig::from_file(path)?)
    } else {
        warn!(path = %path.display(), "config file not found; using defaults");
        Ok(RollConfig::default())
    }
}
