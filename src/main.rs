//! Studycast CLI entry point.

use anyhow::Result;
use clap::Parser;
use studycast::cli::{commands, Cli, Commands};
use studycast::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("studycast={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli
        .config
        .as_deref()
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);

    let loaded = Settings::load_from(Some(&config_path));

    // Config commands must work even when the file does not parse.
    if let Commands::Config { action } = &cli.command {
        return commands::run_config(action, config_path, loaded.unwrap_or_default());
    }

    let settings = loaded?;

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.sessions_dir())?;

    match &cli.command {
        Commands::Run { audio, json } => {
            commands::run_session(audio, *json, settings).await?;
        }

        Commands::Resume { session, json } => {
            commands::run_resume(session, *json, settings).await?;
        }

        Commands::Status { session, json } => {
            commands::run_status(session, *json, settings).await?;
        }

        Commands::Report { session, json } => {
            commands::run_report(session, *json, settings).await?;
        }

        Commands::List => {
            commands::run_list(settings).await?;
        }

        Commands::Artifact {
            session,
            stage,
            topic,
            output,
        } => {
            commands::run_artifact(session, stage, topic.as_deref(), output.as_deref(), settings)
                .await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host.as_deref(), *port, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, &config_path).await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
