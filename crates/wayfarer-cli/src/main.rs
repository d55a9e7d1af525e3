use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use wayfarer_core::MOOD_CATEGORIES;
use wayfarer_recommend::{validate_environment, AppConfig, Services, ENV_KEYS};

const DEFAULT_LOG_FILTER: &str =
    "wayfarer_cli=info,wayfarer_web=info,wayfarer_recommend=info,wayfarer_providers=warn,wayfarer_storage=warn";

#[derive(Debug, Parser)]
#[command(name = "wayfarer-cli")]
#[command(about = "Mood-based travel destination recommendations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the mood catalog.
    Moods,
    /// Print destinations for a mood as JSON.
    Recommend {
        mood: String,
        #[arg(long)]
        no_weather: bool,
    },
    /// Run the JSON web API.
    Serve,
    /// Report which service credentials are configured.
    CheckEnv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();
    log_dotenv(&dotenv);

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Moods) {
        Commands::Moods => {
            for mood in MOOD_CATEGORIES {
                println!("{:<14} {} {:<14} {}", mood.id, mood.emoji, mood.label, mood.description);
            }
        }
        Commands::Recommend { mood, no_weather } => {
            let config = AppConfig::from_env()?;
            debug!(?config, "loaded configuration");
            let services = Services::from_config(&config)?;
            let destinations = services.recommend(&mood, !no_weather).await;
            let json = serde_json::to_string_pretty(&destinations)
                .context("serializing destinations")?;
            println!("{json}");
        }
        Commands::Serve => {
            wayfarer_web::serve_from_env().await?;
        }
        Commands::CheckEnv => {
            let report = validate_environment();
            for key in &report.keys {
                let status = if key.configured { "configured" } else { "missing" };
                println!("{:<32} {:<10} {}", key.name, status, key.description);
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            if !report.is_valid {
                for key in ENV_KEYS.iter().filter(|k| report.missing_keys.iter().any(|m| m == k.name)) {
                    eprintln!("{}", key.missing_message());
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// A missing `.env` is normal; only an unreadable one is worth a warning.
/// Returns whether the load failed for any other reason.
fn log_dotenv(result: &dotenvy::Result<PathBuf>) -> bool {
    match result {
        Ok(path) => {
            debug!(path = %path.display(), "loaded .env");
            false
        }
        Err(err) if err.not_found() => {
            debug!("no .env file");
            false
        }
        Err(err) => {
            warn!(error = %err, "failed to load .env");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dotenv_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dotenvy::from_path(dir.path().join(".env"));
        assert!(!log_dotenv(&missing.map(|_| dir.path().join(".env"))));
    }

    #[test]
    fn malformed_dotenv_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "WAYFARER_BROKEN LINE\n").unwrap();
        let result = dotenvy::from_path(&path).map(|_| path.clone());
        assert!(log_dotenv(&result));
    }
}
