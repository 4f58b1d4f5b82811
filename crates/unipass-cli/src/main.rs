//! unipass - sign in to the student portal API from the terminal.
//!
//! Restores the stored session on start, then runs one command against it.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use unipass_core::{Config, CredentialBackend, SessionManager, Settings};

#[derive(Parser)]
#[command(name = "unipass")]
#[command(about = "Sign in to the student portal API and manage the stored session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Keep the session in memory only; nothing is read from or written to storage
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with registration number and password
    Login {
        /// Registration number (defaults to the last one used)
        reg_no: Option<String>,

        /// Push notification token to register with the session
        #[arg(long)]
        push_token: Option<String>,
    },
    /// Sign in with the contents of a scanned QR code
    LoginQr {
        code: String,

        /// Push notification token to register with the session
        #[arg(long)]
        push_token: Option<String>,
    },
    /// Sign out and delete the stored token
    Logout,
    /// Show the current session
    Status {
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Authenticated GET of an API path, printed as JSON
    Get {
        /// Path relative to the API base URL
        path: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.debug, cli.log_file.as_deref())?;
    info!("unipass starting");

    let mut settings = Settings::load().context("Failed to load settings")?;
    let mut config = Config::from_env(&settings).context("Failed to resolve configuration")?;
    if cli.ephemeral {
        config.credential_backend = CredentialBackend::Memory;
    }

    let manager = SessionManager::open(&config).await?;

    let code = match cli.command {
        Commands::Login { reg_no, push_token } => {
            commands::login(&manager, &mut settings, reg_no, push_token.as_deref()).await?
        }
        Commands::LoginQr { code, push_token } => {
            commands::login_qr(&manager, &code, push_token.as_deref()).await?
        }
        Commands::Logout => commands::logout(&manager).await,
        Commands::Status { json } => commands::status(&manager, &config, json).await?,
        Commands::Get { path } => commands::get(&manager, &path).await?,
    };

    info!("unipass finished");
    Ok(code)
}
