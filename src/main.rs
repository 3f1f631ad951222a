//! hidden-player - Spotify playback controller for the terminal
//!
//! Logs in with PKCE, registers a Connect device and moves playback to it.

mod api;
mod auth;
mod config;
mod device;
mod models;
mod store;
mod tui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hidden-player")]
#[command(about = "Play Spotify on a device controlled from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with your Spotify account
    Login {
        /// Start a new login even if a valid token is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Finish a login with the URL the browser was redirected to
    Callback {
        /// Full redirect URL including the `code` parameter
        url: String,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// List the account's Connect devices
    Devices,

    /// Connect the player device and start playback on it
    Play {
        /// Playlist, album or artist URI (defaults to the configured context)
        context: Option<String>,

        /// Track URI to play instead of a context (repeatable)
        #[arg(long = "uri", conflicts_with = "context")]
        uris: Vec<String>,
    },

    /// Launch the terminal user interface
    Tui {
        /// Redirect URL to complete a pending login on startup
        #[arg(long)]
        redirect: Option<String>,
    },
}

/// Initialize logging. With a capture buffer (TUI mode) output goes to the
/// in-app log pane instead of the terminal.
fn init_logging(verbose: bool, capture: Option<tui::LogBuffer>) {
    let default = if verbose { "debug" } else { "info" };
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()));

    match capture {
        Some(logs) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(logs),
            )
            .init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logs = tui::LogBuffer::new();
    let capture = matches!(cli.command, Commands::Tui { .. }).then(|| logs.clone());
    init_logging(cli.verbose, capture);

    match cli.command {
        Commands::Login { force } => {
            tracing::info!("Starting authentication flow...");
            auth::login(force).await?;
        }
        Commands::Callback { url } => {
            auth::complete_login(&url).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Devices => {
            api::list_devices().await?;
        }
        Commands::Play { context, uris } => {
            api::play(context, uris).await?;
        }
        Commands::Tui { redirect } => {
            let config = config::Config::load()?;
            tui::run(config, redirect, logs).await?;
        }
    }

    Ok(())
}
