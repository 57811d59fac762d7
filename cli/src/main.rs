//! camview command-line viewer.
//!
//! Lists capture devices and runs a headless preview of one of them,
//! optionally saving a still frame as PNG.

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camview_ipc::Rotation;

#[derive(Debug, Parser)]
#[command(name = "camview", version, about = "Webcam capture viewer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available capture devices.
    List {
        /// Print the devices as JSON.
        #[arg(long)]
        json: bool,

        /// Use the built-in test pattern devices instead of real cameras.
        #[arg(long)]
        synthetic: bool,
    },

    /// Preview a capture device.
    Preview(PreviewArgs),
}

#[derive(Debug, clap::Args)]
pub struct PreviewArgs {
    /// Device identifier to open.
    #[arg(long, conflicts_with = "index")]
    pub device: Option<String>,

    /// Position of the device in the `list` output.
    #[arg(long)]
    pub index: Option<usize>,

    /// How long to run the preview.
    #[arg(long, default_value_t = 5)]
    pub seconds: u64,

    /// Mirror the saved still horizontally.
    #[arg(long)]
    pub mirror: bool,

    /// Rotate the displayed frame (multiple of 90 degrees).
    #[arg(long, allow_hyphen_values = true)]
    pub rotate: Option<Rotation>,

    /// Save the last frame as PNG.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// JSON file with capture and surface settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the built-in test pattern devices instead of real cameras.
    #[arg(long)]
    pub synthetic: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::List { json, synthetic } => commands::list(json, synthetic),
        Command::Preview(args) => commands::preview(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
