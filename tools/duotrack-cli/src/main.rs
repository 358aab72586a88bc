//! duotrack CLI: record, merge and inspect dual-track recordings.
//!
//! Usage:
//!   duotrack record [OPTIONS]              Record synthetic frames and a microphone
//!   duotrack merge <VIDEO> <AUDIO> -o OUT  Merge two intermediates
//!   duotrack info <PATH>                   Show tracks of a container file
//!   duotrack check                         Probe encoders and show configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use duotrack_common::config::AppConfig;
use duotrack_record_engine::SpeedMode;

use crate::backend::{BackendChoice, MicrophoneChoice};

mod backend;
mod commands;

#[derive(Parser)]
#[command(
    name = "duotrack",
    about = "Dual-track video and audio recording engine",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Media backend
    #[arg(long, global = true, value_enum, default_value = "auto")]
    backend: BackendChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session from the synthetic renderer and a microphone
    Record {
        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Recording length in seconds
        #[arg(short, long, default_value = "3.0")]
        duration: f64,

        /// Encoded width
        #[arg(long)]
        width: Option<u32>,

        /// Encoded height
        #[arg(long)]
        height: Option<u32>,

        /// Speed mode: extra-slow|slow|normal|fast|extra-fast
        #[arg(long, default_value = "normal")]
        speed: SpeedMode,

        /// Record video only
        #[arg(long)]
        no_audio: bool,

        /// Microphone tone in Hz (silence when omitted)
        #[arg(long, conflicts_with = "mic")]
        tone: Option<f32>,

        /// Capture the default audio input device (GStreamer backend only)
        #[arg(long)]
        mic: bool,
    },

    /// Merge a video-only and an audio-only file
    Merge {
        /// Video intermediate
        video: PathBuf,

        /// Audio intermediate
        audio: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show tracks and sample counts of a container file
    Info {
        /// Path to the file
        path: PathBuf,
    },

    /// Probe encoders and print the effective configuration
    Check {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write_config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    duotrack_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            output,
            duration,
            width,
            height,
            speed,
            no_audio,
            tone,
            mic,
        } => {
            let microphone = match (mic, tone) {
                (true, _) => MicrophoneChoice::Device,
                (false, Some(hz)) => MicrophoneChoice::Tone(hz),
                (false, None) => MicrophoneChoice::Silence,
            };
            commands::record::run(
                config,
                commands::record::RecordOptions {
                    output,
                    duration_secs: duration,
                    width,
                    height,
                    speed,
                    audio: !no_audio,
                    backend: cli.backend,
                    microphone,
                },
            )
            .await
        }
        Commands::Merge {
            video,
            audio,
            output,
        } => commands::merge::run(cli.backend, video, audio, output),
        Commands::Info { path } => commands::info::run(cli.backend, path),
        Commands::Check { write_config } => commands::check::run(config, write_config),
    }
}
