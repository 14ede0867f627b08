//! ShowFlow - Beat-synchronized show playback
//!
//! Loads a show file, replays a recorded log of player reports through the
//! show engine and prints a summary of what fired.

use anyhow::{Context, Result};
use clap::Parser;
use showflow_control::{LoggingSink, MidiSink};
use showflow_core::{DispatcherSettings, EngineConfig, ShowFile};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;

mod logging_setup;
mod replay;

use replay::Session;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "showflow")]
#[command(about = "Replay player reports through a ShowFlow show")]
#[command(version)]
struct Args {
    /// Show file (JSON)
    #[arg(short, long, env = "SHOWFLOW_SHOW")]
    show: PathBuf,

    /// Engine configuration; defaults to the per-user config file
    #[arg(short, long, env = "SHOWFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines report log; reads stdin when omitted
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Fixed arbitration seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => EngineConfig::load_or_default().context("Failed to load default config")?,
    };
    if let Some(seed) = args.seed {
        config.random_seed = Some(seed);
    }

    let _log_guard = logging_setup::init(&config.log)?;
    info!("Starting ShowFlow {}", env!("CARGO_PKG_VERSION"));

    let show_file = ShowFile::load(&args.show)
        .with_context(|| format!("Failed to load show file {:?}", args.show))?;
    let sink = open_sink(&config.dispatcher)?;
    let session = Session::start(show_file, &config, sink)?;

    let summary = match &args.replay {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open replay log {:?}", path))?;
            info!("Replaying {:?}", path);
            session.replay(BufReader::new(file))?
        }
        None => session.replay(io::stdin().lock())?,
    };
    let summary = session.finish(summary);

    info!(
        reports = summary.reports,
        events = summary.total_events(),
        failed = summary.dispatch.failed,
        "Replay complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn open_sink(settings: &DispatcherSettings) -> Result<Box<dyn MidiSink>> {
    match &settings.midi_port {
        #[cfg(feature = "midi")]
        Some(port) => {
            let sink = showflow_control::MidiOutputSink::connect(port)
                .with_context(|| format!("Failed to open MIDI port {:?}", port))?;
            Ok(Box::new(sink))
        }
        #[cfg(not(feature = "midi"))]
        Some(port) => {
            tracing::warn!(port = %port, "Built without MIDI output, logging messages instead");
            Ok(Box::new(LoggingSink))
        }
        None => Ok(Box::new(LoggingSink)),
    }
}
