use clap::Parser;
use std::path::PathBuf;

use crate::core::player::DEFAULT_FPS;

/// Headless gaussian-splat sequence player
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory of frame_<N>.ply files
    #[arg(value_name = "DIR")]
    pub directory: PathBuf,

    /// Autoplay frame rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = DEFAULT_FPS)]
    pub fps: f32,

    /// Start paused (navigate with --frame / host controls)
    #[arg(short = 'p', long = "paused")]
    pub paused: bool,

    /// Initial frame index (0-based)
    #[arg(long = "frame", value_name = "N", default_value_t = 0)]
    pub start_frame: usize,

    /// Decode every frame up front instead of bounded caching
    #[arg(long = "preload")]
    pub preload: bool,

    /// Decode worker threads (default: 3/4 of cores)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Render ticks to simulate before exiting
    #[arg(long = "ticks", value_name = "N", default_value_t = 600)]
    pub ticks: u64,

    /// Simulated render-loop rate in ticks per second
    #[arg(long = "tick-rate", value_name = "HZ", default_value_t = 60.0)]
    pub tick_rate: f64,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
