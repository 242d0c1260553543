use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::time::{Duration, Instant};

use splaya::cli::Args;
use splaya::{CacheStrategy, PlayerSession, SessionOptions};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level()),
    )
    .init();

    let options = SessionOptions {
        strategy: if args.preload {
            CacheStrategy::Preload
        } else {
            CacheStrategy::Bounded
        },
        fps: args.fps,
        start_paused: args.paused,
        initial_index: args.start_frame,
        worker_threads: args.workers,
    };

    let mut session = PlayerSession::load_frames(&args.directory, options)
        .with_context(|| format!("loading frames from {}", args.directory.display()))?;

    info!(
        "Playing {} frames at {:.1} fps ({} ticks simulated)",
        session.frame_count(),
        session.fps(),
        args.ticks
    );

    let tick = Duration::from_secs_f64(1.0 / args.tick_rate.max(1.0));
    let started = Instant::now();

    for _ in 0..args.ticks {
        if let Err(err) = session.advance() {
            warn!("Frame error: {err}");
        }
        {
            // What a renderer would draw this tick.
            let view = session.active_frame();
            log::trace!(
                "tick: frame {:?}, {} points",
                view.frame_index(),
                view.points().len()
            );
        }
        std::thread::sleep(tick);
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Done: {} frames presented in {:.2}s (displayed frame {:?}, {} bytes resident)",
        session.frames_presented(),
        elapsed,
        session.displayed_frame_index(),
        session.cache().resident_bytes()
    );

    Ok(())
}
