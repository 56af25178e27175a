//! Patter — run a program file through the engine, printing each step.
//!
//! The file is split into blocks on blank lines; every block is fed to the
//! engine exactly as a live editing surface would, then the transport runs
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use patter::engine::Engine;
use patter::sink::ConsoleSink;
use patter::symbols::{ChannelObserver, DirSource, NullSource, SampleSource};
use patter::EngineConfig;

#[derive(Parser)]
#[command(name = "patter", version, about = "Live-coded probabilistic step sequencer")]
struct Cli {
    /// Program file, one statement per blank-line-separated block.
    program: PathBuf,

    /// Tempo in beats per minute.
    #[arg(long)]
    bpm: Option<u16>,

    /// Scheduler tick interval in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seed for the choice automata.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory of {name}.wav sample files.
    #[arg(long)]
    samples: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load()?;
    if let Some(bpm) = cli.bpm {
        config.bpm = bpm;
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.tick_ms = tick_ms;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(samples) = cli.samples {
        config.sample_dir = Some(samples);
    }

    let source: Arc<dyn SampleSource> = match &config.sample_dir {
        Some(dir) => Arc::new(DirSource::new(dir.clone())),
        None => Arc::new(NullSource),
    };

    let (status_tx, status_rx) = std::sync::mpsc::channel();
    let observer = Arc::new(ChannelObserver::new(status_tx));
    let mut engine = Engine::new(&config, source, observer, Box::new(ConsoleSink::new()))?;

    let text = std::fs::read_to_string(&cli.program)?;
    for (block, statement) in blocks(&text).into_iter().enumerate() {
        let analysis = engine.update_block(block, &statement);
        for err in &analysis.errors {
            eprintln!("block {block}: {}", err.reasons.join("; "));
        }
    }

    engine.play();
    println!("playing at {} bpm — Ctrl-C to stop", config.bpm);

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        // Surface resolution progress while the transport runs.
        while let Ok((identifier, status)) = status_rx.try_recv() {
            println!("       · {identifier}: {status:?}");
        }
        thread::sleep(Duration::from_millis(50));
    }

    engine.stop();
    Ok(())
}

/// Split a program into blank-line-separated blocks.
fn blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}
