//! CLI front-end: load a dataset, drive the engine over it, print the report.

use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;

use flowmux::{load_dataset, EngineConfig, FlowEngine};

#[derive(Parser)]
#[command(name = "flowmux")]
#[command(about = "Adaptive flow classification and path-selection simulator")]
#[command(version)]
struct Cli {
    /// Dataset file: a header `KNOWN_COUNT NUM_PACKETS KEY_RANGE`, then the
    /// known-flow keys, then the packet keys
    #[arg(value_name = "DATASET", default_value = "dataset.txt")]
    dataset: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return;
        }
        Err(e) => {
            eprint!("{e}");
            exit(1);
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("flowmux error: {err:#}");
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let dataset = load_dataset(&cli.dataset)?;
    let mut engine = FlowEngine::new(EngineConfig::default())?;

    println!("=== flowmux: adaptive flow processor ===");
    println!(
        "dataset {}: {} known flows, {} packets, key range {}",
        cli.dataset.display(),
        dataset.declared_known,
        dataset.packets.len(),
        dataset.key_range
    );

    let start = Instant::now();
    for &key in &dataset.known {
        engine.admit_known_flow(key, 0.0);
    }

    let total = dataset.packets.len();
    for (i, &key) in dataset.packets.iter().enumerate() {
        engine.process_at(key, start.elapsed().as_secs_f64());
        if i > 0 && i % 100_000 == 0 {
            println!(
                "processed {i} packets ({:.1}%)...",
                100.0 * i as f64 / total as f64
            );
        }
    }

    let report = engine.report(dataset.echo(), start.elapsed().as_secs_f64());
    println!("\n{report}");
    Ok(())
}
