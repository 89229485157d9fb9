use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error};

use perf_counters::{CounterDefinition, EventCounter};

mod matrix;

use matrix::Matrix;

/// Counter set measured around each variant, from the reference run.
const COUNTERS: &[&str] = &[
    "instructions",
    "cycles",
    "cache-misses",
    "cache-references",
    "L1-dcache-loads",
    "L1-dcache-load-misses",
    "dTLB-loads",
    "dTLB-load-misses",
];

/// Matrix-multiply benchmark measured with hardware performance counters
#[derive(Debug, Parser)]
struct Command {
    /// Verbose debug output
    #[arg(short, long)]
    verbose: bool,

    /// Multiply iterations per variant
    #[arg(short, long, default_value = "10")]
    iterations: u32,

    /// Matrix dimension (rows == columns)
    #[arg(short, long, default_value = "512")]
    size: usize,

    /// Counter definition overlay file (name,type,event_id[,ext1,ext2])
    #[arg(short, long)]
    definitions: Option<PathBuf>,
}

fn main() -> Result<()> {
    let opts = Command::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opts.verbose { "debug" } else { "warn" }),
    )
    .init();

    let definitions = match &opts.definitions {
        Some(path) => CounterDefinition::with_overlay(path)
            .with_context(|| format!("loading counter definitions from {}", path.display()))?,
        None => CounterDefinition::new(),
    };

    let mut a = Matrix::zeroed(opts.size);
    let b = Matrix::initialized(opts.size);
    let c = Matrix::initialized(opts.size);

    println!("counter,value,type");
    println!(
        "{}",
        benchmark(&definitions, &mut a, &b, &c, true, opts.iterations)?
    );
    println!(
        "{}",
        benchmark(&definitions, &mut a, &b, &c, false, opts.iterations)?
    );

    Ok(())
}

/// Runs one variant under a fresh counter group and returns its CSV rows.
///
/// Unsupported counter names are logged and skipped so the run proceeds
/// with the reduced set; a failure to start the group aborts the run.
fn benchmark(
    definitions: &CounterDefinition,
    a: &mut Matrix,
    b: &Matrix,
    c: &Matrix,
    baseline: bool,
    iterations: u32,
) -> Result<String> {
    let mut events = EventCounter::new(definitions);
    if let Err(err) = events.add(COUNTERS) {
        error!("{err}");
    }

    events.start().context("starting counter group")?;
    for _ in 0..iterations {
        if baseline {
            matrix::baseline_multiply(a, b, c);
        } else {
            matrix::multiply(a, b, c);
        }
    }
    events.stop()?;

    debug!("result checksum: {}", a.checksum());

    let result = events.result()?;
    let tag = if baseline { "baseline" } else { "optimized" };
    Ok(result.to_csv(',', false, tag))
}
