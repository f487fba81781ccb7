use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::stresstest::perform_stresstest;
use crate::workloads::WorkloadsConfig;

mod logging;
mod stresstest;
mod workloads;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Hammers memoizing caches with concurrent callers and verifies they compute every key
/// exactly once.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
    duration: Duration,

    /// Enable JSON tracing into a sink, mimicking production overhead.
    #[arg(long)]
    tracing: bool,

    /// Enable `RUST_BACKTRACE`.
    #[arg(long)]
    backtraces: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let workloads = WorkloadsConfig::get(&cli.workloads)?;

    let logging = logging::Config {
        backtraces: cli.backtraces,
        tracing: cli.tracing,
    };
    // SAFETY: no other threads have been spawned yet.
    unsafe { logging::init(logging) };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(perform_stresstest(workloads, cli.duration))
}
