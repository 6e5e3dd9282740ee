//! radiocaps-sim
//!
//! Runs a radio capability switch scenario against simulated modems and
//! prints the JSON report on stdout. Logs go to stderr; set `RUST_LOG` to
//! change verbosity (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use radiocaps_sim::{RunOptions, Scenario};
use tracing_subscriber::EnvFilter;

/// Radio capability switch simulator.
#[derive(Parser, Debug)]
#[command(name = "radiocaps-sim", about = "Run a radio capability switch scenario")]
struct Cli {
    /// Scenario TOML file.
    #[arg(long)]
    scenario: PathBuf,

    /// Probe each slot for capability support before registering it.
    #[arg(long, default_value_t = false)]
    probe: bool,

    /// Pretty-print the JSON report.
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let scenario = Scenario::load(&cli.scenario)?;

    tracing::info!(
        scenario = %scenario.name,
        slots = scenario.slots.len(),
        steps = scenario.steps.len(),
        probe = cli.probe,
        "radiocaps-sim starting"
    );

    let report = scenario.run(RunOptions { probe: cli.probe })?;
    let json = report.to_json(cli.pretty).context("serializing report")?;
    println!("{json}");

    tracing::info!(
        holder = ?report.holder,
        commits = report.commits,
        aborts = report.aborts,
        "scenario finished"
    );
    Ok(())
}
