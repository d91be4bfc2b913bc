//! threadsim CLI
//!
//! Starts a simulation and runs the interactive operator console on stdin.
//!
//! # Example
//!
//! ```bash
//! # Two routers, advance 10 virtual seconds, inspect the mesh
//! threadsim --radio-model MutualInterference --speed 8 <<'EOF'
//! add router
//! add router x 300 y 100
//! go 10
//! nodes
//! partitions
//! exit
//! EOF
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use threadsim_common::{SimulationConfig, WatchLogLevel, MAX_SIMULATE_SPEED};
use threadsim_runner::{CommandRunner, Simulation};

/// Discrete-event simulator for IEEE 802.15.4 / Thread mesh networks.
///
/// Spawns unmodified Thread stack binaries as node processes and drives
/// them through a shared virtual clock, deterministically and faster than
/// real time.
#[derive(Parser, Debug)]
#[command(name = "threadsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Simulation instance id (selects port base 9000 + 10*id and tmp file
    /// prefix)
    #[arg(long, default_value = "0")]
    sim_id: u32,

    /// Default channel for new nodes (11-26)
    #[arg(short, long, default_value = "11")]
    channel: u8,

    /// Radio model: Ideal, Ideal_Rssi, MutualInterference, MIDisc, Outdoor
    #[arg(short = 'm', long, default_value = "MutualInterference")]
    radio_model: String,

    /// Simulation speed relative to real time; "max" disables pacing
    #[arg(short, long, default_value = "8")]
    speed: String,

    /// Root seed for deterministic runs; 0 draws a fresh seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// FTD node executable name
    #[arg(long, default_value = "ot-cli-ftd")]
    exe: String,

    /// MTD node executable name
    #[arg(long, default_value = "ot-cli-mtd")]
    mtd_exe: String,

    /// Extra directories searched for node executables
    #[arg(long = "search-path")]
    search_paths: Vec<PathBuf>,

    /// Directory for per-node flash and log files
    #[arg(long, default_value = "tmp")]
    tmp_dir: PathBuf,

    /// Watch level applied to new nodes
    #[arg(long, default_value = "warn")]
    watch: WatchLevelArg,

    /// Global packet loss ratio in [0, 1]
    #[arg(long, default_value = "0")]
    plr: f64,
}

#[derive(Clone, Debug)]
struct WatchLevelArg(WatchLogLevel);

impl std::str::FromStr for WatchLevelArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(WatchLevelArg)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let speed = match args.speed.as_str() {
        "max" => MAX_SIMULATE_SPEED,
        s => s
            .parse()
            .with_context(|| format!("invalid speed '{s}'"))?,
    };

    let mut cfg = SimulationConfig {
        id: args.sim_id,
        channel: args.channel,
        radio_model: args.radio_model,
        speed,
        random_seed: args.seed,
        tmp_dir: args.tmp_dir,
        default_watch_level: args.watch.0,
        packet_loss_ratio: args.plr,
        ..Default::default()
    };
    cfg.exe.ftd = args.exe;
    cfg.exe.mtd = args.mtd_exe;
    cfg.exe.search_paths.extend(args.search_paths);

    let sim = Simulation::new(cfg).context("failed to start simulation")?;
    let mut runner = CommandRunner::new(sim);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    write!(out, "> ")?;
    out.flush()?;
    for line in stdin.lock().lines() {
        let line = line.context("stdin read failed")?;
        runner.run_line(&line, &mut out)?;
        if runner.exit_requested() {
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    runner.simulation_mut().stop();
    Ok(())
}
