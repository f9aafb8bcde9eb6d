//! kernsim demo driver.
//!
//! One subcommand per simulator. Each demo seeds the RNG, starts the
//! component's threads, feeds a synthetic workload for the configured
//! duration, stops everything, and prints the final stats report.

mod demos;

use anyhow::Result;
use clap::{Parser, Subcommand};
use demos::DemoOpts;

#[derive(Parser)]
#[command(name = "kernsim", version, about = "Kernel-subsystem simulators")]
struct Cli {
    /// Workload duration per simulator, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    duration_ms: u64,

    /// Seed for the synthetic-workload RNG.
    #[arg(long, default_value_t = 0x6b73696d)]
    seed: u64,

    /// Print the final report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Multi-CPU scheduler with load balancing.
    Sched,
    /// RCU callback engine with NOCB offload and SRCU readers.
    Rcu,
    /// HTB traffic shaping feeding an ETF deadline queue.
    Shaper,
    /// CUBIC and BIC congestion control under an ACK/loss stream.
    Tcp,
    /// Tick devices, NOHZ transitions, jiffy accounting.
    Tick,
    /// Every simulator in sequence.
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    kernsim_core::logging::init_logging(&cli.log_level);

    let opts = DemoOpts {
        duration_ms: cli.duration_ms,
        seed: cli.seed,
        json: cli.json,
    };

    match cli.command.unwrap_or(Command::All) {
        Command::Sched => demos::sched::run(&opts)?,
        Command::Rcu => demos::rcu::run(&opts)?,
        Command::Shaper => demos::shaper::run(&opts)?,
        Command::Tcp => demos::tcp::run(&opts)?,
        Command::Tick => demos::tick::run(&opts)?,
        Command::All => {
            demos::sched::run(&opts)?;
            demos::rcu::run(&opts)?;
            demos::shaper::run(&opts)?;
            demos::tcp::run(&opts)?;
            demos::tick::run(&opts)?;
        }
    }
    Ok(())
}
