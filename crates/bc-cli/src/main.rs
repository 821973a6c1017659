//! bc-cli — operator entrypoint for config inspection and offline paper
//! runs against the trading core (§6 "Command channel / exit codes": this
//! binary is the process entrypoint half; `bc-loop` is the live command
//! server).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bc-cli")]
#[command(about = "Bar-driven trading core: config tooling and offline paper runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a layered config stack's hash and print its canonical JSON.
    ConfigHash {
        /// Paths in merge order (base -> mindset overlay -> environment overlay).
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a bar-history CSV through the trading core against the
    /// reference paper broker and print the resulting open positions.
    PaperRun {
        /// CSV with header `ts_utc,open,high,low,close,volume`.
        #[arg(long)]
        bars: String,

        /// Symbol the bar history belongs to.
        #[arg(long)]
        symbol: String,

        /// Bar timeframe (M1, M5, M15, M30, H1, H4, D1).
        #[arg(long, default_value = "M15")]
        timeframe: String,

        /// Arm the core before replay so it is allowed to place orders.
        #[arg(long)]
        arm: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    match cli.cmd {
        Commands::ConfigHash { paths } => commands::config_hash::config_hash(paths),
        Commands::PaperRun { bars, symbol, timeframe, arm } => commands::paper_run::paper_run(bars, symbol, timeframe, arm),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
