//! `bc-cli paper-run` — replays a bar-history CSV through the trading core
//! wired to the reference paper broker (§4.1), for quick offline checks of
//! a strategy roster or config change without standing up the HTTP daemon.

use anyhow::{Context, Result};
use bc_schemas::Timeframe;
use bc_testkit::Driver;

use super::parse_timeframe;

pub fn paper_run(bars_path: String, symbol: String, timeframe: String, arm: bool) -> Result<()> {
    let timeframe: Timeframe = parse_timeframe(&timeframe)?;
    let bars = bc_testkit::load_bars_csv(&bars_path, &symbol, timeframe)
        .with_context(|| format!("loading bars from {bars_path}"))?;
    let first = bars.first().context("bars csv must contain at least one row")?;

    let mut driver = Driver::new(&symbol, timeframe, first.ts_utc);
    if arm {
        driver.arm();
    }

    let mut completed = 0u64;
    let mut aborted = 0u64;
    for bar in bars {
        match driver.tick(timeframe, bar) {
            bc_loop::trading_loop::IterationOutcome::Completed => completed += 1,
            bc_loop::trading_loop::IterationOutcome::Aborted { step, detail } => {
                aborted += 1;
                eprintln!("iteration aborted at step {step:?}: {detail}");
            }
            bc_loop::trading_loop::IterationOutcome::ShutdownRequested { exit_code } => {
                eprintln!("core requested shutdown, exit_code={exit_code}");
                break;
            }
        }
    }

    println!("iterations_completed={completed}");
    println!("iterations_aborted={aborted}");
    println!("open_positions={}", driver.tracker().len());
    for (ticket, position) in driver.tracker().iter() {
        println!(
            "  ticket={ticket} symbol={} side={:?} volume={} entry={} sl={} tp={} adopted={}",
            position.symbol, position.side, position.remaining_volume, position.entry_price, position.current_sl, position.current_tp, position.adopted
        );
    }

    Ok(())
}
