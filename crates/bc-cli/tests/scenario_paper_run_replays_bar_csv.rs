//! `bc-cli paper-run` replays a bar CSV end to end against the reference
//! paper broker without needing the HTTP daemon up.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

#[test]
fn replays_csv_and_reports_clean_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("bars.csv");
    let mut f = std::fs::File::create(&csv_path).unwrap();
    writeln!(f, "ts_utc,open,high,low,close,volume").unwrap();
    for i in 0..20 {
        let ts = chrono::DateTime::<chrono::Utc>::from_timestamp(1_700_000_000 + i * 900, 0).unwrap();
        let close = 1.1000 + (i as f64) * 0.0001;
        writeln!(f, "{},{close},{},{},{close},100", ts.to_rfc3339(), close + 0.0005, close - 0.0005).unwrap();
    }
    drop(f);

    let mut cmd = Command::cargo_bin("bc-cli").unwrap();
    cmd.args([
        "paper-run",
        "--bars",
        csv_path.to_str().unwrap(),
        "--symbol",
        "EURUSD",
        "--timeframe",
        "M15",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("iterations_completed=20"))
    .stdout(predicate::str::contains("open_positions="));
}
