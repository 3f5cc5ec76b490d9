// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::Writer;
use ledger_clerks::{Ledger, LogSink, Simulation, SimulationConfig};
use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// How often the driver checks whether every remaining clerk is blocked.
const STALL_POLL: Duration = Duration::from_millis(50);

/// Ledger Clerks - Concurrent banking simulation
///
/// Generates random deposits and withdrawals, lets clerk threads apply them to
/// shared accounts and prints the final balances as CSV to stdout.
/// Trace output goes to stderr; set RUST_LOG to adjust it.
#[derive(Parser, Debug)]
#[command(name = "ledger-clerks")]
#[command(about = "Simulates clerks applying transactions to shared accounts", long_about = None)]
struct Args {
    /// Number of clerk threads
    #[arg(long, default_value_t = 10)]
    clerks: usize,

    /// Number of accounts, numbered from 0
    #[arg(long, default_value_t = 5)]
    accounts: u32,

    /// Number of random transactions to generate
    #[arg(long, default_value_t = 50)]
    transactions: usize,
}

impl Args {
    fn config(&self) -> SimulationConfig {
        SimulationConfig {
            clerks: self.clerks,
            accounts: self.accounts,
            transactions: self.transactions,
            ..SimulationConfig::default()
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let simulation = match Simulation::from_config(&args.config(), Arc::new(LogSink)) {
        Ok(simulation) => simulation,
        Err(e) => {
            eprintln!("Error configuring simulation: {}", e);
            process::exit(1);
        }
    };

    log::info!("Starting simulation...");
    let handle = match simulation.start() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error starting simulation: {}", e);
            process::exit(1);
        }
    };

    let ledger = Arc::clone(handle.ledger());
    let report = handle.join_or_cancel_stalled(STALL_POLL);
    for tx in report.abandoned() {
        log::warn!(
            "Withdrawal of {} from account {} was never covered",
            -tx.amount(),
            tx.account_id()
        );
    }

    if let Err(e) = write_balances(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Write final balances to a CSV writer, ordered by account id.
///
/// # CSV Format
///
/// Columns: `account, balance`
///
/// ```csv
/// account,balance
/// 0,812.00
/// 1,0.50
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for account in ledger.iter() {
        wtr.serialize(account.as_ref())?;
    }

    wtr.flush()?;
    Ok(())
}
