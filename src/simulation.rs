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

//! Simulation driver.
//!
//! Builds the ledger and the transaction pool, puts every clerk on its own
//! named thread and joins them all before reading the final balances. The join
//! is a real barrier on clerk completion; nothing here waits for a fixed amount
//! of time and hopes the clerks are done.
//!
//! A run can end with withdrawals that no later deposit will ever cover. Those
//! clerks stay blocked, which is correct behaviour for an account, but would
//! make a plain [`SimulationHandle::join`] wait forever.
//! [`SimulationHandle::join_or_cancel_stalled`] detects that state and cancels
//! the run.

use crate::base::{AccountId, ClerkId};
use crate::cancel::CancellationToken;
use crate::clerk::{Clerk, ClerkReport};
use crate::error::SimulationError;
use crate::event::EventSink;
use crate::ledger::Ledger;
use crate::transaction_pool::TransactionPool;
use crate::Transaction;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sizing and tuning of a randomly generated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    pub clerks: usize,
    pub accounts: u32,
    pub transactions: usize,
    /// Upper bound of the random pause a clerk takes after each transaction.
    pub max_pause: Duration,
    /// Generated amounts are whole numbers in `-max_amount..=max_amount`.
    pub max_amount: i64,
    /// Seed for transaction generation and pauses; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clerks: 10,
            accounts: 5,
            transactions: 50,
            max_pause: Clerk::DEFAULT_MAX_PAUSE,
            max_amount: 1000,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidConfig`] when there are no clerks, no
    /// accounts, or the amount bound is negative.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.clerks == 0 {
            return Err(SimulationError::InvalidConfig("at least one clerk is required"));
        }
        if self.accounts == 0 {
            return Err(SimulationError::InvalidConfig("at least one account is required"));
        }
        if self.max_amount < 0 {
            return Err(SimulationError::InvalidConfig("maximum amount must not be negative"));
        }
        Ok(())
    }
}

/// Generates `count` transactions with a uniformly random account in
/// `0..accounts` and a uniformly random whole amount in
/// `-max_amount..=max_amount`. The sign of `max_amount` is ignored.
pub fn generate_transactions<R: Rng + ?Sized>(
    rng: &mut R,
    accounts: u32,
    count: usize,
    max_amount: i64,
) -> Vec<Transaction> {
    if accounts == 0 {
        return Vec::new();
    }
    let max_amount = max_amount.saturating_abs();
    (0..count)
        .map(|_| {
            let account = AccountId(rng.gen_range(0..accounts));
            let amount = Decimal::from(rng.gen_range(-max_amount..=max_amount));
            Transaction::new(account, amount)
        })
        .collect()
}

/// A configured run that has not started yet.
pub struct Simulation {
    ledger: Arc<Ledger>,
    pool: Arc<TransactionPool>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    clerks: usize,
    max_pause: Duration,
    seed: Option<u64>,
}

impl Simulation {
    /// Creates a run of `clerks` clerks over a pre-built transaction sequence.
    pub fn new(
        ledger: Ledger,
        transactions: Vec<Transaction>,
        clerks: usize,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger: Arc::new(ledger),
            pool: Arc::new(TransactionPool::new(transactions)),
            events,
            cancel: CancellationToken::new(),
            clerks,
            max_pause: Clerk::DEFAULT_MAX_PAUSE,
            seed: None,
        }
    }

    /// Creates a run with `config.accounts` empty accounts and
    /// `config.transactions` random transactions.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidConfig`] if `config` does not validate.
    pub fn from_config(
        config: &SimulationConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let transactions =
            generate_transactions(&mut rng, config.accounts, config.transactions, config.max_amount);

        let mut simulation = Self::new(
            Ledger::with_accounts(config.accounts),
            transactions,
            config.clerks,
            events,
        )
        .with_max_pause(config.max_pause);
        simulation.seed = config.seed;
        Ok(simulation)
    }

    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    /// Seeds every clerk's pause generator; clerk `n` uses `seed + n`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    /// Token that cancels this run. Cancelling before [`start`](Self::start)
    /// makes every clerk finish without taking work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns one thread per clerk, named after the clerk.
    ///
    /// # Errors
    ///
    /// - [`SimulationError::InvalidConfig`] - no clerks were requested, or more
    ///   than clerk ids can number.
    /// - [`SimulationError::Spawn`] - a thread could not be started. Clerks that
    ///   did start are cancelled and joined first.
    pub fn start(self) -> Result<SimulationHandle, SimulationError> {
        if self.clerks == 0 {
            return Err(SimulationError::InvalidConfig("at least one clerk is required"));
        }

        let clerks = u32::try_from(self.clerks)
            .map_err(|_| SimulationError::InvalidConfig("too many clerks"))?;

        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let mut workers = Vec::with_capacity(self.clerks);

        for n in 0..clerks {
            let id = ClerkId(n);
            let mut clerk = Clerk::new(
                id,
                Arc::clone(&self.pool),
                Arc::clone(&self.ledger),
                self.cancel.clone(),
                Arc::clone(&self.events),
            )
            .with_max_pause(self.max_pause);
            if let Some(seed) = self.seed {
                clerk = clerk.with_seed(seed.wrapping_add(u64::from(n)));
            }

            // Dropped when the thread ends, panics included.
            let done = done_tx.clone();
            let spawned = thread::Builder::new().name(id.to_string()).spawn(move || {
                let _done = done;
                clerk.run()
            });

            match spawned {
                Ok(handle) => workers.push((id, handle)),
                Err(err) => {
                    log::error!("Failed to spawn {id}: {err}");
                    self.cancel.cancel();
                    for (_, handle) in workers {
                        let _ = handle.join();
                    }
                    return Err(err.into());
                }
            }
        }

        log::info!(
            "Started {} clerks on {} accounts with {} transactions",
            self.clerks,
            self.ledger.len(),
            self.pool.remaining()
        );

        Ok(SimulationHandle {
            ledger: self.ledger,
            pool: self.pool,
            cancel: self.cancel,
            workers,
            done: done_rx,
        })
    }

    /// Starts the run and joins every clerk.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub fn run(self) -> Result<SimulationReport, SimulationError> {
        Ok(self.start()?.join())
    }
}

/// A running simulation.
pub struct SimulationHandle {
    ledger: Arc<Ledger>,
    pool: Arc<TransactionPool>,
    cancel: CancellationToken,
    workers: Vec<(ClerkId, JoinHandle<ClerkReport>)>,
    /// Disconnects once every clerk thread has exited.
    done: Receiver<()>,
}

impl SimulationHandle {
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Asks every clerk to stop. Blocked withdrawals are abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` when no clerk can make progress any more: every clerk
    /// thread still running is blocked on a withdrawal its account cannot
    /// cover.
    ///
    /// Only an applied transaction can unblock a withdrawal, so the check is
    /// discarded if any transaction was applied while it ran.
    pub fn is_stalled(&self) -> bool {
        let applied = self.ledger.applied_count();

        let running: Vec<ClerkId> = self
            .workers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        if running.is_empty() {
            return false;
        }

        let stuck = self.ledger.stuck_clerks();
        applied == self.ledger.applied_count()
            && running.iter().all(|clerk| stuck.contains(clerk))
    }

    /// Waits for every clerk to finish.
    ///
    /// Blocks forever if a withdrawal can never be covered and nobody cancels
    /// the run; see [`join_or_cancel_stalled`](Self::join_or_cancel_stalled).
    pub fn join(self) -> SimulationReport {
        self.collect(false)
    }

    /// Waits for every clerk to finish, checking every `poll` whether the run
    /// has stalled and cancelling it if so.
    pub fn join_or_cancel_stalled(self, poll: Duration) -> SimulationReport {
        let mut stalled = false;
        loop {
            match self.done.recv_timeout(poll) {
                Err(RecvTimeoutError::Disconnected) => break,
                Ok(()) | Err(RecvTimeoutError::Timeout) => {
                    if self.is_stalled() {
                        log::warn!(
                            "Simulation stalled with {} blocked withdrawals, cancelling",
                            self.ledger.stuck_clerks().len()
                        );
                        stalled = true;
                        self.cancel.cancel();
                        break;
                    }
                }
            }
        }
        self.collect(stalled)
    }

    fn collect(self, stalled: bool) -> SimulationReport {
        let clerks = self
            .workers
            .into_iter()
            .map(|(id, handle)| {
                handle.join().unwrap_or_else(|_| {
                    log::error!("{id} panicked");
                    ClerkReport::panicked(id)
                })
            })
            .collect();

        let report = SimulationReport {
            balances: self.ledger.balances(),
            clerks,
            stalled,
        };
        log::info!(
            "Simulation finished: {} applied, {} dropped, {} abandoned",
            report.applied(),
            report.dropped(),
            report.abandoned().len()
        );
        report
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    /// Final balances in account order.
    pub balances: Vec<(AccountId, Decimal)>,
    /// One report per clerk, in clerk order.
    pub clerks: Vec<ClerkReport>,
    /// The run was cancelled because no clerk could make progress.
    pub stalled: bool,
}

impl SimulationReport {
    pub fn applied(&self) -> usize {
        self.clerks.iter().map(|clerk| clerk.applied).sum()
    }

    pub fn dropped(&self) -> usize {
        self.clerks.iter().map(|clerk| clerk.dropped).sum()
    }

    /// Withdrawals left unapplied because the run was cancelled.
    pub fn abandoned(&self) -> Vec<Transaction> {
        self.clerks.iter().filter_map(|clerk| clerk.abandoned).collect()
    }

    pub fn balance(&self, account: AccountId) -> Option<Decimal> {
        self.balances
            .iter()
            .find(|(id, _)| *id == account)
            .map(|(_, balance)| *balance)
    }
}
