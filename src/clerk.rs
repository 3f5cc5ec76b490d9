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

//! Clerks: the workers that drain the transaction pool.
//!
//! A [`Clerk`] is plain data. [`Clerk::run`] executes its whole shift on the
//! calling thread, so tests can drive a clerk synchronously while the
//! simulation puts each one on its own thread.
//!
//! ```text
//! Created ─► Registered ─► Dispatching ─► Applying ─► Pausing ─┐
//!                              ▲  │                            │
//!                              │  └─ pool drained / cancelled ─┼─► Finished
//!                              └───────────────────────────────┘
//! ```

use crate::base::ClerkId;
use crate::cancel::CancellationToken;
use crate::event::{Event, EventSink};
use crate::ledger::Ledger;
use crate::transaction_pool::TransactionPool;
use crate::{Transaction, TransactionError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClerkState {
    Created,
    Registered,
    Dispatching,
    Applying,
    Pausing,
    Finished,
}

/// What a clerk did during its shift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClerkReport {
    pub clerk: ClerkId,
    /// Transactions applied to an account.
    pub applied: usize,
    /// Transactions skipped because their account does not exist.
    pub dropped: usize,
    /// Withdrawal that was waiting for funds when cancellation fired.
    pub abandoned: Option<Transaction>,
    pub cancelled: bool,
    /// The clerk's thread panicked; the counters above are unknown.
    pub panicked: bool,
}

impl ClerkReport {
    pub fn new(clerk: ClerkId) -> Self {
        Self {
            clerk,
            applied: 0,
            dropped: 0,
            abandoned: None,
            cancelled: false,
            panicked: false,
        }
    }

    pub fn panicked(clerk: ClerkId) -> Self {
        Self {
            panicked: true,
            ..Self::new(clerk)
        }
    }
}

/// Keeps a clerk registered with the pool for as long as it lives.
///
/// Deregistration happens in `Drop`, so it runs on every way out of a shift,
/// unwinding included.
struct Shift {
    clerk: ClerkId,
    pool: Arc<TransactionPool>,
    events: Arc<dyn EventSink>,
}

impl Shift {
    fn begin(clerk: ClerkId, pool: Arc<TransactionPool>, events: Arc<dyn EventSink>) -> Self {
        pool.register_clerk(clerk);
        events.emit(Event::ClerkRegistered { clerk });
        Self {
            clerk,
            pool,
            events,
        }
    }
}

impl Drop for Shift {
    fn drop(&mut self) {
        if self.pool.finish_clerk(self.clerk) {
            self.events.emit(Event::ClerkFinished { clerk: self.clerk });
        }
    }
}

pub struct Clerk {
    id: ClerkId,
    pool: Arc<TransactionPool>,
    ledger: Arc<Ledger>,
    cancel: CancellationToken,
    events: Arc<dyn EventSink>,
    max_pause: Duration,
    rng: StdRng,
    state: ClerkState,
}

impl Clerk {
    /// Upper bound of the random pause between two transactions.
    pub const DEFAULT_MAX_PAUSE: Duration = Duration::from_millis(100);

    pub fn new(
        id: ClerkId,
        pool: Arc<TransactionPool>,
        ledger: Arc<Ledger>,
        cancel: CancellationToken,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            pool,
            ledger,
            cancel,
            events,
            max_pause: Self::DEFAULT_MAX_PAUSE,
            rng: StdRng::from_entropy(),
            state: ClerkState::Created,
        }
    }

    /// Sets the upper bound of the pause. `Duration::ZERO` disables pausing.
    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    /// Makes the pause lengths reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> ClerkId {
        self.id
    }

    pub fn state(&self) -> ClerkState {
        self.state
    }

    /// Works through the pool until it is drained or cancellation fires.
    ///
    /// The clerk is registered with the pool for the duration of the call and
    /// deregistered exactly once on the way out.
    pub fn run(&mut self) -> ClerkReport {
        let mut report = ClerkReport::new(self.id);

        let shift = Shift::begin(self.id, Arc::clone(&self.pool), Arc::clone(&self.events));
        self.state = ClerkState::Registered;

        self.work(&mut report);

        drop(shift);
        self.state = ClerkState::Finished;
        report
    }

    fn work(&mut self, report: &mut ClerkReport) {
        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            self.state = ClerkState::Dispatching;
            let Some(transaction) = self.pool.try_dequeue() else {
                return;
            };

            self.state = ClerkState::Applying;
            match self.ledger.apply(&transaction, self.id, &self.cancel, self.events.as_ref()) {
                Ok(_) => report.applied += 1,
                // Unknown accounts are skipped without pausing.
                Err(TransactionError::UnknownAccount(account)) => {
                    report.dropped += 1;
                    self.events.emit(Event::TransactionDropped {
                        clerk: self.id,
                        account,
                        amount: transaction.amount(),
                    });
                    continue;
                }
                Err(TransactionError::Cancelled) => {
                    report.abandoned = Some(transaction);
                    report.cancelled = true;
                    return;
                }
                Err(err) => {
                    log::warn!("{} skipping transaction: {err}", self.id);
                    report.dropped += 1;
                    continue;
                }
            }

            self.state = ClerkState::Pausing;
            let pause = self.next_pause();
            if !self.cancel.sleep(pause) {
                report.cancelled = true;
                return;
            }
        }
    }

    fn next_pause(&mut self) -> Duration {
        self.rng.gen_range(Duration::ZERO..=self.max_pause)
    }
}
