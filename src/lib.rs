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

//! # Ledger Clerks
//!
//! This library simulates clerks working concurrently on a shared set of
//! account balances. Clerks pull transactions from a common pool and apply
//! them to accounts; a withdrawal that the account cannot cover waits until a
//! deposit arrives.
//!
//! ## Core Components
//!
//! - [`Account`]: A balance guarded by a mutex and a condition variable
//! - [`TransactionPool`]: Shared FIFO of pending transactions plus the registry of working clerks
//! - [`Clerk`]: Worker that drains the pool, one transaction at a time
//! - [`Simulation`]: Spawns the clerks, joins them and reports final balances
//! - [`CancellationToken`]: Stops clerks wherever they are, including mid-wait
//!
//! ## Example
//!
//! ```
//! use ledger_clerks::{AccountId, Ledger, NullSink, Simulation, Transaction};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // The withdrawal is queued first and waits for the deposit.
//! let transactions = vec![
//!     Transaction::new(AccountId(0), Decimal::from(-50)),
//!     Transaction::new(AccountId(0), Decimal::from(50)),
//! ];
//!
//! let report = Simulation::new(Ledger::with_accounts(1), transactions, 2, Arc::new(NullSink))
//!     .with_max_pause(Duration::ZERO)
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(report.applied(), 2);
//! assert_eq!(report.balance(AccountId(0)), Some(Decimal::ZERO));
//! ```
//!
//! ## Thread Safety
//!
//! Each account has its own lock, so clerks working on different accounts
//! never contend. The pool takes one short lock per call and never blocks.
//! The [`Ledger`] itself is read-only once built and needs no lock.

pub mod account;
mod base;
pub mod cancel;
pub mod clerk;
pub mod error;
pub mod event;
mod ledger;
pub mod simulation;
mod transaction;
mod transaction_pool;

pub use account::Account;
pub use base::{AccountId, ClerkId};
pub use cancel::{CancellationToken, Interrupt, Subscription};
pub use clerk::{Clerk, ClerkReport, ClerkState};
pub use error::{SimulationError, TransactionError};
pub use event::{ChannelSink, Event, EventSink, LogSink, NullSink};
pub use ledger::Ledger;
pub use simulation::{
    Simulation, SimulationConfig, SimulationHandle, SimulationReport, generate_transactions,
};
pub use transaction::Transaction;
pub use transaction_pool::TransactionPool;
