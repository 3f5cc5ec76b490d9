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

//! Account management.
//!
//! An [`Account`] is a monitor: a [`Mutex`] around the balance paired with a
//! [`Condvar`] that is broadcast after every applied transaction. A withdrawal
//! that cannot be covered waits on the condition variable until
//! `balance + amount >= 0` holds, re-checking after every wakeup.
//!
//! # Example
//!
//! ```
//! use ledger_clerks::{Account, AccountId, CancellationToken, ClerkId, NullSink, Transaction};
//! use rust_decimal::Decimal;
//!
//! let account = Account::new(AccountId(1));
//! let deposit = Transaction::new(AccountId(1), Decimal::from(100));
//! let balance = account
//!     .apply(&deposit, ClerkId(0), &CancellationToken::new(), &NullSink)
//!     .unwrap();
//! assert_eq!(balance, Decimal::from(100));
//! assert_eq!(account.balance(), Decimal::from(100));
//! ```

use crate::base::{AccountId, ClerkId};
use crate::cancel::{CancellationToken, Interrupt};
use crate::event::{Event, EventSink};
use crate::{Transaction, TransactionError};
use parking_lot::{Condvar, Mutex};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;

#[derive(Debug)]
struct AccountData {
    balance: Decimal,
    /// Transactions applied so far.
    applied: u64,
    /// Withdrawals currently waiting for funds, one per clerk.
    waiting: Vec<(ClerkId, Decimal)>,
}

impl AccountData {
    fn new() -> Self {
        Self {
            balance: Decimal::ZERO,
            applied: 0,
            waiting: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    fn post(&mut self, amount: Decimal) {
        self.balance += amount;
        self.applied += 1;
        self.assert_invariants();
    }

    fn stop_waiting(&mut self, clerk: ClerkId) {
        self.waiting.retain(|(waiter, _)| *waiter != clerk);
    }
}

/// Lock and condition variable shared with the cancellation token while a
/// withdrawal waits.
#[derive(Debug)]
struct Monitor {
    data: Mutex<AccountData>,
    /// Broadcast whenever the balance changes or cancellation fires.
    funds_changed: Condvar,
}

impl Interrupt for Monitor {
    fn interrupt(&self) {
        let _data = self.data.lock();
        self.funds_changed.notify_all();
    }
}

/// Ledger account.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    monitor: Arc<Monitor>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            monitor: Arc::new(Monitor {
                data: Mutex::new(AccountData::new()),
                funds_changed: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> Decimal {
        self.monitor.data.lock().balance
    }

    /// Applies `transaction` on behalf of `clerk` and returns the new balance.
    ///
    /// Credits and covered withdrawals apply immediately. A withdrawal that
    /// would leave the balance negative blocks, with the lock released, until
    /// another transaction on this account makes it affordable. Every applied
    /// transaction wakes all waiters so they can re-check. Firing `cancel`
    /// wakes a waiting withdrawal on its own; no prior registration is needed.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::AccountMismatch`] - `transaction` targets another account.
    /// - [`TransactionError::Cancelled`] - `cancel` fired while waiting. Nothing is applied.
    pub fn apply(
        &self,
        transaction: &Transaction,
        clerk: ClerkId,
        cancel: &CancellationToken,
        events: &dyn EventSink,
    ) -> Result<Decimal, TransactionError> {
        if transaction.account_id() != self.id {
            return Err(TransactionError::AccountMismatch {
                expected: self.id,
                found: transaction.account_id(),
            });
        }

        let amount = transaction.amount();
        let mut data = self.monitor.data.lock();

        if transaction.is_debit() && !transaction.fits(data.balance) {
            events.emit(Event::WithdrawalBlocked {
                clerk,
                account: self.id,
                amount,
                balance: data.balance,
            });
            data.waiting.push((clerk, amount));
            let _subscription = cancel.subscribe(self.monitor.clone());

            while !transaction.fits(data.balance) {
                if cancel.is_cancelled() {
                    data.stop_waiting(clerk);
                    return Err(TransactionError::Cancelled);
                }
                self.monitor.funds_changed.wait(&mut data);
            }
            data.stop_waiting(clerk);
        }

        data.post(amount);
        let balance = data.balance;
        events.emit(Event::TransactionApplied {
            clerk,
            account: self.id,
            amount,
            balance,
        });
        self.monitor.funds_changed.notify_all();

        Ok(balance)
    }

    /// Number of transactions applied to this account.
    pub fn applied_count(&self) -> u64 {
        self.monitor.data.lock().applied
    }

    /// Clerks waiting on a withdrawal this account still cannot cover.
    ///
    /// A waiter that has been woken by a sufficient credit but has not yet
    /// re-acquired the lock is not reported.
    pub fn stuck_clerks(&self) -> Vec<ClerkId> {
        let data = self.monitor.data.lock();
        data.waiting
            .iter()
            .filter(|(_, amount)| data.balance + *amount < Decimal::ZERO)
            .map(|(clerk, _)| *clerk)
            .collect()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut balance = self.balance().round_dp(Account::DECIMAL_PRECISION);
        balance.rescale(Account::DECIMAL_PRECISION);
        let mut state = serializer.serialize_struct("Account", 2)?;
        state.serialize_field("account", &self.id)?;
        state.serialize_field("balance", &balance)?;
        state.end()
    }
}
