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

//! The set of accounts a simulation runs against.
//!
//! A [`Ledger`] is built once and never changes shape afterwards: no account
//! is added or removed while clerks run. Lookups therefore need no lock of
//! their own; each [`Account`] guards its balance itself.

use crate::account::Account;
use crate::base::{AccountId, ClerkId};
use crate::cancel::CancellationToken;
use crate::event::EventSink;
use crate::{Transaction, TransactionError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Ledger {
    accounts: BTreeMap<AccountId, Arc<Account>>,
}

impl Ledger {
    /// Creates accounts `0..count`, all with a zero balance.
    pub fn with_accounts(count: u32) -> Self {
        (0..count).map(AccountId).collect()
    }

    pub fn get(&self, id: AccountId) -> Option<&Arc<Account>> {
        self.accounts.get(&id)
    }

    /// Routes `transaction` to its account. See [`Account::apply`].
    ///
    /// # Errors
    ///
    /// - [`TransactionError::UnknownAccount`] - no account has the transaction's id.
    /// - [`TransactionError::Cancelled`] - `cancel` fired while the withdrawal waited.
    pub fn apply(
        &self,
        transaction: &Transaction,
        clerk: ClerkId,
        cancel: &CancellationToken,
        events: &dyn EventSink,
    ) -> Result<Decimal, TransactionError> {
        let account = self
            .get(transaction.account_id())
            .ok_or(TransactionError::UnknownAccount(transaction.account_id()))?;
        account.apply(transaction, clerk, cancel, events)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Accounts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Account>> {
        self.accounts.values()
    }

    /// Balance snapshot of every account, in id order.
    ///
    /// Each balance is read under its own lock; the snapshot as a whole is
    /// only consistent once clerks have stopped.
    pub fn balances(&self) -> Vec<(AccountId, Decimal)> {
        self.iter().map(|account| (account.id(), account.balance())).collect()
    }

    pub fn total(&self) -> Decimal {
        self.iter().map(|account| account.balance()).sum()
    }

    /// Total number of transactions applied across all accounts.
    pub fn applied_count(&self) -> u64 {
        self.iter().map(|account| account.applied_count()).sum()
    }

    /// Clerks blocked on a withdrawal that their account cannot cover yet.
    pub fn stuck_clerks(&self) -> Vec<ClerkId> {
        self.iter().flat_map(|account| account.stuck_clerks()).collect()
    }
}

impl FromIterator<AccountId> for Ledger {
    fn from_iter<I: IntoIterator<Item = AccountId>>(ids: I) -> Self {
        Self {
            accounts: ids
                .into_iter()
                .map(|id| (id, Arc::new(Account::new(id))))
                .collect(),
        }
    }
}
