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

//! Transactions.
//!
//! A [`Transaction`] is a signed amount aimed at a single account. Positive
//! amounts are credits (deposits), negative amounts are debits (withdrawals).
//! Transactions are immutable once built.

use crate::base::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    account_id: AccountId,
    amount: Decimal,
}

impl Transaction {
    pub fn new(account_id: AccountId, amount: Decimal) -> Self {
        Self { account_id, amount }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns `true` for withdrawals.
    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Returns `true` if applying this transaction to `balance` keeps it
    /// non-negative.
    pub fn fits(&self, balance: Decimal) -> bool {
        balance + self.amount >= Decimal::ZERO
    }
}
