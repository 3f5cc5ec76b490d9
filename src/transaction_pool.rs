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

//! Shared pool of pending transactions.
//!
//! The pool is the only work source for clerks. It hands out transactions in
//! FIFO order, at most once each, and keeps a registry of the clerks that are
//! currently working. Every operation takes one short-lived lock and never
//! waits: an empty pool is an ordinary answer, not a reason to block.

use crate::Transaction;
use crate::base::ClerkId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
struct PoolState {
    pending: VecDeque<Transaction>,
    active: HashSet<ClerkId>,
}

/// A thread-safe transaction queue with an active-clerk registry.
#[derive(Debug, Default)]
pub struct TransactionPool {
    inner: Mutex<PoolState>,
}

impl TransactionPool {
    /// Creates a pool seeded with `transactions`, dispatched in iteration order.
    pub fn new(transactions: impl IntoIterator<Item = Transaction>) -> Self {
        Self {
            inner: Mutex::new(PoolState {
                pending: transactions.into_iter().collect(),
                active: HashSet::new(),
            }),
        }
    }

    /// Removes and returns the oldest pending transaction, or `None` once the
    /// pool is drained.
    pub fn try_dequeue(&self) -> Option<Transaction> {
        self.inner.lock().pending.pop_front()
    }

    /// Marks `clerk` as working. Returns `false` if it was already registered.
    pub fn register_clerk(&self, clerk: ClerkId) -> bool {
        self.inner.lock().active.insert(clerk)
    }

    /// Marks `clerk` as done. Returns `false` if it was not registered, in
    /// which case nothing changes.
    pub fn finish_clerk(&self, clerk: ClerkId) -> bool {
        self.inner.lock().active.remove(&clerk)
    }

    pub fn remaining(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Snapshot of the registered clerks, sorted by id.
    pub fn active_clerks(&self) -> Vec<ClerkId> {
        let mut active: Vec<ClerkId> = self.inner.lock().active.iter().copied().collect();
        active.sort();
        active
    }
}
