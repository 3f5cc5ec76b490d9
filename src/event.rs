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

//! Observable trace of what clerks do.
//!
//! Every registration, deregistration, blocked withdrawal and applied
//! transaction is reported as an [`Event`] to an [`EventSink`]. The binary
//! logs them through [`LogSink`]; tests collect them with [`ChannelSink`].

use crate::base::{AccountId, ClerkId};
use crossbeam::channel::{self, Receiver, Sender};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ClerkRegistered {
        clerk: ClerkId,
    },
    ClerkFinished {
        clerk: ClerkId,
    },
    /// A withdrawal could not be covered and the clerk is now waiting.
    WithdrawalBlocked {
        clerk: ClerkId,
        account: AccountId,
        amount: Decimal,
        balance: Decimal,
    },
    /// `balance` is the balance after the transaction.
    TransactionApplied {
        clerk: ClerkId,
        account: AccountId,
        amount: Decimal,
        balance: Decimal,
    },
    /// The transaction named an account outside the ledger.
    TransactionDropped {
        clerk: ClerkId,
        account: AccountId,
        amount: Decimal,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClerkRegistered { clerk } => write!(f, "{clerk} started working"),
            Self::ClerkFinished { clerk } => write!(f, "{clerk} finished working"),
            Self::WithdrawalBlocked {
                clerk,
                account,
                amount,
                balance,
            } => write!(
                f,
                "{clerk} is stuck trying to withdraw {} from account {account} (balance: {balance})",
                -*amount
            ),
            Self::TransactionApplied {
                clerk,
                account,
                amount,
                balance,
            } => write!(
                f,
                "{clerk} processed: account {account} amount: {amount} (new balance: {balance})"
            ),
            Self::TransactionDropped {
                clerk,
                account,
                amount,
            } => write!(f, "{clerk} skipped {amount} for unknown account {account}"),
        }
    }
}

/// Destination for [`Event`]s.
///
/// Accounts emit while holding their lock, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match event {
            Event::WithdrawalBlocked { .. } => log::warn!("{event}"),
            Event::TransactionDropped { .. } => log::debug!("{event}"),
            _ => log::info!("{event}"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sends events down an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Event>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that collects its events.
    pub fn new() -> (Self, Receiver<Event>) {
        let (sender, receiver) = channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}
