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

//! Error types for transaction processing and simulation setup.

use crate::base::AccountId;
use thiserror::Error;

/// Transaction processing errors.
///
/// None of these are fatal to a simulation: clerks drop the offending
/// transaction, or stop working on cancellation, and the others carry on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Transaction names an account that is not in the ledger
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    /// Transaction was handed to an account it does not target
    #[error("transaction for account {found} applied to account {expected}")]
    AccountMismatch { expected: AccountId, found: AccountId },

    /// Cancellation fired while the withdrawal was waiting for funds
    #[error("cancelled while waiting for funds")]
    Cancelled,
}

/// Simulation setup errors.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Configuration cannot produce a runnable simulation
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The OS refused to start a clerk thread
    #[error("failed to spawn clerk thread: {0}")]
    Spawn(#[from] std::io::Error),
}
