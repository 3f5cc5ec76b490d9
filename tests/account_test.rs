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

//! Account public API integration tests.

use ledger_clerks::{
    Account, AccountId, CancellationToken, ChannelSink, ClerkId, Event, Ledger, NullSink,
    Transaction, TransactionError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// === Helper Functions ===

fn make_transaction(account: u32, amount: Decimal) -> Transaction {
    Transaction::new(AccountId(account), amount)
}

fn wait_until_stuck(account: &Account, clerk: ClerkId) {
    for _ in 0..1000 {
        if account.stuck_clerks().contains(&clerk) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("{clerk} never blocked");
}

// === Basic Operations ===

#[test]
fn new_account_is_empty() {
    let account = Account::new(AccountId(4));
    assert_eq!(account.id(), AccountId(4));
    assert_eq!(account.balance(), Decimal::ZERO);
    assert_eq!(account.applied_count(), 0);
    assert!(account.stuck_clerks().is_empty());
}

#[test]
fn deposits_accumulate() {
    let account = Account::new(AccountId(0));
    let cancel = CancellationToken::new();
    for amount in [dec!(10.25), dec!(4.75), dec!(85)] {
        account
            .apply(&make_transaction(0, amount), ClerkId(0), &cancel, &NullSink)
            .unwrap();
    }
    assert_eq!(account.balance(), dec!(100));
    assert_eq!(account.applied_count(), 3);
}

#[test]
fn zero_amount_applies() {
    let account = Account::new(AccountId(0));
    let balance = account
        .apply(
            &make_transaction(0, Decimal::ZERO),
            ClerkId(0),
            &CancellationToken::new(),
            &NullSink,
        )
        .unwrap();
    assert_eq!(balance, Decimal::ZERO);
}

#[test]
fn wrong_account_is_rejected_without_side_effects() {
    let account = Account::new(AccountId(0));
    let result = account.apply(
        &make_transaction(1, dec!(10)),
        ClerkId(0),
        &CancellationToken::new(),
        &NullSink,
    );
    assert!(matches!(result, Err(TransactionError::AccountMismatch { .. })));
    assert_eq!(account.applied_count(), 0);
}

// === Blocking Withdrawals ===

/// A withdrawal queued before the deposit that covers it must wake up once
/// the deposit lands.
#[test]
fn withdrawal_before_deposit_wakes_up() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();

    let withdrawal = {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            account.apply(&make_transaction(0, dec!(-50)), ClerkId(1), &cancel, &NullSink)
        })
    };

    wait_until_stuck(&account, ClerkId(1));

    let depositor = {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            account.apply(&make_transaction(0, dec!(50)), ClerkId(2), &cancel, &NullSink)
        })
    };

    assert_eq!(depositor.join().unwrap(), Ok(dec!(50)));
    assert_eq!(withdrawal.join().unwrap(), Ok(Decimal::ZERO));
    assert_eq!(account.balance(), Decimal::ZERO);
}

#[test]
fn several_waiters_are_released_as_funds_arrive() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();
    let (sink, events) = ChannelSink::new();

    let waiters: Vec<_> = (1..=3)
        .map(|clerk| {
            let account = Arc::clone(&account);
            let cancel = cancel.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                account.apply(&make_transaction(0, dec!(-30)), ClerkId(clerk), &cancel, &sink)
            })
        })
        .collect();

    for clerk in 1..=3 {
        wait_until_stuck(&account, ClerkId(clerk));
    }

    // 100 covers all three withdrawals, in whatever order they wake.
    account
        .apply(&make_transaction(0, dec!(100)), ClerkId(9), &cancel, &sink)
        .unwrap();

    for waiter in waiters {
        assert!(waiter.join().unwrap().is_ok());
    }
    assert_eq!(account.balance(), dec!(10));

    drop(sink);
    let events: Vec<Event> = events.iter().collect();
    let blocked = events
        .iter()
        .filter(|event| matches!(event, Event::WithdrawalBlocked { .. }))
        .count();
    assert_eq!(blocked, 3);
    for event in &events {
        if let Event::TransactionApplied { balance, .. } = event {
            assert!(*balance >= Decimal::ZERO);
        }
    }
}

#[test]
fn only_affordable_waiter_proceeds() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();

    let small = {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            account.apply(&make_transaction(0, dec!(-20)), ClerkId(1), &cancel, &NullSink)
        })
    };
    let large = {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            account.apply(&make_transaction(0, dec!(-500)), ClerkId(2), &cancel, &NullSink)
        })
    };

    wait_until_stuck(&account, ClerkId(1));
    wait_until_stuck(&account, ClerkId(2));

    account
        .apply(&make_transaction(0, dec!(25)), ClerkId(3), &cancel, &NullSink)
        .unwrap();

    assert_eq!(small.join().unwrap(), Ok(dec!(5)));
    assert_eq!(account.stuck_clerks(), vec![ClerkId(2)]);

    cancel.cancel();
    assert_eq!(large.join().unwrap(), Err(TransactionError::Cancelled));
    assert_eq!(account.balance(), dec!(5));
}

#[test]
fn ledger_cancellation_reaches_every_account() {
    let ledger = Arc::new(Ledger::with_accounts(3));
    let cancel = CancellationToken::new();

    let waiters: Vec<_> = (0..3)
        .map(|n| {
            let ledger = Arc::clone(&ledger);
            let cancel = cancel.clone();
            thread::spawn(move || {
                ledger.get(AccountId(n)).unwrap().apply(
                    &make_transaction(n, dec!(-1)),
                    ClerkId(n),
                    &cancel,
                    &NullSink,
                )
            })
        })
        .collect();

    for n in 0..3 {
        wait_until_stuck(ledger.get(AccountId(n)).unwrap(), ClerkId(n));
    }
    assert_eq!(ledger.stuck_clerks().len(), 3);

    cancel.cancel();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Err(TransactionError::Cancelled));
    }
    assert!(ledger.stuck_clerks().is_empty());
    assert_eq!(ledger.total(), Decimal::ZERO);
}

#[test]
fn cancel_alone_wakes_a_blocked_withdrawal() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();
    let (result_tx, result_rx) = crossbeam::channel::bounded(1);

    {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let result = account.apply(&make_transaction(0, dec!(-10)), ClerkId(1), &cancel, &NullSink);
            let _ = result_tx.send(result);
        });
    }

    wait_until_stuck(&account, ClerkId(1));
    cancel.cancel();

    let result = result_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("withdrawal still blocked after cancellation");
    assert_eq!(result, Err(TransactionError::Cancelled));
    assert_eq!(account.balance(), Decimal::ZERO);
    assert_eq!(account.applied_count(), 0);
}

#[test]
fn ledger_apply_reports_unknown_account() {
    let ledger = Ledger::with_accounts(1);
    let result = ledger.apply(
        &make_transaction(3, dec!(1)),
        ClerkId(0),
        &CancellationToken::new(),
        &NullSink,
    );
    assert_eq!(result, Err(TransactionError::UnknownAccount(AccountId(3))));
}

// === Concurrency Tests ===

#[test]
fn concurrent_deposits_are_serialized() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..10)
        .map(|clerk| {
            let account = Arc::clone(&account);
            let cancel = cancel.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    account
                        .apply(&make_transaction(0, dec!(1)), ClerkId(clerk), &cancel, &NullSink)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(account.balance(), dec!(1000));
    assert_eq!(account.applied_count(), 1000);
}

#[test]
fn balanced_deposits_and_withdrawals_settle_at_zero() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();

    let withdrawers: Vec<_> = (0..5)
        .map(|clerk| {
            let account = Arc::clone(&account);
            let cancel = cancel.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    account
                        .apply(&make_transaction(0, dec!(-2)), ClerkId(clerk), &cancel, &NullSink)
                        .unwrap();
                }
            })
        })
        .collect();

    let depositors: Vec<_> = (5..10)
        .map(|clerk| {
            let account = Arc::clone(&account);
            let cancel = cancel.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    account
                        .apply(&make_transaction(0, dec!(1)), ClerkId(clerk), &cancel, &NullSink)
                        .unwrap();
                    let _ = account.balance();
                }
            })
        })
        .collect();

    for handle in depositors.into_iter().chain(withdrawers) {
        handle.join().unwrap();
    }

    assert_eq!(account.balance(), Decimal::ZERO);
}

#[test]
fn concurrent_reads_never_see_negative_balance() {
    let account = Arc::new(Account::new(AccountId(0)));
    let cancel = CancellationToken::new();

    let writer = {
        let account = Arc::clone(&account);
        let cancel = cancel.clone();
        thread::spawn(move || {
            for i in 0..500 {
                let amount = if i % 2 == 0 { dec!(3) } else { dec!(-3) };
                account
                    .apply(&make_transaction(0, amount), ClerkId(0), &cancel, &NullSink)
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let account = Arc::clone(&account);
            thread::spawn(move || {
                for _ in 0..500 {
                    assert!(account.balance() >= Decimal::ZERO);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(account.balance(), Decimal::ZERO);
}
