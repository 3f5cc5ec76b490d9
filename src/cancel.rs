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

//! Cooperative cancellation shared by the simulation and its clerks.
//!
//! A [`CancellationToken`] is observed at three places: the clerk's dispatch
//! loop, the pause between transactions ([`CancellationToken::sleep`]) and the
//! wait for funds inside an account. The last one is blocked on the account's
//! own condition variable, so a waiting withdrawal
//! [`subscribe`](CancellationToken::subscribe)s its account to the token for as
//! long as it waits and gets [`Interrupt::interrupt`]ed when the token fires.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Something blocked on its own condition variable that must be woken when
/// cancellation fires.
///
/// Implementations must take the same mutex their waiters hold while checking
/// [`CancellationToken::is_cancelled`] before broadcasting, otherwise a waiter
/// may miss the wakeup.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    /// Guards cancellable sleeps.
    sleepers: Mutex<()>,
    wakeup: Condvar,
    subscribers: Mutex<Vec<(u64, Arc<dyn Interrupt>)>>,
    next_subscription: AtomicU64,
}

/// A cloneable, one-shot cancellation signal.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fires the token. Wakes every cancellable sleep and interrupts every
    /// subscriber. Calling it again is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let _sleepers = self.inner.sleepers.lock();
            self.inner.wakeup.notify_all();
        }

        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber.interrupt();
        }
    }

    /// Registers a waker to be interrupted on cancellation until the returned
    /// [`Subscription`] is dropped.
    ///
    /// Subscribing does not interrupt a token that has already fired; the
    /// caller checks [`is_cancelled`](Self::is_cancelled) after subscribing,
    /// under the same lock its waiters hold.
    pub fn subscribe(&self, subscriber: Arc<dyn Interrupt>) -> Subscription {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push((id, subscriber));
        Subscription {
            token: Arc::clone(&self.inner),
            id,
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the token fired
    /// (before or during the sleep).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut sleepers = self.inner.sleepers.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self
                .inner
                .wakeup
                .wait_until(&mut sleepers, deadline)
                .timed_out()
            {
                return !self.is_cancelled();
            }
        }
    }
}

/// Keeps a waker subscribed to a [`CancellationToken`]. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    token: Arc<TokenState>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token
            .subscribers
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl Interrupt for CountingWaker {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sleep_runs_to_completion_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_sleep_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::ZERO));
        token.cancel();
        assert!(!token.sleep(Duration::ZERO));
    }

    #[test]
    fn cancel_cuts_a_long_sleep_short() {
        let token = CancellationToken::new();
        let sleeper = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let completed = token.sleep(Duration::from_secs(30));
                (completed, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        token.cancel();

        let (completed, elapsed) = sleeper.join().expect("sleeper panicked");
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn subscribers_are_interrupted_once() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker::default());
        let _subscription = token.subscribe(waker.clone());

        token.cancel();
        token.cancel();

        assert_eq!(waker.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscription_is_not_interrupted() {
        let token = CancellationToken::new();
        let kept = Arc::new(CountingWaker::default());
        let dropped = Arc::new(CountingWaker::default());
        let _kept = token.subscribe(kept.clone());
        drop(token.subscribe(dropped.clone()));
        assert_eq!(token.subscriber_count(), 1);

        token.cancel();

        assert_eq!(kept.0.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_subscriptions_do_not_accumulate() {
        let token = CancellationToken::new();
        let waker = Arc::new(CountingWaker::default());
        for _ in 0..100 {
            let _subscription = token.subscribe(waker.clone());
        }
        assert_eq!(token.subscriber_count(), 0);
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
