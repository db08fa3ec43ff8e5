// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! System-time and signalable-event contracts (component A).
//!
//! The concrete clock and event primitives are system collaborators --
//! under Hubris they'd be a task's notification bits and `sys_get_timer`;
//! under another kernel they might be a condvar and a monotonic clock. This
//! crate only depends on the two traits below, plus the assumption (spelled
//! out in §5) that ISRs never acquire the net mutex and instead signal an
//! event to wake a task-context waiter.

/// A monotonic millisecond clock. ARP's timer tick and every blocking
/// socket call compare deadlines taken from this.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// A signalable, subscribable event.
///
/// `Socket::subscribers` holds references to up to `MAX_SUBSCRIBERS`
/// `NetEvent` implementors; when the socket's `event_flags` changes, every
/// subscriber whose registered mask intersects the new flags is signaled.
/// This indirection is what lets an ISR-context producer (a NIC driver's
/// receive callback) wake a task-context `poll` waiter without the producer
/// ever touching the net mutex itself: the signal is just a doorbell.
pub trait NetEvent: Sync {
    /// Wake any waiter blocked in `wait`.
    fn signal(&self);

    /// Block the calling task until `signal` is called or `timeout_ms`
    /// elapses (`None` blocks forever). Returns `true` if woken by a
    /// signal, `false` on timeout.
    fn wait(&self, timeout_ms: Option<u64>) -> bool;

    /// Clear any latched signal so a subsequent `wait` blocks again.
    fn reset(&self);
}

/// One registered `(event, mask)` pair inside a socket's subscriber list.
#[derive(Copy, Clone)]
pub struct Subscription {
    pub event: &'static dyn NetEvent,
    pub mask: u32,
}
