// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `poll` (component H), §4.4.
//!
//! Waits for any of a fixed-size list of socket descriptors to become
//! ready, or for a caller-supplied external event to fire, or for a
//! timeout. Follows the sequence required by §4.4 exactly: clear stale
//! flags, subscribe every descriptor before blocking (so no wakeup can be
//! missed between checking and subscribing), wait once, then always
//! unsubscribe and reset on every exit path, success or not.

use heapless::Vec;

use crate::error::{NetError, Result};
use crate::event::NetEvent;
use crate::socket::SocketTable;

/// One descriptor being polled and the events the caller cares about on it.
#[derive(Copy, Clone, Debug)]
pub struct PollDescriptor {
    pub socket: usize,
    pub events: u32,
}

/// What woke `poll`, and which of the requested events fired on each
/// descriptor.
#[derive(Copy, Clone, Debug, Default)]
pub struct PollResult {
    pub revents: u32,
}

/// Maximum descriptors a single `poll` call can wait on at once.
pub const MAX_POLL_DESCRIPTORS: usize = 8;

/// §4.4: wait for any of `descriptors` to report one of their requested
/// `events`, or for `external_event` to fire, or for `timeout_ms` to
/// elapse. `wait_event` is the event the caller's task actually blocks on
/// (its `wait` method is what does the blocking); subscribing every
/// socket's matching mask to it is what lets any of them wake it.
///
/// Returns the per-descriptor flags that were set when `poll` woke, or
/// `NetError::Timeout` / `NetError::WaitCanceled`.
pub fn poll(
    sockets: &mut SocketTable,
    descriptors: &[PollDescriptor],
    wait_event: &'static dyn NetEvent,
    external_event: Option<&'static dyn NetEvent>,
    timeout_ms: Option<u64>,
) -> Result<Vec<PollResult, MAX_POLL_DESCRIPTORS>> {
    if descriptors.is_empty() || descriptors.len() > MAX_POLL_DESCRIPTORS {
        return Err(NetError::InvalidParameter);
    }

    wait_event.reset();
    if let Some(ext) = external_event {
        ext.reset();
    }

    // Subscribe every descriptor's socket to `wait_event` before checking
    // anything, so a readiness change between the check and the wait can
    // never be missed.
    let mut slots: Vec<(usize, usize), MAX_POLL_DESCRIPTORS> = Vec::new();
    for d in descriptors {
        let subscribed = match sockets.get_mut(d.socket) {
            Some(sock) => sock.subscribe(wait_event, d.events).and_then(|slot| {
                slots
                    .push((d.socket, slot))
                    .map_err(|_| NetError::NoResource)
            }),
            None => Err(NetError::InvalidSocket),
        };
        if let Err(e) = subscribed {
            unsubscribe_all(sockets, &slots);
            return Err(e);
        }
    }

    // A descriptor might already be ready (set before we subscribed);
    // check before blocking so we don't sleep past work that's already
    // there.
    let mut results = collect_results(sockets, descriptors);
    let already_ready = results.iter().any(|r| r.revents != 0);

    let outcome = if already_ready {
        Ok(())
    } else {
        let woken = wait_event.wait(timeout_ms);
        if !woken {
            ringbuf::ringbuf_entry_root!(crate::StackEvent::PollTimeout);
            Err(NetError::Timeout)
        } else if let Some(ext) = external_event {
            if ext.wait(Some(0)) {
                ringbuf::ringbuf_entry_root!(crate::StackEvent::PollCanceled);
                Err(NetError::WaitCanceled)
            } else {
                Ok(())
            }
        } else {
            Ok(())
        }
    };

    if outcome.is_ok() {
        results = collect_results(sockets, descriptors);
    }

    unsubscribe_all(sockets, &slots);
    wait_event.reset();
    if let Some(ext) = external_event {
        ext.reset();
    }

    outcome.map(|()| results)
}

fn collect_results(
    sockets: &SocketTable,
    descriptors: &[PollDescriptor],
) -> Vec<PollResult, MAX_POLL_DESCRIPTORS> {
    let mut out = Vec::new();
    for d in descriptors {
        let revents = sockets.poll_flags(d.socket, d.events).unwrap_or(0);
        let _ = out.push(PollResult { revents });
    }
    out
}

fn unsubscribe_all(sockets: &mut SocketTable, slots: &[(usize, usize)]) {
    for &(socket, slot) in slots {
        if let Some(sock) = sockets.get_mut(socket) {
            sock.unsubscribe(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_SUBSCRIBERS;
    use crate::socket::{events, SocketType};

    struct NeverWake;
    impl NetEvent for NeverWake {
        fn signal(&self) {}
        fn wait(&self, _timeout_ms: Option<u64>) -> bool {
            false
        }
        fn reset(&self) {}
    }
    static NEVER_WAKE: NeverWake = NeverWake;

    struct AlwaysWake;
    impl NetEvent for AlwaysWake {
        fn signal(&self) {}
        fn wait(&self, _timeout_ms: Option<u64>) -> bool {
            true
        }
        fn reset(&self) {}
    }
    static ALWAYS_WAKE: AlwaysWake = AlwaysWake;

    struct AlwaysFired;
    impl NetEvent for AlwaysFired {
        fn signal(&self) {}
        fn wait(&self, _timeout_ms: Option<u64>) -> bool {
            true
        }
        fn reset(&self) {}
    }
    static ALWAYS_FIRED: AlwaysFired = AlwaysFired;

    #[test]
    fn poll_empty_descriptor_list_is_invalid() {
        let mut sockets = SocketTable::new();
        let err = poll(&mut sockets, &[], &NEVER_WAKE, None, Some(0)).unwrap_err();
        assert_eq!(err, NetError::InvalidParameter);
    }

    #[test]
    fn poll_returns_immediately_when_already_ready() {
        let mut sockets = SocketTable::new();
        let d = sockets.open(SocketType::Dgram, 0).unwrap();
        sockets.get_mut(d).unwrap().post_event(events::READABLE);

        let descriptors = [PollDescriptor { socket: d, events: events::READABLE }];
        let results = poll(&mut sockets, &descriptors, &NEVER_WAKE, None, Some(0)).unwrap();
        assert_eq!(results[0].revents, events::READABLE);
    }

    #[test]
    fn poll_times_out_and_unsubscribes_every_descriptor() {
        let mut sockets = SocketTable::new();
        let d = sockets.open(SocketType::Dgram, 0).unwrap();

        let descriptors = [PollDescriptor { socket: d, events: events::READABLE }];
        let err = poll(&mut sockets, &descriptors, &NEVER_WAKE, None, Some(0)).unwrap_err();
        assert_eq!(err, NetError::Timeout);

        // If `poll` had leaked a subscription slot, one of these would fail
        // with `NoResource` before the loop completes.
        let sock = sockets.get_mut(d).unwrap();
        for _ in 0..MAX_SUBSCRIBERS {
            sock.subscribe(&NEVER_WAKE, events::READABLE).unwrap();
        }
    }

    #[test]
    fn scenario_poll_with_external_cancel() {
        let mut sockets = SocketTable::new();
        let d = sockets.open(SocketType::Dgram, 0).unwrap();

        let descriptors = [PollDescriptor { socket: d, events: events::READABLE }];
        let err = poll(
            &mut sockets,
            &descriptors,
            &ALWAYS_WAKE,
            Some(&ALWAYS_FIRED),
            Some(1_000),
        )
        .unwrap_err();
        assert_eq!(err, NetError::WaitCanceled);

        let sock = sockets.get_mut(d).unwrap();
        for _ in 0..MAX_SUBSCRIBERS {
            sock.subscribe(&NEVER_WAKE, events::READABLE).unwrap();
        }
    }

    #[test]
    fn poll_rejects_unknown_descriptor() {
        let mut sockets = SocketTable::new();
        let descriptors = [PollDescriptor { socket: 0, events: events::READABLE }];
        let err = poll(&mut sockets, &descriptors, &NEVER_WAKE, None, Some(0)).unwrap_err();
        assert_eq!(err, NetError::InvalidSocket);
    }
}
