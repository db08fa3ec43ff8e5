// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The error taxonomy shared by every API in this crate.
//!
//! Every fallible operation returns a `Result<_, NetError>`. There are no
//! panics on the hot path; the only paths that can panic are the
//! first-mover static initializers, which are only ever run once at startup.

use core::fmt;

/// Kinds of failure that socket, multicast and ARP operations can report.
///
/// Variants map directly onto the error taxonomy in the design document;
/// keep the two in sync if you add one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NetError {
    /// Nil pointers, out-of-range numeric fields (DSCP >= 64, PCP >= 8,
    /// a zero keep-alive parameter, too many multicast sources, ...).
    InvalidParameter,
    /// The operation isn't permitted for this socket's type or state.
    InvalidSocket,
    /// An address isn't of the kind the operation requires, or an inbound
    /// multicast datagram didn't match any accepting filter.
    InvalidAddress,
    /// The build excludes this feature (e.g. IPv6 compiled out).
    NotImplemented,
    /// A fixed-size table (sockets, multicast groups, ARP cache) is full.
    NoResource,
    /// A buffer couldn't be obtained.
    OutOfMemory,
    /// The receive queue is empty.
    BufferEmpty,
    /// Wire bytes didn't parse.
    InvalidPacket,
    /// A frame was too large, or too short, for the operation.
    InvalidLength,
    /// A blocking call exceeded its timeout.
    Timeout,
    /// `poll`'s external event fired before any socket event or timeout.
    WaitCanceled,
    /// ARP resolution was kicked off; retry the send once the entry reaches
    /// `Reachable`.
    InProgress,
    /// No ARP or multicast entry exists where one was required.
    AddressNotFound,
    /// Asked to enqueue a packet against an ARP entry that isn't
    /// `Incomplete`.
    UnexpectedState,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetError::InvalidParameter => "invalid parameter",
            NetError::InvalidSocket => "invalid socket",
            NetError::InvalidAddress => "invalid address",
            NetError::NotImplemented => "not implemented",
            NetError::NoResource => "no resource",
            NetError::OutOfMemory => "out of memory",
            NetError::BufferEmpty => "buffer empty",
            NetError::InvalidPacket => "invalid packet",
            NetError::InvalidLength => "invalid length",
            NetError::Timeout => "timeout",
            NetError::WaitCanceled => "wait canceled",
            NetError::InProgress => "in progress",
            NetError::AddressNotFound => "address not found",
            NetError::UnexpectedState => "unexpected state",
        };
        f.write_str(s)
    }
}

pub type Result<T> = core::result::Result<T, NetError>;
