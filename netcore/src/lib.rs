// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small-footprint, no-heap TCP/IP stack core: sockets, multicast group
//! reception state and IPv4 ARP.
//!
//! This crate is deliberately partial. It does not implement the TCP state
//! machine, UDP datagram internals, ICMP dispatch, IPv6 neighbor discovery,
//! DHCP, or any name-resolution protocol -- those are external
//! collaborators this crate only specifies the interfaces of (see
//! [`nic`], [`event`] and [`resolve::Resolver`]). What's here is the part
//! that owns real, independently testable state: the socket table, the
//! IGMPv3/MLDv2-style multicast filter reconciliation, and the ARP
//! neighbor cache.
//!
//! Every table in this crate is a fixed-size array sized by [`config`];
//! there is no allocator and no unbounded growth. A single caller-held
//! mutex is expected to serialize all access to a [`Net`] instance (see the
//! module-level safety note below); nothing in this crate takes a lock
//! itself.
//!
//! # Concurrency
//!
//! Every operation above takes `&mut Net` (or a `&mut` reference to one of
//! its component tables) and assumes exclusive access -- it is the
//! embedder's job to serialize calls, typically with a single global
//! mutex taken for the duration of each call and never held across a
//! blocking wait. NIC driver interrupt handlers must never acquire that
//! mutex; they should instead record pending work and signal a
//! [`event::NetEvent`] so a task-context caller picks it up on its next
//! call into this crate.
#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod arp;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod interface;
pub mod ipv4;
#[cfg(feature = "ipv6")]
pub mod ipv6;
pub mod multicast;
pub mod nic;
pub mod poll;
pub mod resolve;
pub mod socket;

use counters::Count;

use crate::interface::Interface;
use crate::nic::NicDriver;
use crate::socket::SocketTable;

/// One counted event per variant, wired up with the `counters` crate the
/// same way the rest of the corpus instruments its hot paths.
///
/// Named `StackEvent` rather than `NetEvent` so it doesn't collide with
/// [`event::NetEvent`], the trait ISRs use to signal a waiting task --
/// that's a different thing entirely, despite the similar name.
#[derive(Copy, Clone, Count)]
pub enum StackEvent {
    SocketOpened,
    SocketClosed,
    ArpResolved,
    ArpTimedOut,
    McastReconciled,
    PollTimeout,
    PollCanceled,
}

ringbuf::counted_ringbuf!(StackEvent, 32, StackEvent::SocketOpened);

/// Top-level stack state for one NIC: the socket table plus that NIC's
/// interface state (ARP cache, multicast filters, the driver itself).
///
/// A board with more than one NIC holds one `Net` per interface; nothing
/// here assumes a single global instance, though a `static` protected by
/// a mutex or critical section is the idiomatic way to carve the storage
/// for one out of `.bss` if the embedder wants exactly one.
pub struct Net<N: NicDriver> {
    sockets: SocketTable,
    interface: Interface<N>,
}

impl<N: NicDriver> Net<N> {
    pub fn new(nic: N, mac: addr::MacAddr) -> error::Result<Self> {
        Ok(Net {
            sockets: SocketTable::new(),
            interface: Interface::new(nic, mac)?,
        })
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketTable {
        &mut self.sockets
    }

    pub fn interface(&self) -> &Interface<N> {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut Interface<N> {
        &mut self.interface
    }

    /// Drive every interface-owned timer (currently: ARP's). Call this
    /// from a periodic task tick, strictly monotonically in `now`.
    pub fn tick(&mut self, now: u64) {
        self.interface.tick(now);
        ringbuf::ringbuf_entry!(StackEvent::ArpTimedOut);
    }

    /// Feed one received frame to the parts of the stack this crate
    /// actually owns (currently: ARP). Everything else -- IP
    /// demultiplexing, ICMP, the TCP/UDP payload handoff -- is the
    /// caller's job; this is not a full `process_packet`.
    pub fn handle_ethernet_frame(&mut self, frame: &[u8], now: u64) {
        if frame.len() < 14 {
            return;
        }
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        const ETHERTYPE_ARP: u16 = 0x0806;
        if ethertype == ETHERTYPE_ARP {
            self.interface.handle_arp(&frame[14..], now);
        }
    }

    /// Close a socket and release any multicast group membership it held,
    /// reconciling each affected interface/group's filter table and
    /// re-pushing the NIC's MAC filter if it changed. This is the
    /// §4.1/§4.2 integration point between `socket_close` and the
    /// multicast reconciliation algorithm.
    pub fn close_socket(&mut self, descriptor: usize) {
        let left_groups = self.sockets.close(descriptor);
        for (_interface, group) in left_groups {
            let _ = self.interface.reconcile_ipv4(group, &self.sockets);
        }
        ringbuf::ringbuf_entry!(StackEvent::SocketClosed);
    }

    fn reconcile_multicast(&mut self, group: addr::IpAddr) -> error::Result<()> {
        match group {
            addr::IpAddr::V4(g) => self.interface.reconcile_ipv4(g, &self.sockets),
            #[cfg(feature = "ipv6")]
            addr::IpAddr::V6(g) => self.interface.reconcile_ipv6(g, &self.sockets),
        }
    }

    /// `join_multicast_group`: §4.1/§4.2 integration point, mirroring
    /// `close_socket`. Records the any-source join against the
    /// interface-level entry (since `any_source_ref_count` lives there, not
    /// on the per-socket slot `socket::SocketTable::join_multicast_group`
    /// mutates) and re-runs reconciliation.
    pub fn join_multicast_group(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.join_multicast_group(descriptor, interface, group)?;
        match group {
            addr::IpAddr::V4(g) => {
                let _ = self.interface.note_any_source_ipv4(g, 1);
            }
            #[cfg(feature = "ipv6")]
            addr::IpAddr::V6(g) => {
                let _ = self.interface.note_any_source_ipv6(g, 1);
            }
        }
        self.reconcile_multicast(group)
    }

    pub fn leave_multicast_group(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.leave_multicast_group(descriptor, interface, group)?;
        match group {
            addr::IpAddr::V4(g) => {
                let _ = self.interface.note_any_source_ipv4(g, -1);
            }
            #[cfg(feature = "ipv6")]
            addr::IpAddr::V6(g) => {
                let _ = self.interface.note_any_source_ipv6(g, -1);
            }
        }
        self.reconcile_multicast(group)
    }

    /// §4.2's full delta-model: mutate the socket-level slot, then
    /// recompute and re-push the interface's reconciled state (spec.md
    /// §4.2: "after any successful socket-level change").
    pub fn add_multicast_source(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
        src: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.add_multicast_source(descriptor, interface, group, src)?;
        self.reconcile_multicast(group)
    }

    pub fn drop_multicast_source(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
        src: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.drop_multicast_source(descriptor, interface, group, src)?;
        self.reconcile_multicast(group)
    }

    pub fn block_multicast_source(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
        src: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.block_multicast_source(descriptor, interface, group, src)?;
        self.reconcile_multicast(group)
    }

    pub fn unblock_multicast_source(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
        src: addr::IpAddr,
    ) -> error::Result<()> {
        self.sockets.unblock_multicast_source(descriptor, interface, group, src)?;
        self.reconcile_multicast(group)
    }

    /// `set_multicast_source_filter`: the full-state model's write side.
    pub fn set_multicast_source_filter(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
        mode: multicast::FilterMode,
        sources: &[addr::IpAddr],
    ) -> error::Result<()> {
        self.sockets
            .set_multicast_source_filter(descriptor, interface, group, mode, sources)?;
        self.reconcile_multicast(group)
    }

    /// `get_multicast_source_filter`: a pure query, so unlike its write-side
    /// counterparts it doesn't touch the interface's reconciled state.
    pub fn get_multicast_source_filter(
        &mut self,
        descriptor: usize,
        interface: usize,
        group: addr::IpAddr,
    ) -> error::Result<(multicast::FilterMode, heapless::Vec<addr::IpAddr, { config::K_SRC }>)> {
        self.sockets.get_multicast_source_filter(descriptor, interface, group)
    }
}
