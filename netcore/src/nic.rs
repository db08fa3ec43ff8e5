// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The NIC driver contract (§6).
//!
//! Ethernet NIC and PHY drivers are out of scope for this crate: we only
//! specify the interface they must implement so the socket table, ARP and
//! the multicast filters can drive them. A concrete driver lives in its own
//! crate, runs under interrupts, and must never acquire the net mutex
//! itself -- it communicates upward by posting to the receive callback
//! (`process_packet`) and downward by implementing `send_packet` and
//! `update_mac_addr_filter`.

use crate::addr::MacAddr;
use crate::buffer::{NetBuffer, TxAncillary};
use crate::error::Result;

/// Flags describing a NIC's static capabilities, handed back from `init`.
#[derive(Copy, Clone, Debug, Default)]
pub struct NicFlags {
    pub mac_type: MacType,
    pub mtu: u16,
    /// True if the driver surfaces link up/down itself (via `event_handler`)
    /// rather than requiring the core to poll PHY registers.
    pub native_link_state: bool,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MacType {
    #[default]
    Ethernet,
    Other(u16),
}

/// One entry in the MAC address acceptance filter the core hands down to
/// `update_mac_addr_filter`. `ref_count` lets several joined multicast
/// groups that happen to collide on one MAC (the low-23/32-bit aliasing is
/// common) share a single filter slot.
#[derive(Copy, Clone, Debug)]
pub struct MacFilterEntry {
    pub addr: MacAddr,
    pub ref_count: u16,
}

/// The operations a NIC driver must expose to the core. All of them run
/// under the net mutex except `event_handler`, which is the ISR-context
/// entry point and must not take it.
pub trait NicDriver {
    /// One-time hardware bring-up. Called before any other method.
    fn init(&mut self);

    /// Advance link-state/PHY polling state machines by `period_ms`
    /// milliseconds. Only needed if `NicFlags::native_link_state` is false.
    fn tick(&mut self, period_ms: u64);

    fn enable_irq(&mut self);
    fn disable_irq(&mut self);

    /// ISR-context entry point. Must not acquire the net mutex; instead it
    /// should record that RX/TX work is pending and post the global net
    /// event so a task-context loop can call `process_packet` under the
    /// mutex.
    fn event_handler(&mut self);

    /// Transmit `buffer[offset..]`, annotated with `ancillary`. Returns once
    /// the frame has been handed to the hardware (not necessarily sent).
    fn send_packet(
        &mut self,
        buffer: &NetBuffer,
        offset: usize,
        ancillary: TxAncillary,
    ) -> Result<()>;

    /// Install `filter` as the complete multicast/unicast acceptance list.
    /// Called after every multicast filter reconciliation (§4.2).
    fn update_mac_addr_filter(&mut self, filter: &[MacFilterEntry]);

    /// Optional: reconfigure duplex/speed after autonegotiation settles.
    /// Default is a no-op for drivers that don't need it.
    fn update_mac_config(&mut self) {}

    fn write_phy_reg(&mut self, phy_addr: u8, reg: u8, value: u16);
    fn read_phy_reg(&mut self, phy_addr: u8, reg: u8) -> u16;

    fn flags(&self) -> NicFlags;
}

/// Receive-path upcall. A NIC driver's ISR enqueues the work; something
/// running under the net mutex (a task-context poll loop, typically) calls
/// this once per received frame. `process_packet` is provided by the IP
/// layer, which is out of scope here -- this type alias documents the
/// contract the NIC driver depends on.
pub type ProcessPacketFn =
    fn(interface: usize, bytes: &[u8], rx_ancillary: crate::buffer::RxAncillary);
