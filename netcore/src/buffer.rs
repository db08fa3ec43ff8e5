// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scatter/gather byte container passed between the socket layer, ARP
//! and the NIC driver.
//!
//! This is deliberately thin: a fixed-capacity owned byte vector plus the
//! per-packet ancillary data (TTL, ToS, VLAN tags, ...) that rides alongside
//! it. Real allocation, fragmentation and reassembly live in the IP layer,
//! which is out of scope for this crate.

use heapless::Vec;

/// Largest Ethernet frame this build will ever hand to a NIC driver.
pub const MAX_FRAME: usize = 1514;

/// An owned, fixed-capacity frame buffer.
///
/// `ArpCacheEntry`'s pending-packet queue and the socket send/receive path
/// both move these by value; there is exactly one owner at any time.
#[derive(Clone)]
pub struct NetBuffer {
    data: Vec<u8, MAX_FRAME>,
}

impl NetBuffer {
    pub fn new() -> Self {
        NetBuffer { data: Vec::new() }
    }

    pub fn from_slice(bytes: &[u8]) -> crate::error::Result<Self> {
        let mut data = Vec::new();
        data.extend_from_slice(bytes)
            .map_err(|_| crate::error::NetError::InvalidLength)?;
        Ok(NetBuffer { data })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for NetBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-packet metadata that accompanies a buffer on its way to or from the
/// NIC. Fields not meaningful to a given send are left at their default.
#[derive(Copy, Clone, Debug, Default)]
pub struct TxAncillary {
    pub ttl: u8,
    pub tos: u8,
    pub vlan_tag: Option<VlanTag>,
}

#[derive(Copy, Clone, Debug)]
pub struct VlanTag {
    pub vid: u16,
    pub pcp: u8,
    pub dei: bool,
}

/// Metadata a NIC driver attaches to a received frame before handing it to
/// `process_packet`.
#[derive(Copy, Clone, Debug, Default)]
pub struct RxAncillary {
    pub timestamp: u64,
}

/// A packet held in an ARP entry's pending queue, per
/// `ArpCacheEntry::queue`.
pub struct QueuedPacket {
    pub buffer: NetBuffer,
    pub offset: usize,
    pub tx_ancillary: TxAncillary,
}
