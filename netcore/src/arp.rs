// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ARP for IPv4 (component D), §4.3.
//!
//! A bounded neighbor cache with a five-state dynamic lifecycle plus a
//! `Permanent` state for static entries, queued pending-packet
//! retransmission, and the request/reply/probe wire format.

use heapless::Deque;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::buffer::{NetBuffer, QueuedPacket, TxAncillary};
use crate::config::{
    ARP_DELAY_FIRST_PROBE_TIME_MS, ARP_MAX_PROBES, ARP_MAX_REQUESTS,
    ARP_PROBE_TIMEOUT_MS, ARP_REACHABLE_TIME_MS, ARP_REQUEST_TIMEOUT_MS,
    N_ARP, Q_ARP,
};
use crate::error::{NetError, Result};

/// §4.3 state machine states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArpState {
    /// Free slot.
    None,
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Probe,
    /// Created only by `add_static_entry`; immune to dynamic discovery and
    /// to timer-driven transitions.
    Permanent,
}

/// Hardware type / protocol type / opcode constants, per §6.
mod wire {
    pub const HTYPE_ETHERNET: u16 = 0x0001;
    pub const PTYPE_IPV4: u16 = 0x0800;
    pub const HLEN: u8 = 6;
    pub const PLEN: u8 = 4;
    pub const OP_REQUEST: u16 = 1;
    pub const OP_REPLY: u16 = 2;
    pub const PACKET_LEN: usize = 28;
}

/// A parsed ARP packet. Request and reply share this shape; `op`
/// distinguishes them.
#[derive(Copy, Clone, Debug)]
pub struct ArpPacket {
    pub op: u16,
    pub sender_hw: MacAddr,
    pub sender_proto: Ipv4Addr,
    pub target_hw: MacAddr,
    pub target_proto: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an Ethernet-framed ARP packet. Returns `None` for anything
    /// that isn't Ethernet/IPv4 ARP with matching address lengths -- per
    /// §4.3, such packets are dropped silently by the caller.
    pub fn parse(bytes: &[u8]) -> Option<ArpPacket> {
        if bytes.len() < wire::PACKET_LEN {
            return None;
        }
        let htype = u16::from_be_bytes([bytes[0], bytes[1]]);
        let ptype = u16::from_be_bytes([bytes[2], bytes[3]]);
        let hlen = bytes[4];
        let plen = bytes[5];
        let op = u16::from_be_bytes([bytes[6], bytes[7]]);
        if htype != wire::HTYPE_ETHERNET
            || ptype != wire::PTYPE_IPV4
            || hlen != wire::HLEN
            || plen != wire::PLEN
        {
            return None;
        }
        let mut sha = [0u8; 6];
        sha.copy_from_slice(&bytes[8..14]);
        let mut spa = [0u8; 4];
        spa.copy_from_slice(&bytes[14..18]);
        let mut tha = [0u8; 6];
        tha.copy_from_slice(&bytes[18..24]);
        let mut tpa = [0u8; 4];
        tpa.copy_from_slice(&bytes[24..28]);
        Some(ArpPacket {
            op,
            sender_hw: MacAddr(sha),
            sender_proto: Ipv4Addr(spa),
            target_hw: MacAddr(tha),
            target_proto: Ipv4Addr(tpa),
        })
    }

    pub fn encode(&self) -> [u8; wire::PACKET_LEN] {
        let mut out = [0u8; wire::PACKET_LEN];
        out[0..2].copy_from_slice(&wire::HTYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&wire::PTYPE_IPV4.to_be_bytes());
        out[4] = wire::HLEN;
        out[5] = wire::PLEN;
        out[6..8].copy_from_slice(&self.op.to_be_bytes());
        out[8..14].copy_from_slice(&self.sender_hw.0);
        out[14..18].copy_from_slice(&self.sender_proto.0);
        out[18..24].copy_from_slice(&self.target_hw.0);
        out[24..28].copy_from_slice(&self.target_proto.0);
        out
    }

    fn is_probe(&self) -> bool {
        self.sender_proto.is_unspecified()
    }
}

/// One ARP cache entry, per §3.
pub struct ArpCacheEntry {
    ip_addr: Ipv4Addr,
    mac_addr: MacAddr,
    state: ArpState,
    timestamp: u64,
    timeout: u64,
    retransmit_count: u8,
    queue: Deque<QueuedPacket, Q_ARP>,
}

impl ArpCacheEntry {
    const fn free() -> Self {
        ArpCacheEntry {
            ip_addr: Ipv4Addr([0; 4]),
            mac_addr: MacAddr([0; 6]),
            state: ArpState::None,
            timestamp: 0,
            timeout: 0,
            retransmit_count: 0,
            queue: Deque::new(),
        }
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        self.ip_addr
    }

    pub fn mac_addr(&self) -> MacAddr {
        self.mac_addr
    }

    pub fn state(&self) -> ArpState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued packet without sending it (used on transition to
    /// `None`).
    fn drop_queue(&mut self) {
        while self.queue.pop_front().is_some() {}
    }
}

/// An action the cache needs its caller to perform in response to a state
/// transition: transmit a wire packet, or flush/drop the pending queue.
/// Kept as data (rather than calling a NIC trait method directly from
/// inside the cache) so the cache itself stays free of any dependency on
/// `NicDriver`, matching the "interfaces own their ARP cache" pointer-cycle
/// resolution in the design notes.
#[derive(Copy, Clone)]
pub enum ArpAction {
    /// Transmit `packet` as a broadcast (requests) or to `dest` (replies,
    /// unicast probes).
    Transmit { packet: [u8; wire::PACKET_LEN], dest: MacAddr },
    /// Send every packet queued for `ip` to `mac`, then clear the queue.
    FlushQueue { ip: Ipv4Addr, mac: MacAddr },
}

/// Bounded neighbor cache for one interface.
pub struct ArpCache {
    entries: [ArpCacheEntry; N_ARP],
    local_ip: Ipv4Addr,
    local_mac: MacAddr,
    enabled: bool,
}

impl ArpCache {
    pub fn new(local_ip: Ipv4Addr, local_mac: MacAddr) -> Self {
        ArpCache {
            entries: core::array::from_fn(|_| ArpCacheEntry::free()),
            local_ip,
            local_mac,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArpCacheEntry> {
        self.entries.iter().filter(|e| e.state != ArpState::None)
    }

    fn find(&self, ip: Ipv4Addr) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.state != ArpState::None && e.ip_addr == ip)
    }

    /// §4.3 "Eviction on exhaustion": return a free slot, or recycle the
    /// non-`Permanent` entry with the oldest `timestamp`. Fails only if
    /// every slot is `Permanent`.
    fn create_entry(&mut self, ip: Ipv4Addr, now: u64) -> Result<usize> {
        if let Some(i) = self.entries.iter().position(|e| e.state == ArpState::None) {
            return Ok(i);
        }
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state != ArpState::Permanent)
            .min_by_key(|(_, e)| e.timestamp)
            .map(|(i, _)| i)
            .ok_or(NetError::NoResource)?;
        self.entries[victim].drop_queue();
        Ok(victim)
    }

    /// `resolve(ip) -> Result<MacAddr>`. Returns the MAC immediately if the
    /// entry is already usable, kicks off discovery and returns
    /// `InProgress` otherwise.
    pub fn resolve(&mut self, ip: Ipv4Addr, now: u64, actions: &mut impl FnMut(ArpAction)) -> Result<MacAddr> {
        if !self.enabled {
            return Err(NetError::NotImplemented);
        }
        if let Some(i) = self.find(ip) {
            return self.touch_for_send(i, now);
        }
        let i = self.create_entry(ip, now)?;
        self.entries[i] = ArpCacheEntry {
            ip_addr: ip,
            mac_addr: MacAddr::UNSPECIFIED,
            state: ArpState::Incomplete,
            timestamp: now,
            timeout: ARP_REQUEST_TIMEOUT_MS,
            retransmit_count: 0,
            queue: Deque::new(),
        };
        actions(ArpAction::Transmit {
            packet: self.request_packet(ip),
            dest: MacAddr::BROADCAST,
        });
        Err(NetError::InProgress)
    }

    /// Outgoing use of an already-resolved entry: returns the MAC, and if
    /// the entry was `Stale`, moves it to `Delay` per §4.3.
    fn touch_for_send(&mut self, i: usize, now: u64) -> Result<MacAddr> {
        match self.entries[i].state {
            ArpState::Incomplete => Err(NetError::InProgress),
            ArpState::Stale => {
                self.entries[i].state = ArpState::Delay;
                self.entries[i].timestamp = now;
                self.entries[i].timeout = ARP_DELAY_FIRST_PROBE_TIME_MS;
                Ok(self.entries[i].mac_addr)
            }
            ArpState::Reachable | ArpState::Delay | ArpState::Probe | ArpState::Permanent => {
                Ok(self.entries[i].mac_addr)
            }
            ArpState::None => unreachable!("find() only returns live entries"),
        }
    }

    /// Queue `buffer` against `ip`'s (necessarily `Incomplete`) entry.
    /// On overflow, the oldest queued packet is dropped.
    pub fn enqueue_packet(
        &mut self,
        ip: Ipv4Addr,
        buffer: NetBuffer,
        offset: usize,
        tx_ancillary: TxAncillary,
    ) -> Result<()> {
        let i = self.find(ip).ok_or(NetError::AddressNotFound)?;
        if self.entries[i].state != ArpState::Incomplete {
            return Err(NetError::UnexpectedState);
        }
        let q = &mut self.entries[i].queue;
        if q.len() == q.capacity() {
            q.pop_front();
        }
        q.push_back(QueuedPacket { buffer, offset, tx_ancillary })
            .map_err(|_| NetError::NoResource)?;
        Ok(())
    }

    /// Adds a static, non-expiring entry. Evicts per the same policy as
    /// dynamic resolution if the cache is full.
    pub fn add_static_entry(&mut self, ip: Ipv4Addr, mac: MacAddr, now: u64) -> Result<()> {
        let i = match self.find(ip) {
            Some(i) => i,
            None => self.create_entry(ip, now)?,
        };
        self.entries[i] = ArpCacheEntry {
            ip_addr: ip,
            mac_addr: mac,
            state: ArpState::Permanent,
            timestamp: now,
            timeout: 0,
            retransmit_count: 0,
            queue: Deque::new(),
        };
        Ok(())
    }

    /// Explicit removal of a (presumably `Permanent`) entry.
    pub fn remove_entry(&mut self, ip: Ipv4Addr) -> Result<()> {
        let i = self.find(ip).ok_or(NetError::AddressNotFound)?;
        self.entries[i].drop_queue();
        self.entries[i] = ArpCacheEntry::free();
        Ok(())
    }

    fn request_packet(&self, target: Ipv4Addr) -> [u8; wire::PACKET_LEN] {
        ArpPacket {
            op: wire::OP_REQUEST,
            sender_hw: self.local_mac,
            sender_proto: self.local_ip,
            target_hw: MacAddr::UNSPECIFIED,
            target_proto: target,
        }
        .encode()
    }

    fn probe_packet(&self, target: Ipv4Addr) -> [u8; wire::PACKET_LEN] {
        ArpPacket {
            op: wire::OP_REQUEST,
            sender_hw: self.local_mac,
            sender_proto: Ipv4Addr::UNSPECIFIED,
            target_hw: MacAddr::UNSPECIFIED,
            target_proto: target,
        }
        .encode()
    }

    /// The periodic timer tick, §4.3/§5: must be invoked strictly after
    /// real time has elapsed (never twice for the same instant). Drives
    /// every timed transition; `actions` receives any packets that need
    /// transmitting or queues that need flushing as a result.
    pub fn tick(&mut self, now: u64, actions: &mut impl FnMut(ArpAction)) {
        for i in 0..self.entries.len() {
            let state = self.entries[i].state;
            let due = self.entries[i].timestamp + self.entries[i].timeout;
            match state {
                ArpState::None | ArpState::Permanent => {}
                ArpState::Incomplete if now >= due => {
                    if self.entries[i].retransmit_count + 1 < ARP_MAX_REQUESTS {
                        self.entries[i].retransmit_count += 1;
                        self.entries[i].timestamp = now;
                        let ip = self.entries[i].ip_addr;
                        actions(ArpAction::Transmit {
                            packet: self.request_packet(ip),
                            dest: MacAddr::BROADCAST,
                        });
                    } else {
                        self.entries[i].drop_queue();
                        self.entries[i] = ArpCacheEntry::free();
                    }
                }
                ArpState::Reachable if now >= due => {
                    self.entries[i].state = ArpState::Stale;
                }
                ArpState::Delay if now >= due => {
                    self.entries[i].state = ArpState::Probe;
                    self.entries[i].retransmit_count = 0;
                    self.entries[i].timestamp = now;
                    self.entries[i].timeout = ARP_PROBE_TIMEOUT_MS;
                    let ip = self.entries[i].ip_addr;
                    let mac = self.entries[i].mac_addr;
                    actions(ArpAction::Transmit {
                        packet: self.probe_packet(ip),
                        dest: mac,
                    });
                }
                ArpState::Probe if now >= due => {
                    if self.entries[i].retransmit_count + 1 < ARP_MAX_PROBES {
                        self.entries[i].retransmit_count += 1;
                        self.entries[i].timestamp = now;
                        let ip = self.entries[i].ip_addr;
                        let mac = self.entries[i].mac_addr;
                        actions(ArpAction::Transmit {
                            packet: self.probe_packet(ip),
                            dest: mac,
                        });
                    } else {
                        self.entries[i] = ArpCacheEntry::free();
                    }
                }
                _ => {}
            }
        }
    }

    fn reach(&mut self, i: usize, mac: MacAddr, now: u64, actions: &mut impl FnMut(ArpAction)) {
        self.entries[i].mac_addr = mac;
        self.entries[i].state = ArpState::Reachable;
        self.entries[i].timestamp = now;
        self.entries[i].timeout = ARP_REACHABLE_TIME_MS;
        self.entries[i].retransmit_count = 0;
        ringbuf::ringbuf_entry_root!(crate::StackEvent::ArpResolved);
        if self.entries[i].queue_len() > 0 {
            let ip = self.entries[i].ip_addr;
            actions(ArpAction::FlushQueue { ip, mac });
        }
    }

    /// Drain and return the packets queued for `ip`, clearing the queue.
    /// Called by the caller in response to `ArpAction::FlushQueue`.
    pub fn take_queue(&mut self, ip: Ipv4Addr) -> heapless::Vec<QueuedPacket, Q_ARP> {
        let mut out = heapless::Vec::new();
        if let Some(i) = self.find(ip) {
            while let Some(p) = self.entries[i].queue.pop_front() {
                let _ = out.push(p);
            }
        }
        out
    }

    fn sender_is_valid(pkt: &ArpPacket, local_ip: Ipv4Addr) -> bool {
        pkt.sender_hw.is_unicast()
            && !pkt.sender_proto.is_broadcast()
            && !pkt.sender_proto.is_multicast()
            // unspecified sender protocol address is legal only for probes,
            // handled specially by callers; reject it here for replies.
            && (pkt.op == wire::OP_REQUEST || !pkt.sender_proto.is_unspecified())
            && local_ip != Ipv4Addr::UNSPECIFIED
    }

    /// §4.3 inbound reply handling.
    pub fn process_reply(&mut self, pkt: &ArpPacket, now: u64, actions: &mut impl FnMut(ArpAction)) {
        if !Self::sender_is_valid(pkt, self.local_ip) {
            return;
        }
        let Some(i) = self.find(pkt.sender_proto) else { return };
        match self.entries[i].state {
            ArpState::Incomplete | ArpState::Probe => {
                self.reach(i, pkt.sender_hw, now, actions);
            }
            ArpState::Reachable if self.entries[i].mac_addr != pkt.sender_hw => {
                self.entries[i].state = ArpState::Stale;
            }
            ArpState::Permanent => {}
            _ => {}
        }
    }

    /// §4.3 inbound request handling. `our_addrs` is the interface's IPv4
    /// address list, as `(addr, tentative)` pairs; returns the reply to
    /// send (if any) and whether a conflict was detected against a
    /// tentative address.
    pub fn process_request(
        &self,
        pkt: &ArpPacket,
        our_addrs: &[(Ipv4Addr, bool)],
        our_mac: MacAddr,
    ) -> (Option<[u8; wire::PACKET_LEN]>, bool) {
        if !(pkt.sender_hw.is_unicast()
            && !pkt.sender_proto.is_broadcast()
            && !pkt.sender_proto.is_multicast())
        {
            return (None, false);
        }

        let mut conflict = false;
        for &(addr, tentative) in our_addrs {
            if addr != pkt.target_proto {
                continue;
            }
            if tentative {
                if pkt.is_probe() {
                    conflict = true;
                } else if pkt.sender_hw != our_mac {
                    conflict = true;
                }
            } else if pkt.sender_proto == addr && pkt.sender_hw != our_mac {
                conflict = true;
            }
        }

        let target_owned = our_addrs
            .iter()
            .any(|&(addr, tentative)| !tentative && addr == pkt.target_proto);

        if !self.enabled || !target_owned || pkt.is_probe() {
            return (None, conflict);
        }

        let reply = ArpPacket {
            op: wire::OP_REPLY,
            sender_hw: our_mac,
            sender_proto: pkt.target_proto,
            target_hw: pkt.sender_hw,
            target_proto: pkt.sender_proto,
        }
        .encode();
        (Some(reply), conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const LOCAL_MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);
    const PEER_MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 2]);

    fn new_cache() -> ArpCache {
        ArpCache::new(LOCAL_IP, LOCAL_MAC)
    }

    #[test]
    fn scenario_arp_basic_resolve() {
        let mut cache = new_cache();
        let mut actions = heapless::Vec::<ArpAction, 4>::new();
        let err = cache
            .resolve(PEER_IP, 0, &mut |a| {
                let _ = actions.push(a);
            })
            .unwrap_err();
        assert_eq!(err, NetError::InProgress);
        assert_eq!(actions.len(), 1);
        assert_eq!(cache.entries().next().unwrap().state(), ArpState::Incomplete);

        let reply = ArpPacket {
            op: wire::OP_REPLY,
            sender_hw: PEER_MAC,
            sender_proto: PEER_IP,
            target_hw: LOCAL_MAC,
            target_proto: LOCAL_IP,
        };
        let mut reply_actions = heapless::Vec::<ArpAction, 4>::new();
        cache.process_reply(&reply, 10, &mut |a| {
            let _ = reply_actions.push(a);
        });
        assert_eq!(cache.entries().next().unwrap().state(), ArpState::Reachable);

        let mut no_actions = heapless::Vec::<ArpAction, 4>::new();
        let mac = cache
            .resolve(PEER_IP, 10, &mut |a| {
                let _ = no_actions.push(a);
            })
            .unwrap();
        assert_eq!(mac, PEER_MAC);
        assert!(no_actions.is_empty());
    }

    #[test]
    fn scenario_arp_exhaustion() {
        let mut cache = new_cache();
        let mut count_at = |cache: &mut ArpCache, now: u64| -> usize {
            let mut n = 0;
            cache.tick(now, &mut |_| n += 1);
            n
        };

        let mut initial = 0;
        cache
            .resolve(PEER_IP, 0, &mut |_| initial += 1)
            .unwrap_err();
        assert_eq!(initial, 1);

        assert_eq!(count_at(&mut cache, 1_000), 1);
        assert_eq!(count_at(&mut cache, 2_000), 1);
        assert_eq!(count_at(&mut cache, 3_000), 0);
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn no_resurrection_after_exhaustion() {
        let mut cache = new_cache();
        cache.resolve(PEER_IP, 0, &mut |_| {}).unwrap_err();
        cache.tick(1_000, &mut |_| {});
        cache.tick(2_000, &mut |_| {});
        cache.tick(3_000, &mut |_| {});
        assert_eq!(cache.entries().count(), 0);

        let reply = ArpPacket {
            op: wire::OP_REPLY,
            sender_hw: PEER_MAC,
            sender_proto: PEER_IP,
            target_hw: LOCAL_MAC,
            target_proto: LOCAL_IP,
        };
        cache.process_reply(&reply, 3_100, &mut |_| {});
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn queue_does_not_leak_past_exhaustion() {
        let mut cache = new_cache();
        cache.resolve(PEER_IP, 0, &mut |_| {}).unwrap_err();
        let buffer = NetBuffer::from_slice(&[0xaa; 8]).unwrap();
        cache
            .enqueue_packet(PEER_IP, buffer, 0, TxAncillary::default())
            .unwrap();
        assert_eq!(cache.entries().next().unwrap().queue_len(), 1);

        cache.tick(1_000, &mut |_| {});
        cache.tick(2_000, &mut |_| {});
        let mut flushed = false;
        cache.tick(3_000, &mut |a| {
            if matches!(a, ArpAction::FlushQueue { .. }) {
                flushed = true;
            }
        });
        assert!(!flushed);
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn static_entry_survives_ticks() {
        let mut cache = new_cache();
        cache.add_static_entry(PEER_IP, PEER_MAC, 0).unwrap();
        cache.tick(1_000_000, &mut |_| {});
        assert_eq!(cache.entries().next().unwrap().state(), ArpState::Permanent);
        assert_eq!(cache.entries().next().unwrap().mac_addr(), PEER_MAC);
    }
}
