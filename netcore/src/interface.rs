// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-NIC interface state: the glue between a `NicDriver`, its ARP cache,
//! and its IPv4/IPv6 multicast filter tables.
//!
//! Nothing here implements IP routing or encapsulation (§1); `Interface`
//! only owns the state that this crate is actually responsible for and
//! drives the MAC address filter on the NIC from it, per §4.2/§4.3's
//! "push accept-list changes down to the driver" requirement.

use heapless::Vec;

use crate::addr::{Ipv4Addr, MacAddr};
#[cfg(feature = "ipv6")]
use crate::addr::Ipv6Addr;
use crate::arp::{ArpAction, ArpCache};
use crate::buffer::{NetBuffer, TxAncillary};
use crate::config::{K_GRP, K_SRC, N_ARP, N_SOCK};
use crate::error::{NetError, Result};
use crate::ipv4::Ipv4FilterTable;
#[cfg(feature = "ipv6")]
use crate::ipv6::Ipv6FilterTable;
use crate::multicast::FilterMode;
use crate::nic::{MacFilterEntry, NicDriver};
use crate::socket::SocketTable;

/// Maximum number of unicast/tentative IPv4 addresses an interface tracks
/// locally for ARP's conflict-detection (§4.3); distinct from the routing
/// table, which this crate doesn't own.
pub const MAX_LOCAL_ADDRS: usize = 4;

/// One address owned by this interface, with DAD-style tentative tracking.
#[derive(Copy, Clone, Debug)]
pub struct LocalAddr {
    pub addr: Ipv4Addr,
    pub tentative: bool,
}

/// A single network interface: one NIC driver, its address state, its ARP
/// cache, and its multicast filter tables.
pub struct Interface<N: NicDriver> {
    nic: N,
    mac: MacAddr,
    local_addrs: Vec<LocalAddr, MAX_LOCAL_ADDRS>,
    arp: ArpCache,
    ipv4_filters: Ipv4FilterTable,
    #[cfg(feature = "ipv6")]
    ipv6_filters: Ipv6FilterTable,
}

impl<N: NicDriver> Interface<N> {
    pub fn new(mut nic: N, mac: MacAddr) -> Result<Self> {
        nic.init();
        Ok(Interface {
            nic,
            mac,
            local_addrs: Vec::new(),
            arp: ArpCache::new(Ipv4Addr::UNSPECIFIED, mac),
            ipv4_filters: Ipv4FilterTable::new(),
            #[cfg(feature = "ipv6")]
            ipv6_filters: Ipv6FilterTable::new(),
        })
    }

    pub fn nic(&self) -> &N {
        &self.nic
    }

    pub fn nic_mut(&mut self) -> &mut N {
        &mut self.nic
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn arp(&self) -> &ArpCache {
        &self.arp
    }

    pub fn arp_mut(&mut self) -> &mut ArpCache {
        &mut self.arp
    }

    pub fn ipv4_filters(&self) -> &Ipv4FilterTable {
        &self.ipv4_filters
    }

    #[cfg(feature = "ipv6")]
    pub fn ipv6_filters(&self) -> &Ipv6FilterTable {
        &self.ipv6_filters
    }

    /// Adds a new primary or secondary address. A freshly-added address
    /// starts `tentative` until the caller (running whatever duplicate
    /// address detection policy it likes) calls `confirm_addr`.
    pub fn add_addr(&mut self, addr: Ipv4Addr, tentative: bool) -> Result<()> {
        if self.local_addrs.iter().any(|a| a.addr == addr) {
            return Err(NetError::InvalidParameter);
        }
        self.local_addrs
            .push(LocalAddr { addr, tentative })
            .map_err(|_| NetError::NoResource)?;
        if self.local_addrs.len() == 1 {
            self.arp = ArpCache::new(addr, self.mac);
        }
        Ok(())
    }

    pub fn confirm_addr(&mut self, addr: Ipv4Addr) {
        if let Some(a) = self.local_addrs.iter_mut().find(|a| a.addr == addr) {
            a.tentative = false;
        }
    }

    pub fn remove_addr(&mut self, addr: Ipv4Addr) {
        if let Some(i) = self.local_addrs.iter().position(|a| a.addr == addr) {
            self.local_addrs.swap_remove(i);
        }
    }

    pub fn local_addrs(&self) -> &[LocalAddr] {
        &self.local_addrs
    }

    fn addr_pairs(&self) -> Vec<(Ipv4Addr, bool), MAX_LOCAL_ADDRS> {
        self.local_addrs.iter().map(|a| (a.addr, a.tentative)).collect()
    }

    /// Resolve `ip` to a MAC, driving any ARP request that results
    /// straight into the NIC.
    pub fn resolve(&mut self, ip: Ipv4Addr, now: u64) -> Result<MacAddr> {
        let mut actions: Vec<ArpAction, N_ARP> = Vec::new();
        let result = self.arp.resolve(ip, now, &mut |action| {
            let _ = actions.push(action);
        });
        self.drain_arp_actions(actions);
        result
    }

    /// Queue a packet awaiting ARP resolution for `ip`.
    pub fn enqueue_for_arp(
        &mut self,
        ip: Ipv4Addr,
        buffer: NetBuffer,
        offset: usize,
        tx_ancillary: TxAncillary,
    ) -> Result<()> {
        self.arp.enqueue_packet(ip, buffer, offset, tx_ancillary)
    }

    /// The periodic ARP timer tick (§4.3/§5).
    pub fn tick(&mut self, now: u64) {
        let mut actions: Vec<ArpAction, N_ARP> = Vec::new();
        self.arp.tick(now, &mut |action| {
            let _ = actions.push(action);
        });
        self.drain_arp_actions(actions);
    }

    /// Feed an inbound ARP packet. Reply packets update the cache; request
    /// packets may produce an outbound reply, which is sent directly.
    pub fn handle_arp(&mut self, bytes: &[u8], now: u64) {
        let Some(pkt) = crate::arp::ArpPacket::parse(bytes) else { return };
        match pkt.op {
            1 => {
                let pairs = self.addr_pairs();
                let (reply, _conflict) = self.arp.process_request(&pkt, &pairs, self.mac);
                if let Some(reply) = reply {
                    if let Ok(frame) = ethernet_frame(pkt.sender_hw, self.mac, ETHERTYPE_ARP, &reply) {
                        let _ = self.nic.send_packet(&frame, 0, TxAncillary::default());
                    }
                }
            }
            2 => {
                let mut actions: Vec<ArpAction, N_ARP> = Vec::new();
                self.arp.process_reply(&pkt, now, &mut |action| {
                    let _ = actions.push(action);
                });
                self.drain_arp_actions(actions);
            }
            _ => {}
        }
    }

    /// Apply the side effects of a batch of `ArpAction`s collected while
    /// `self.arp` was borrowed. Must run after that borrow ends, since
    /// `FlushQueue` needs to call back into `self.arp` to drain the queue.
    fn drain_arp_actions(&mut self, actions: Vec<ArpAction, N_ARP>) {
        for action in actions {
            match action {
                ArpAction::Transmit { packet, dest } => {
                    if let Ok(frame) = ethernet_frame(dest, self.mac, ETHERTYPE_ARP, &packet) {
                        let _ = self.nic.send_packet(&frame, 0, TxAncillary::default());
                    }
                }
                ArpAction::FlushQueue { ip, mac } => {
                    let _ = ip;
                    for queued in self.arp.take_queue(ip) {
                        let _ = mac;
                        let _ =
                            self.nic
                                .send_packet(&queued.buffer, queued.offset, queued.tx_ancillary);
                    }
                }
            }
        }
    }

    /// Re-run §4.2's reconciliation for `group` against every socket's
    /// current IPv4 membership, then re-sync the NIC's MAC filter if the
    /// reception state changed. Called after any operation that can change
    /// a group's membership: join/leave/source changes, and socket close.
    pub fn reconcile_ipv4(&mut self, group: Ipv4Addr, sockets: &SocketTable) -> Result<()> {
        let mut sources: Vec<Vec<Ipv4Addr, K_SRC>, N_SOCK> = Vec::new();
        let mut modes: Vec<FilterMode, N_SOCK> = Vec::new();
        for s in sockets.iter() {
            if let Some(g) = s.ipv4_groups().iter().find(|g| g.addr() == Some(group)) {
                let mut v: Vec<Ipv4Addr, K_SRC> = Vec::new();
                for src in g.sources() {
                    let _ = v.push(*src);
                }
                let _ = sources.push(v);
                let _ = modes.push(g.filter_mode());
            }
        }
        let slots = modes.iter().zip(sources.iter()).map(|(m, v)| (*m, v.as_slice()));
        let changed = self.ipv4_filters.reconcile(group, slots, |_, _, _| {})?;
        if changed {
            self.sync_mac_filter()?;
            ringbuf::ringbuf_entry_root!(crate::StackEvent::McastReconciled);
        }
        Ok(())
    }

    /// Record (or clear) an any-source join against `group`'s interface-level
    /// entry. Called by the socket-level join/leave integration point
    /// (`Net::join_multicast_group`/`leave_multicast_group`) since
    /// `any_source_ref_count` lives on the interface's filter table, not the
    /// per-socket slot.
    pub fn note_any_source_ipv4(&mut self, group: Ipv4Addr, delta: i8) -> Result<()> {
        self.ipv4_filters.note_any_source(group, delta)
    }

    #[cfg(feature = "ipv6")]
    pub fn reconcile_ipv6(&mut self, group: Ipv6Addr, sockets: &SocketTable) -> Result<()> {
        let mut sources: Vec<Vec<Ipv6Addr, K_SRC>, N_SOCK> = Vec::new();
        let mut modes: Vec<FilterMode, N_SOCK> = Vec::new();
        for s in sockets.iter() {
            if let Some(g) = s.ipv6_groups().iter().find(|g| g.addr() == Some(group)) {
                let mut v: Vec<Ipv6Addr, K_SRC> = Vec::new();
                for src in g.sources() {
                    let _ = v.push(*src);
                }
                let _ = sources.push(v);
                let _ = modes.push(g.filter_mode());
            }
        }
        let slots = modes.iter().zip(sources.iter()).map(|(m, v)| (*m, v.as_slice()));
        let changed = self.ipv6_filters.reconcile(group, slots, |_, _, _| {})?;
        if changed {
            self.sync_mac_filter()?;
            ringbuf::ringbuf_entry_root!(crate::StackEvent::McastReconciled);
        }
        Ok(())
    }

    #[cfg(feature = "ipv6")]
    pub fn note_any_source_ipv6(&mut self, group: Ipv6Addr, delta: i8) -> Result<()> {
        self.ipv6_filters.note_any_source(group, delta)
    }

    /// Push the current multicast MAC filter state (union of IPv4, and
    /// IPv6 if enabled) down into the NIC driver, per §4.2/§6.
    pub fn sync_mac_filter(&mut self) -> Result<()> {
        let mut entries: Vec<MacFilterEntry, K_GRP> = Vec::new();
        for (addr, _) in self.ipv4_filters.mac_filter_entries() {
            push_mac(&mut entries, MacAddr::from_ipv4_multicast(addr));
        }
        #[cfg(feature = "ipv6")]
        for (addr, _) in self.ipv6_filters.mac_filter_entries() {
            push_mac(&mut entries, MacAddr::from_ipv6_multicast(addr));
        }
        self.nic.update_mac_addr_filter(&entries);
        Ok(())
    }
}

/// `0x0806`: EtherType for ARP.
const ETHERTYPE_ARP: u16 = 0x0806;

fn push_mac<const K: usize>(entries: &mut Vec<MacFilterEntry, K>, mac: MacAddr) {
    if let Some(e) = entries.iter_mut().find(|e| e.addr == mac) {
        e.ref_count += 1;
    } else {
        let _ = entries.push(MacFilterEntry { addr: mac, ref_count: 1 });
    }
}

/// Prepend a 14-byte Ethernet header to `payload`, per §6's MAC framing.
fn ethernet_frame(dest: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Result<NetBuffer> {
    let mut frame = [0u8; crate::buffer::MAX_FRAME];
    if payload.len() + 14 > frame.len() {
        return Err(NetError::InvalidLength);
    }
    frame[0..6].copy_from_slice(&dest.0);
    frame[6..12].copy_from_slice(&src.0);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
    frame[14..14 + payload.len()].copy_from_slice(payload);
    NetBuffer::from_slice(&frame[..14 + payload.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::{MacType, NicFlags};

    struct MockNic {
        sent: heapless::Vec<heapless::Vec<u8, { crate::buffer::MAX_FRAME }>, 8>,
        filter: heapless::Vec<MacFilterEntry, K_GRP>,
    }

    impl MockNic {
        fn new() -> Self {
            MockNic { sent: heapless::Vec::new(), filter: heapless::Vec::new() }
        }
    }

    impl NicDriver for MockNic {
        fn init(&mut self) {}
        fn tick(&mut self, _period_ms: u64) {}
        fn enable_irq(&mut self) {}
        fn disable_irq(&mut self) {}
        fn event_handler(&mut self) {}

        fn send_packet(
            &mut self,
            buffer: &NetBuffer,
            offset: usize,
            _ancillary: TxAncillary,
        ) -> Result<()> {
            let frame = heapless::Vec::from_slice(&buffer.as_slice()[offset..])
                .map_err(|_| NetError::InvalidLength)?;
            self.sent.push(frame).map_err(|_| NetError::NoResource)?;
            Ok(())
        }

        fn update_mac_addr_filter(&mut self, filter: &[MacFilterEntry]) {
            self.filter = heapless::Vec::from_slice(filter).unwrap();
        }

        fn write_phy_reg(&mut self, _phy_addr: u8, _reg: u8, _value: u16) {}
        fn read_phy_reg(&mut self, _phy_addr: u8, _reg: u8) -> u16 {
            0
        }

        fn flags(&self) -> NicFlags {
            NicFlags { mac_type: MacType::Ethernet, mtu: 1500, native_link_state: true }
        }
    }

    const LOCAL_MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 9]);
    const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 10);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 20);
    const PEER_MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 20]);

    fn new_iface() -> Interface<MockNic> {
        let mut iface = Interface::new(MockNic::new(), LOCAL_MAC).unwrap();
        iface.add_addr(LOCAL_IP, false).unwrap();
        iface
    }

    #[test]
    fn add_confirm_remove_addr_roundtrip() {
        let mut iface = new_iface();
        assert_eq!(iface.local_addrs().len(), 1);
        assert!(!iface.local_addrs()[0].tentative);

        iface.add_addr(PEER_IP, true).unwrap();
        assert_eq!(iface.local_addrs().len(), 2);
        iface.confirm_addr(PEER_IP);
        let confirmed = iface.local_addrs().iter().find(|a| a.addr == PEER_IP).unwrap();
        assert!(!confirmed.tentative);

        iface.remove_addr(PEER_IP);
        assert_eq!(iface.local_addrs().len(), 1);
    }

    #[test]
    fn resolve_emits_arp_request_as_ethernet_broadcast() {
        let mut iface = new_iface();
        let err = iface.resolve(PEER_IP, 0).unwrap_err();
        assert_eq!(err, NetError::InProgress);

        let frame = &iface.nic().sent[0];
        assert_eq!(&frame[0..6], &MacAddr::BROADCAST.0);
        assert_eq!(&frame[6..12], &LOCAL_MAC.0);
        assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), ETHERTYPE_ARP);
    }

    #[test]
    fn handle_arp_reply_resolves_and_flushes_queue() {
        let mut iface = new_iface();
        iface.resolve(PEER_IP, 0).unwrap_err();

        let buffer = NetBuffer::from_slice(b"queued payload").unwrap();
        iface.enqueue_for_arp(PEER_IP, buffer, 0, TxAncillary::default()).unwrap();

        let reply = crate::arp::ArpPacket {
            op: 2,
            sender_hw: PEER_MAC,
            sender_proto: PEER_IP,
            target_hw: LOCAL_MAC,
            target_proto: LOCAL_IP,
        };
        iface.handle_arp(&reply.encode(), 5);

        assert_eq!(iface.arp().entries().next().unwrap().mac_addr(), PEER_MAC);
        // The queued packet should have been flushed straight to the NIC --
        // one ARP request frame plus the flushed payload frame.
        assert_eq!(iface.nic().sent.len(), 2);
        assert_eq!(&iface.nic().sent[1][..], b"queued payload");
    }

    #[test]
    fn handle_arp_request_for_owned_address_sends_reply() {
        let mut iface = new_iface();
        let request = crate::arp::ArpPacket {
            op: 1,
            sender_hw: PEER_MAC,
            sender_proto: PEER_IP,
            target_hw: MacAddr::UNSPECIFIED,
            target_proto: LOCAL_IP,
        };
        iface.handle_arp(&request.encode(), 0);

        let frame = &iface.nic().sent[0];
        assert_eq!(&frame[0..6], &PEER_MAC.0);
        assert_eq!(&frame[6..12], &LOCAL_MAC.0);
    }

    #[test]
    fn sync_mac_filter_pushes_multicast_entries_to_nic() {
        let mut iface = new_iface();
        let mut sockets = SocketTable::new();
        let d = sockets.open(crate::socket::SocketType::Dgram, 0).unwrap();
        let group = Ipv4Addr::new(224, 1, 2, 3);
        sockets
            .get_mut(d)
            .unwrap()
            .ipv4_groups_mut()
            .add_source(0, group, Ipv4Addr::new(10, 0, 0, 5))
            .unwrap();

        iface.reconcile_ipv4(group, &sockets).unwrap();
        assert!(iface.ipv4_filters().find(group).is_some());
        assert_eq!(iface.nic().filter.len(), 1);
        assert_eq!(iface.nic().filter[0].addr, MacAddr::from_ipv4_multicast(group));
    }

    #[test]
    fn note_any_source_ipv4_keeps_entry_reconciled_as_exclude_all() {
        let mut iface = new_iface();
        let sockets = SocketTable::new();
        let group = Ipv4Addr::new(224, 1, 2, 4);

        iface.note_any_source_ipv4(group, 1).unwrap();
        iface.reconcile_ipv4(group, &sockets).unwrap();
        let entry = iface.ipv4_filters().find(group).unwrap();
        assert_eq!(entry.mode(), crate::multicast::FilterMode::Exclude);
        assert!(entry.sources().is_empty());
        assert_eq!(iface.nic().filter.len(), 1);

        iface.note_any_source_ipv4(group, -1).unwrap();
        iface.reconcile_ipv4(group, &sockets).unwrap();
        assert!(iface.ipv4_filters().find(group).is_none());
        assert!(iface.nic().filter.is_empty());
    }
}
