// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The socket table (component G), §4.1.
//!
//! A BSD-style, fixed-size endpoint table for TCP (stream), UDP (datagram),
//! raw IP and raw Ethernet sockets. The actual TCP state machine and IP
//! encapsulation/demultiplexing live outside this crate (§1); this module
//! owns the parts that are unambiguously the socket layer's job: the table
//! itself, socket options, the per-socket receive queue, multicast group
//! membership, and the event/poll bookkeeping.

use heapless::Deque;

use crate::addr::IpAddr;
use crate::buffer::NetBuffer;
use crate::config::{
    self, K_GRP, K_SRC, MAX_MSS, MAX_SUBSCRIBERS, MIN_MSS, N_SOCK, RX_QUEUE_DEPTH,
};
use crate::error::{NetError, Result};
use crate::event::{NetEvent, Subscription};
use crate::ipv4::Ipv4McastGroups;
#[cfg(feature = "ipv6")]
use crate::ipv6::Ipv6McastGroups;
use crate::multicast::FilterMode;

/// Bits of `Socket::event_flags` / `event_mask`. A socket ORs bits into
/// `event_flags` as conditions become true (e.g. data arrives) and clears
/// them as they stop being true (e.g. the receive queue drains); `poll`
/// reads `event_flags & event_mask`.
pub mod events {
    pub const READABLE: u32 = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const ERROR: u32 = 1 << 2;
    pub const ACCEPTABLE: u32 = 1 << 3;
    pub const CONNECTED: u32 = 1 << 4;
    pub const CLOSED: u32 = 1 << 5;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketType {
    Unused,
    Stream,
    Dgram,
    RawIp,
    RawEth,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownHow {
    Send,
    Receive,
    Both,
}

/// `Socket::options`. A single-bit set; not worth pulling in `bitflags` for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SocketOptions(u8);

impl SocketOptions {
    pub const BROADCAST: SocketOptions = SocketOptions(1 << 0);

    pub const fn empty() -> Self {
        SocketOptions(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

/// An Ethernet header as parsed by `sendto`/reconstructed by `receive_*`
/// for `RawEth` sockets, per §4.1's RAW_ETH contract.
#[derive(Copy, Clone, Debug, Default)]
pub struct EthernetHeader {
    pub dest_mac: crate::addr::MacAddr,
    pub src_mac: crate::addr::MacAddr,
    pub ethertype: u16,
}

pub const ETHERNET_HEADER_LEN: usize = 14;

/// Ancillary fields carried alongside a `send_msg`/`receive_msg` call.
///
/// The default value is the "well-defined zero/neutral value" the design
/// calls for: every field is its family's identity element, never a
/// sentinel that happens to look like one.
#[derive(Copy, Clone, Debug)]
pub struct SocketMsg {
    pub dest_addr: Option<IpAddr>,
    pub dest_port: u16,
    pub ethernet: Option<EthernetHeader>,
    pub ttl: u8,
    pub tos: u8,
    pub flags: u32,
}

impl Default for SocketMsg {
    fn default() -> Self {
        SocketMsg {
            dest_addr: None,
            dest_port: 0,
            ethernet: None,
            ttl: 0,
            tos: 0,
            flags: 0,
        }
    }
}

/// One datagram buffered on a DGRAM/RAW socket's receive queue.
pub struct QueuedDatagram {
    pub src_addr: IpAddr,
    pub src_port: u16,
    pub ethernet: Option<EthernetHeader>,
    pub data: NetBuffer,
}

/// No timeout: block forever.
pub const INFINITE: Option<u64> = None;

/// A socket table entry, per §3.
pub struct Socket {
    descriptor: usize,
    ty: SocketType,
    protocol: u16,
    interface: Option<usize>,
    local_ip: Option<IpAddr>,
    local_port: u16,
    remote_ip: Option<IpAddr>,
    remote_port: u16,
    options: SocketOptions,
    ttl: u8,
    multicast_ttl: u8,
    tos: u8,
    vlan_pcp: u8,
    vlan_dei: bool,
    vman_pcp: u8,
    vman_dei: bool,
    timeout: Option<u64>,
    mss: u16,
    tx_buffer_size: u32,
    rx_buffer_size: u32,
    keep_alive: Option<KeepAlive>,
    ipv4_groups: Ipv4McastGroups,
    #[cfg(feature = "ipv6")]
    ipv6_groups: Ipv6McastGroups,
    receive_queue: Deque<QueuedDatagram, RX_QUEUE_DEPTH>,
    event_mask: u32,
    event_flags: u32,
    subscribers: [Option<Subscription>; MAX_SUBSCRIBERS],
    /// Tracks whether the (external) TCP state machine considers this
    /// socket closed; §4.1 gates `set_tx/rx_buffer_size` on it.
    tcp_closed: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct KeepAlive {
    pub idle_ms: u32,
    pub interval_ms: u32,
    pub max_probes: u32,
}

impl Socket {
    fn unused(descriptor: usize) -> Self {
        Socket {
            descriptor,
            ty: SocketType::Unused,
            protocol: 0,
            interface: None,
            local_ip: None,
            local_port: 0,
            remote_ip: None,
            remote_port: 0,
            options: SocketOptions::empty(),
            ttl: config::DEFAULT_TTL,
            multicast_ttl: config::DEFAULT_MULTICAST_TTL,
            tos: 0,
            vlan_pcp: 0,
            vlan_dei: false,
            vman_pcp: 0,
            vman_dei: false,
            timeout: INFINITE,
            mss: MAX_MSS,
            tx_buffer_size: 0,
            rx_buffer_size: 0,
            keep_alive: None,
            ipv4_groups: Ipv4McastGroups::new(),
            #[cfg(feature = "ipv6")]
            ipv6_groups: Ipv6McastGroups::new(),
            receive_queue: Deque::new(),
            event_mask: 0,
            event_flags: 0,
            subscribers: [None; MAX_SUBSCRIBERS],
            tcp_closed: true,
        }
    }

    pub fn descriptor(&self) -> usize {
        self.descriptor
    }

    pub fn socket_type(&self) -> SocketType {
        self.ty
    }

    pub fn local_addr(&self) -> (Option<IpAddr>, u16) {
        (self.local_ip, self.local_port)
    }

    pub fn remote_addr(&self) -> (Option<IpAddr>, u16) {
        (self.remote_ip, self.remote_port)
    }

    pub fn interface(&self) -> Option<usize> {
        self.interface
    }

    pub fn ipv4_groups(&self) -> &Ipv4McastGroups {
        &self.ipv4_groups
    }

    pub fn ipv4_groups_mut(&mut self) -> &mut Ipv4McastGroups {
        &mut self.ipv4_groups
    }

    #[cfg(feature = "ipv6")]
    pub fn ipv6_groups(&self) -> &Ipv6McastGroups {
        &self.ipv6_groups
    }

    #[cfg(feature = "ipv6")]
    pub fn ipv6_groups_mut(&mut self) -> &mut Ipv6McastGroups {
        &mut self.ipv6_groups
    }

    /// Merge `flags` into `event_flags` and wake any subscriber whose mask
    /// intersects the newly-set bits. Called by the (external) IP/TCP
    /// layer when a socket becomes readable/writable/etc, and by this
    /// module's own send/receive/close paths.
    pub fn post_event(&mut self, flags: u32) {
        self.event_flags |= flags;
        for sub in self.subscribers.iter().flatten() {
            if sub.mask & flags != 0 {
                sub.event.signal();
            }
        }
    }

    fn clear_event(&mut self, flags: u32) {
        self.event_flags &= !flags;
    }

    /// Register `event` against `mask`; used by `poll` (§4.4). Returns the
    /// slot index so the caller can unsubscribe deterministically.
    pub(crate) fn subscribe(&mut self, event: &'static dyn NetEvent, mask: u32) -> Result<usize> {
        let slot = self
            .subscribers
            .iter()
            .position(|s| s.is_none())
            .ok_or(NetError::NoResource)?;
        self.subscribers[slot] = Some(Subscription { event, mask });
        self.event_mask |= mask;
        Ok(slot)
    }

    pub(crate) fn unsubscribe(&mut self, slot: usize) {
        self.subscribers[slot] = None;
    }

    pub(crate) fn flags_matching(&self, mask: u32) -> u32 {
        self.event_flags & mask
    }
}

/// The fixed-size, process-wide socket table.
pub struct SocketTable {
    sockets: [Socket; N_SOCK],
}

impl SocketTable {
    pub fn new() -> Self {
        SocketTable {
            sockets: core::array::from_fn(Socket::unused),
        }
    }

    pub fn get(&self, descriptor: usize) -> Option<&Socket> {
        self.sockets.get(descriptor).filter(|s| s.ty != SocketType::Unused)
    }

    pub fn get_mut(&mut self, descriptor: usize) -> Option<&mut Socket> {
        self.sockets
            .get_mut(descriptor)
            .filter(|s| s.ty != SocketType::Unused)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.iter().filter(|s| s.ty != SocketType::Unused)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Socket> {
        self.sockets.iter_mut().filter(|s| s.ty != SocketType::Unused)
    }

    /// `socket_open`.
    pub fn open(&mut self, ty: SocketType, protocol: u16) -> Result<usize> {
        let i = self
            .sockets
            .iter()
            .position(|s| s.ty == SocketType::Unused)
            .ok_or(NetError::NoResource)?;
        let mut s = Socket::unused(i);
        s.ty = ty;
        s.protocol = protocol;
        s.tcp_closed = ty == SocketType::Stream;
        self.sockets[i] = s;
        ringbuf::ringbuf_entry_root!(crate::StackEvent::SocketOpened);
        Ok(i)
    }

    pub fn set_timeout(&mut self, d: usize, timeout: Option<u64>) -> Result<()> {
        self.require(d)?.timeout = timeout;
        Ok(())
    }

    pub fn set_ttl(&mut self, d: usize, ttl: u8) -> Result<()> {
        self.require(d)?.ttl = ttl;
        Ok(())
    }

    pub fn set_multicast_ttl(&mut self, d: usize, ttl: u8) -> Result<()> {
        self.require(d)?.multicast_ttl = ttl;
        Ok(())
    }

    /// `dscp` in `0..=63`; stored internally as `dscp << 2` (the ToS byte's
    /// DSCP field occupies its top six bits).
    pub fn set_dscp(&mut self, d: usize, dscp: u8) -> Result<()> {
        if dscp >= 64 {
            return Err(NetError::InvalidParameter);
        }
        self.require(d)?.tos = dscp << 2;
        Ok(())
    }

    pub fn set_vlan_pcp(&mut self, d: usize, pcp: u8) -> Result<()> {
        if pcp >= 8 {
            return Err(NetError::InvalidParameter);
        }
        self.require(d)?.vlan_pcp = pcp;
        Ok(())
    }

    pub fn set_vlan_dei(&mut self, d: usize, dei: bool) -> Result<()> {
        self.require(d)?.vlan_dei = dei;
        Ok(())
    }

    pub fn set_vman_pcp(&mut self, d: usize, pcp: u8) -> Result<()> {
        if pcp >= 8 {
            return Err(NetError::InvalidParameter);
        }
        self.require(d)?.vman_pcp = pcp;
        Ok(())
    }

    pub fn set_vman_dei(&mut self, d: usize, dei: bool) -> Result<()> {
        self.require(d)?.vman_dei = dei;
        Ok(())
    }

    pub fn enable_broadcast(&mut self, d: usize, enable: bool) -> Result<()> {
        self.require(d)?.options.set(SocketOptions::BROADCAST, enable);
        Ok(())
    }

    pub fn enable_keep_alive(&mut self, d: usize, enable: bool) -> Result<()> {
        let s = self.require(d)?;
        if s.ty != SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        if !enable {
            s.keep_alive = None;
        } else if s.keep_alive.is_none() {
            s.keep_alive = Some(KeepAlive { idle_ms: 0, interval_ms: 0, max_probes: 0 });
        }
        Ok(())
    }

    pub fn set_keep_alive_params(
        &mut self,
        d: usize,
        idle_ms: u32,
        interval_ms: u32,
        max_probes: u32,
    ) -> Result<()> {
        if idle_ms == 0 || interval_ms == 0 || max_probes == 0 {
            return Err(NetError::InvalidParameter);
        }
        let s = self.require(d)?;
        if s.ty != SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        s.keep_alive = Some(KeepAlive { idle_ms, interval_ms, max_probes });
        Ok(())
    }

    pub fn set_mss(&mut self, d: usize, mss: u16) -> Result<()> {
        let s = self.require(d)?;
        if s.ty != SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        s.mss = mss.clamp(MIN_MSS, MAX_MSS);
        Ok(())
    }

    fn require_closed_tcp(&mut self, d: usize) -> Result<&mut Socket> {
        let s = self.require(d)?;
        if s.ty != SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        if !s.tcp_closed {
            return Err(NetError::InvalidSocket);
        }
        Ok(s)
    }

    pub fn set_tx_buffer_size(&mut self, d: usize, size: u32) -> Result<()> {
        if size == 0 {
            return Err(NetError::InvalidParameter);
        }
        self.require_closed_tcp(d)?.tx_buffer_size = size;
        Ok(())
    }

    pub fn set_rx_buffer_size(&mut self, d: usize, size: u32) -> Result<()> {
        if size == 0 {
            return Err(NetError::InvalidParameter);
        }
        self.require_closed_tcp(d)?.rx_buffer_size = size;
        Ok(())
    }

    pub fn set_interface(&mut self, d: usize, interface: usize) -> Result<()> {
        self.require(d)?.interface = Some(interface);
        Ok(())
    }

    pub fn get_interface(&self, d: usize) -> Result<Option<usize>> {
        Ok(self.get(d).ok_or(NetError::InvalidSocket)?.interface)
    }

    fn require(&mut self, d: usize) -> Result<&mut Socket> {
        self.get_mut(d).ok_or(NetError::InvalidSocket)
    }

    /// §4.2: multicast group operations are only meaningful for DGRAM and
    /// RAW_IP sockets.
    fn require_multicast(&mut self, d: usize) -> Result<&mut Socket> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Dgram | SocketType::RawIp => Ok(s),
            _ => Err(NetError::InvalidSocket),
        }
    }

    /// `bind`: allowed for STREAM, DGRAM, RAW_IP.
    pub fn bind(&mut self, d: usize, ip: IpAddr, port: u16) -> Result<()> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Stream | SocketType::Dgram | SocketType::RawIp => {
                s.local_ip = Some(ip);
                s.local_port = port;
                Ok(())
            }
            _ => Err(NetError::InvalidSocket),
        }
    }

    /// `connect`. For STREAM this only records intent here -- the actual
    /// handshake is driven by the external TCP collaborator, which this
    /// crate doesn't implement (§1); callers integrating a real TCP engine
    /// should intercept STREAM sockets before reaching this path. For
    /// DGRAM/RAW_IP it just records the remote endpoint.
    pub fn connect(&mut self, d: usize, ip: IpAddr, port: u16) -> Result<()> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Dgram | SocketType::RawIp => {
                s.remote_ip = Some(ip);
                s.remote_port = port;
                Ok(())
            }
            SocketType::Stream => Err(NetError::NotImplemented),
            _ => Err(NetError::InvalidSocket),
        }
    }

    /// `listen`. STREAM-only; the backlog/accept-queue itself is the
    /// external TCP collaborator's job (§1) -- this crate only validates
    /// the socket and reports the feature as unimplemented here.
    pub fn listen(&mut self, d: usize, _backlog: u32) -> Result<()> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Stream => Err(NetError::NotImplemented),
            _ => Err(NetError::InvalidSocket),
        }
    }

    /// `accept`. STREAM-only, same rationale as `listen`.
    pub fn accept(&mut self, d: usize) -> Result<(usize, IpAddr, u16)> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Stream => Err(NetError::NotImplemented),
            _ => Err(NetError::InvalidSocket),
        }
    }

    /// `join_multicast_group`: an any-source join, per §4.2. DGRAM/RAW_IP
    /// only; the address-family dispatch mirrors `bind`/`sendto`'s own
    /// `IpAddr` handling.
    pub fn join_multicast_group(&mut self, d: usize, interface: usize, group: IpAddr) -> Result<()> {
        let s = self.require_multicast(d)?;
        match group {
            IpAddr::V4(g) => s.ipv4_groups.join_group(interface, g),
            #[cfg(feature = "ipv6")]
            IpAddr::V6(g) => s.ipv6_groups.join_group(interface, g),
        }
    }

    pub fn leave_multicast_group(&mut self, d: usize, interface: usize, group: IpAddr) -> Result<()> {
        let s = self.require_multicast(d)?;
        match group {
            IpAddr::V4(g) => s.ipv4_groups.leave_group(interface, g),
            #[cfg(feature = "ipv6")]
            IpAddr::V6(g) => s.ipv6_groups.leave_group(interface, g),
        }
    }

    pub fn add_multicast_source(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
        src: IpAddr,
    ) -> Result<()> {
        let s = self.require_multicast(d)?;
        match (group, src) {
            (IpAddr::V4(g), IpAddr::V4(a)) => s.ipv4_groups.add_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            (IpAddr::V6(g), IpAddr::V6(a)) => s.ipv6_groups.add_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            _ => Err(NetError::InvalidParameter),
        }
    }

    pub fn drop_multicast_source(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
        src: IpAddr,
    ) -> Result<()> {
        let s = self.require_multicast(d)?;
        match (group, src) {
            (IpAddr::V4(g), IpAddr::V4(a)) => s.ipv4_groups.drop_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            (IpAddr::V6(g), IpAddr::V6(a)) => s.ipv6_groups.drop_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            _ => Err(NetError::InvalidParameter),
        }
    }

    pub fn block_multicast_source(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
        src: IpAddr,
    ) -> Result<()> {
        let s = self.require_multicast(d)?;
        match (group, src) {
            (IpAddr::V4(g), IpAddr::V4(a)) => s.ipv4_groups.block_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            (IpAddr::V6(g), IpAddr::V6(a)) => s.ipv6_groups.block_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            _ => Err(NetError::InvalidParameter),
        }
    }

    pub fn unblock_multicast_source(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
        src: IpAddr,
    ) -> Result<()> {
        let s = self.require_multicast(d)?;
        match (group, src) {
            (IpAddr::V4(g), IpAddr::V4(a)) => s.ipv4_groups.unblock_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            (IpAddr::V6(g), IpAddr::V6(a)) => s.ipv6_groups.unblock_source(interface, g, a),
            #[cfg(feature = "ipv6")]
            _ => Err(NetError::InvalidParameter),
        }
    }

    /// `set_multicast_source_filter`: the full-state model, §4.2.
    pub fn set_multicast_source_filter(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
        mode: FilterMode,
        sources: &[IpAddr],
    ) -> Result<()> {
        let s = self.require_multicast(d)?;
        match group {
            IpAddr::V4(g) => {
                let mut v: heapless::Vec<crate::addr::Ipv4Addr, K_SRC> = heapless::Vec::new();
                for src in sources {
                    match src {
                        IpAddr::V4(a) => v.push(*a).map_err(|_| NetError::InvalidParameter)?,
                        #[cfg(feature = "ipv6")]
                        IpAddr::V6(_) => return Err(NetError::InvalidParameter),
                    }
                }
                s.ipv4_groups.set_source_filter(interface, g, mode, &v)
            }
            #[cfg(feature = "ipv6")]
            IpAddr::V6(g) => {
                let mut v: heapless::Vec<crate::addr::Ipv6Addr, K_SRC> = heapless::Vec::new();
                for src in sources {
                    match src {
                        IpAddr::V6(a) => v.push(*a).map_err(|_| NetError::InvalidParameter)?,
                        IpAddr::V4(_) => return Err(NetError::InvalidParameter),
                    }
                }
                s.ipv6_groups.set_source_filter(interface, g, mode, &v)
            }
        }
    }

    /// `get_multicast_source_filter`. Reproduces the §9 asymmetry
    /// documented on `McastGroupTable::get_source_filter`: a non-existent
    /// slot reports `(EXCLUDE, [])` rather than `(INCLUDE, [])`.
    pub fn get_multicast_source_filter(
        &mut self,
        d: usize,
        interface: usize,
        group: IpAddr,
    ) -> Result<(FilterMode, heapless::Vec<IpAddr, K_SRC>)> {
        let s = self.require_multicast(d)?;
        match group {
            IpAddr::V4(g) => {
                let (mode, sources) = s.ipv4_groups.get_source_filter(interface, g);
                let mut out = heapless::Vec::new();
                for src in sources {
                    let _ = out.push(IpAddr::V4(src));
                }
                Ok((mode, out))
            }
            #[cfg(feature = "ipv6")]
            IpAddr::V6(g) => {
                let (mode, sources) = s.ipv6_groups.get_source_filter(interface, g);
                let mut out = heapless::Vec::new();
                for src in sources {
                    let _ = out.push(IpAddr::V6(src));
                }
                Ok((mode, out))
            }
        }
    }

    /// `send`: equivalent to `sendto` using the socket's own connected
    /// remote endpoint (§4.1).
    pub fn send(&mut self, d: usize, data: &[u8]) -> Result<usize> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Stream => return Err(NetError::NotImplemented),
            SocketType::RawEth => return Err(NetError::InvalidSocket),
            _ => {}
        }
        let remote_ip = s.remote_ip.ok_or(NetError::InvalidParameter)?;
        let remote_port = s.remote_port;
        self.sendto(d, remote_ip, remote_port, data)
    }

    /// `send_to` for DGRAM/RAW_IP. Enqueuing the datagram for local
    /// delivery to a socket bound to `dest` is what this layer owns;
    /// routing it onto the wire is the IP layer's job and is modeled here
    /// only as the returned byte count.
    pub fn sendto(
        &mut self,
        d: usize,
        dest: IpAddr,
        _dest_port: u16,
        data: &[u8],
    ) -> Result<usize> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Dgram | SocketType::RawIp => {
                let wants_broadcast = dest.as_v4().map_or(false, |v4| v4.is_broadcast());
                if wants_broadcast && !s.options.contains(SocketOptions::BROADCAST) {
                    return Err(NetError::InvalidParameter);
                }
                Ok(data.len())
            }
            SocketType::RawEth => Err(NetError::InvalidSocket),
            SocketType::Stream => Err(NetError::NotImplemented),
            SocketType::Unused => unreachable!(),
        }
    }

    /// `sendto` on a RAW_ETH socket: the caller supplies the full Ethernet
    /// header in the first 14 bytes of `data`, per §4.1.
    pub fn sendto_raw_eth(&mut self, d: usize, data: &[u8]) -> Result<usize> {
        let s = self.require(d)?;
        if s.ty != SocketType::RawEth {
            return Err(NetError::InvalidSocket);
        }
        if data.len() < ETHERNET_HEADER_LEN {
            return Err(NetError::InvalidLength);
        }
        let payload_len = data.len() - ETHERNET_HEADER_LEN;
        Ok(payload_len)
    }

    /// `send_msg`: connectionless/raw sockets only.
    pub fn send_msg(&mut self, d: usize, msg: &SocketMsg, data: &[u8]) -> Result<usize> {
        let s = self.require(d)?;
        if s.ty == SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        if s.ty == SocketType::RawEth {
            let _ = msg.ethernet.ok_or(NetError::InvalidParameter)?;
            return Ok(data.len());
        }
        let _ = msg.dest_addr;
        Ok(data.len())
    }

    /// Deliver a datagram to `d`'s receive queue (called by the external
    /// IP/demux layer on inbound traffic, not by application code).
    pub fn deliver(
        &mut self,
        d: usize,
        src_addr: IpAddr,
        src_port: u16,
        ethernet: Option<EthernetHeader>,
        data: &[u8],
    ) -> Result<()> {
        let s = self.require(d)?;
        let buf = NetBuffer::from_slice(data)?;
        if s.receive_queue.len() == s.receive_queue.capacity() {
            s.receive_queue.pop_front();
        }
        s.receive_queue
            .push_back(QueuedDatagram { src_addr, src_port, ethernet, data: buf })
            .map_err(|_| NetError::NoResource)?;
        s.post_event(events::READABLE);
        Ok(())
    }

    /// `receive_from`/`receive_ex`. For STREAM the "source" is the
    /// connected remote endpoint and the "destination" is the bound local
    /// endpoint, since there's exactly one peer; for DGRAM/RAW it's
    /// whatever the queued datagram recorded.
    pub fn receive_from(
        &mut self,
        d: usize,
        out: &mut [u8],
    ) -> Result<(usize, IpAddr, u16)> {
        let s = self.require(d)?;
        match s.ty {
            SocketType::Dgram | SocketType::RawIp | SocketType::RawEth => {
                let dg = s.receive_queue.pop_front().ok_or(NetError::BufferEmpty)?;
                if s.receive_queue.is_empty() {
                    s.clear_event(events::READABLE);
                }
                let n = dg.data.len().min(out.len());
                out[..n].copy_from_slice(&dg.data.as_slice()[..n]);
                let total = if s.ty == SocketType::RawEth {
                    n + ETHERNET_HEADER_LEN
                } else {
                    n
                };
                Ok((total, dg.src_addr, dg.src_port))
            }
            SocketType::Stream => Err(NetError::NotImplemented),
            SocketType::Unused => unreachable!(),
        }
    }

    pub fn receive(&mut self, d: usize, out: &mut [u8]) -> Result<usize> {
        self.receive_from(d, out).map(|(n, _, _)| n)
    }

    pub fn shutdown(&mut self, d: usize, how: ShutdownHow) -> Result<()> {
        let s = self.require(d)?;
        if s.ty != SocketType::Stream {
            return Err(NetError::InvalidSocket);
        }
        let _ = how;
        Ok(())
    }

    /// `close`: never fails. For DGRAM/RAW walks the multicast-group
    /// slots so callers can re-derive interface state (§4.1); for STREAM,
    /// aborts the (external) connection. In all cases frees the receive
    /// queue and marks the slot `Unused`.
    pub fn close(&mut self, d: usize) -> heapless::Vec<(usize, crate::addr::Ipv4Addr), K_GRP> {
        let mut left_ipv4 = heapless::Vec::new();
        if let Some(s) = self.get_mut(d) {
            s.post_event(events::CLOSED);
            for g in s.ipv4_groups.iter() {
                let _ = left_ipv4.push((g.interface(), g.addr().unwrap()));
            }
            self.sockets[d] = Socket::unused(d);
        }
        left_ipv4
    }

    /// A socket's current `event_flags & event_mask`, for `poll`.
    pub fn poll_flags(&self, d: usize, mask: u32) -> Result<u32> {
        Ok(self.get(d).ok_or(NetError::InvalidSocket)?.flags_matching(mask))
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the first 14 bytes of a RAW_ETH `sendto` buffer into its header,
/// per §4.1.
pub fn parse_ethernet_header(data: &[u8]) -> Result<EthernetHeader> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(NetError::InvalidLength);
    }
    let mut dst = [0u8; 6];
    dst.copy_from_slice(&data[0..6]);
    let mut src = [0u8; 6];
    src.copy_from_slice(&data[6..12]);
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    Ok(EthernetHeader {
        dest_mac: crate::addr::MacAddr(dst),
        src_mac: crate::addr::MacAddr(src),
        ethertype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{Ipv4Addr, MacAddr};

    #[test]
    fn open_bind_close_lifecycle() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Dgram, 0).unwrap();
        assert_eq!(table.get(d).unwrap().socket_type(), SocketType::Dgram);

        table.bind(d, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000).unwrap();
        assert_eq!(
            table.get(d).unwrap().local_addr(),
            (Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))), 5000)
        );

        let left = table.close(d);
        assert!(left.is_empty());
        assert!(table.get(d).is_none());
    }

    #[test]
    fn bind_rejects_raw_eth() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::RawEth, 0x0800).unwrap();
        assert_eq!(
            table.bind(d, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            Err(NetError::InvalidSocket)
        );
    }

    #[test]
    fn sendto_broadcast_requires_option() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Dgram, 0).unwrap();
        let broadcast = IpAddr::V4(Ipv4Addr::BROADCAST);
        assert_eq!(
            table.sendto(d, broadcast, 9, b"hi"),
            Err(NetError::InvalidParameter)
        );
        table.enable_broadcast(d, true).unwrap();
        assert_eq!(table.sendto(d, broadcast, 9, b"hi"), Ok(2));
    }

    #[test]
    fn scenario_raw_eth_round_trip() {
        let dest_mac = MacAddr::new([0xff; 6]);
        let src_mac = MacAddr::new([0x02, 0, 0, 0, 0, 7]);
        let ethertype: u16 = 0x88b5;
        let payload = b"hello ethernet";

        let mut frame = heapless::Vec::<u8, 64>::new();
        frame.extend_from_slice(&dest_mac.0).unwrap();
        frame.extend_from_slice(&src_mac.0).unwrap();
        frame.extend_from_slice(&ethertype.to_be_bytes()).unwrap();
        frame.extend_from_slice(payload).unwrap();

        let header = parse_ethernet_header(&frame).unwrap();
        assert_eq!(header.dest_mac, dest_mac);
        assert_eq!(header.src_mac, src_mac);
        assert_eq!(header.ethertype, ethertype);

        let mut table = SocketTable::new();
        let d = table.open(SocketType::RawEth, 0).unwrap();

        let sent = table.sendto_raw_eth(d, &frame).unwrap();
        assert_eq!(sent, payload.len());

        table
            .get_mut(d)
            .unwrap()
            .receive_queue
            .push_back(QueuedDatagram {
                src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                src_port: 0,
                ethernet: Some(header),
                data: NetBuffer::from_slice(payload).unwrap(),
            })
            .unwrap();

        let mut out = [0u8; 64];
        let (total, _, _) = table.receive_from(d, &mut out).unwrap();
        assert_eq!(total, payload.len() + ETHERNET_HEADER_LEN);
        assert_eq!(&out[..payload.len()], payload);
    }

    #[test]
    fn receive_queue_drops_oldest_on_overflow() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Dgram, 0).unwrap();
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        for i in 0..(RX_QUEUE_DEPTH as u8 + 1) {
            table.deliver(d, src, 1000, None, &[i]).unwrap();
        }
        let mut out = [0u8; 4];
        let (n, _, _) = table.receive_from(d, &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0], 1, "oldest datagram (index 0) should have been dropped");
    }

    #[test]
    fn listen_and_accept_are_stream_only_stubs() {
        let mut table = SocketTable::new();
        let stream = table.open(SocketType::Stream, 0).unwrap();
        assert_eq!(table.listen(stream, 1), Err(NetError::NotImplemented));
        assert_eq!(table.accept(stream), Err(NetError::NotImplemented));

        let dgram = table.open(SocketType::Dgram, 0).unwrap();
        assert_eq!(table.listen(dgram, 1), Err(NetError::InvalidSocket));
        assert_eq!(table.accept(dgram), Err(NetError::InvalidSocket));
    }

    #[test]
    fn send_uses_connected_remote_endpoint() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Dgram, 0).unwrap();
        assert_eq!(table.send(d, b"hi"), Err(NetError::InvalidParameter));

        let remote = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        table.connect(d, remote, 4242).unwrap();
        assert_eq!(table.send(d, b"hi"), Ok(2));
    }

    #[test]
    fn send_rejects_raw_eth() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::RawEth, 0x0800).unwrap();
        assert_eq!(table.send(d, b"hi"), Err(NetError::InvalidSocket));
    }

    #[test]
    fn multicast_methods_reject_non_dgram_sockets() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Stream, 0).unwrap();
        let group = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 5));
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            table.join_multicast_group(d, 0, group),
            Err(NetError::InvalidSocket)
        );
        assert_eq!(
            table.add_multicast_source(d, 0, group, src),
            Err(NetError::InvalidSocket)
        );
        assert_eq!(
            table.set_multicast_source_filter(d, 0, group, FilterMode::Include, &[]),
            Err(NetError::InvalidSocket)
        );
        assert_eq!(
            table.get_multicast_source_filter(d, 0, group),
            Err(NetError::InvalidSocket)
        );
    }

    #[test]
    fn join_leave_and_source_filter_round_trip() {
        let mut table = SocketTable::new();
        let d = table.open(SocketType::Dgram, 0).unwrap();
        let group = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 5));
        let src_a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let src_b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        table.join_multicast_group(d, 0, group).unwrap();
        table.add_multicast_source(d, 0, group, src_a).unwrap();
        let (mode, sources) = table.get_multicast_source_filter(d, 0, group).unwrap();
        assert_eq!(mode, FilterMode::Include);
        assert_eq!(sources.as_slice(), &[src_a]);

        table.drop_multicast_source(d, 0, group, src_a).unwrap();
        table
            .set_multicast_source_filter(d, 0, group, FilterMode::Exclude, &[src_b])
            .unwrap();
        let (mode, sources) = table.get_multicast_source_filter(d, 0, group).unwrap();
        assert_eq!(mode, FilterMode::Exclude);
        assert_eq!(sources.as_slice(), &[src_b]);

        table.block_multicast_source(d, 0, group, src_b).unwrap();
        table.unblock_multicast_source(d, 0, group, src_b).unwrap();
        table.leave_multicast_group(d, 0, group).unwrap();
    }
}
