// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address types shared across the socket table, the multicast filters and
//! ARP. Deliberately minimal: no string parsing, no subnet math beyond what
//! the multicast/ARP state machines need.

use zerocopy::{Immutable, IntoBytes};

/// A hardware (Ethernet) address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoBytes, Immutable)]
#[repr(C)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const UNSPECIFIED: MacAddr = MacAddr([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    /// True for multicast and broadcast addresses alike (I/G bit set).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// The multicast MAC that IPv4 group `group` maps onto: `01:00:5E` plus
    /// the low 23 bits of the group address.
    pub fn from_ipv4_multicast(group: Ipv4Addr) -> MacAddr {
        let o = group.0;
        MacAddr([0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]])
    }

    /// The multicast MAC that IPv6 group `group` maps onto: `33:33` plus the
    /// low 32 bits of the group address.
    pub fn from_ipv6_multicast(group: Ipv6Addr) -> MacAddr {
        let o = group.0;
        MacAddr([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }
}

/// An IPv4 address, stored in network byte order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    pub const UNSPECIFIED: Ipv4Addr = Ipv4Addr([0, 0, 0, 0]);
    pub const BROADCAST: Ipv4Addr = Ipv4Addr([255, 255, 255, 255]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Addr([a, b, c, d])
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// `224.0.0.0/4`.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0xf0 == 0xe0
    }

    /// A directed broadcast against `netmask`, e.g. `10.0.0.255/24`.
    pub fn is_directed_broadcast(&self, local: Ipv4Addr, netmask: Ipv4Addr) -> bool {
        (0..4).all(|i| {
            let host_bits = !netmask.0[i];
            (self.0[i] & !host_bits) == (local.0[i] & !host_bits)
                && (self.0[i] | host_bits) == self.0[i]
        })
    }
}

/// An IPv6 address, stored in network byte order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Ipv6Addr(pub [u8; 16]);

impl Ipv6Addr {
    pub const UNSPECIFIED: Ipv6Addr = Ipv6Addr([0; 16]);

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// `ff00::/8`.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }
}

/// An address-family-generic IP address.
///
/// `SocketMulticastGroup::addr` and friends are described in the design
/// document as "length 0 for free, 4 for IPv4, 16 for IPv6"; this type is the
/// typed equivalent of that encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpAddr {
    V4(Ipv4Addr),
    #[cfg(feature = "ipv6")]
    V6(Ipv6Addr),
}

impl IpAddr {
    pub fn is_multicast(&self) -> bool {
        match self {
            IpAddr::V4(a) => a.is_multicast(),
            #[cfg(feature = "ipv6")]
            IpAddr::V6(a) => a.is_multicast(),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        match self {
            IpAddr::V4(a) => a.is_unspecified(),
            #[cfg(feature = "ipv6")]
            IpAddr::V6(a) => a.is_unspecified(),
        }
    }

    pub fn as_v4(&self) -> Option<Ipv4Addr> {
        match self {
            IpAddr::V4(a) => Some(*a),
            #[cfg(feature = "ipv6")]
            _ => None,
        }
    }
}

impl From<Ipv4Addr> for IpAddr {
    fn from(a: Ipv4Addr) -> Self {
        IpAddr::V4(a)
    }
}

#[cfg(feature = "ipv6")]
impl From<Ipv6Addr> for IpAddr {
    fn from(a: Ipv6Addr) -> Self {
        IpAddr::V6(a)
    }
}
