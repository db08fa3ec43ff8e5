// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `get_host_by_name` (component I), §4.5.
//!
//! This crate doesn't implement DNS, mDNS, NBNS or LLMNR itself (§1) --
//! those are external collaborators reached through the `Resolver` trait.
//! What this module owns is the facade: short-circuiting a literal IP
//! address without touching any resolver, and picking which resolver to
//! try for a hostname by the same name-shape heuristic the C sources use.

use crate::addr::{IpAddr, Ipv4Addr};
#[cfg(feature = "ipv6")]
use crate::addr::Ipv6Addr;
use crate::error::{NetError, Result};

/// Longest hostname `get_host_by_name` accepts, including the terminator.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// A pluggable name resolution backend (DNS unicast, mDNS, NBNS, LLMNR).
/// Supplied by the caller; this crate only sequences which one to try, per
/// §4.5.
pub trait Resolver {
    /// Attempt to resolve `name`. `Err(NetError::AddressNotFound)` means
    /// "this resolver doesn't have an answer", distinct from a transport
    /// failure, which should still return `AddressNotFound` to the facade
    /// (there is no separate retry policy at this layer).
    fn resolve(&mut self, name: &str, prefer: AddressFamily) -> Result<IpAddr>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    V4,
    #[cfg(feature = "ipv6")]
    V6,
    Unspecified,
}

/// Which protocol `get_host_by_name` picked to resolve a non-literal name,
/// per the §4.5 step 4 heuristic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResolverKind {
    Dns,
    Mdns,
    Nbns,
    Llmnr,
}

/// The resolvers configured for this stack, one slot per kind. A `None`
/// slot means that protocol isn't compiled in or configured; picking it
/// yields `NetError::InvalidParameter` (§4.5 step 5).
#[derive(Default)]
pub struct Resolvers<'a> {
    pub dns: Option<&'a mut dyn Resolver>,
    pub mdns: Option<&'a mut dyn Resolver>,
    pub nbns: Option<&'a mut dyn Resolver>,
    pub llmnr: Option<&'a mut dyn Resolver>,
}

impl<'a> Resolvers<'a> {
    fn get_mut(&mut self, kind: ResolverKind) -> Option<&mut dyn Resolver> {
        match kind {
            ResolverKind::Dns => self.dns.as_deref_mut(),
            ResolverKind::Mdns => self.mdns.as_deref_mut(),
            ResolverKind::Nbns => self.nbns.as_deref_mut(),
            ResolverKind::Llmnr => self.llmnr.as_deref_mut(),
        }
    }
}

/// Parses a dotted-decimal IPv4 literal (`"a.b.c.d"`), no DNS involved.
/// Used by the literal-address short-circuit in `get_host_by_name`.
pub fn parse_ipv4_literal(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut n = 0;
    for (i, part) in s.split('.').enumerate() {
        if i >= 4 || part.is_empty() || part.len() > 3 {
            return None;
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let v: u32 = part.parse().ok()?;
        if v > 255 {
            return None;
        }
        octets[i] = v as u8;
        n += 1;
    }
    if n == 4 {
        Some(Ipv4Addr(octets))
    } else {
        None
    }
}

/// Parses a colon-hex IPv6 literal. Deliberately limited to the
/// fully-expanded form (no `::` compression, no embedded IPv4 tail) --
/// anything fancier belongs to a real resolver library, not this facade.
#[cfg(feature = "ipv6")]
pub fn parse_ipv6_literal(s: &str) -> Option<Ipv6Addr> {
    let mut out = [0u8; 16];
    let mut n = 0;
    for (i, g) in s.split(':').enumerate() {
        if i >= 8 || g.is_empty() || g.len() > 4 {
            return None;
        }
        let v = u16::from_str_radix(g, 16).ok()?;
        out[i * 2] = (v >> 8) as u8;
        out[i * 2 + 1] = (v & 0xff) as u8;
        n += 1;
    }
    if n == 8 {
        Some(Ipv6Addr(out))
    } else {
        None
    }
}

/// §4.5 step 4: pick a resolver by the shape of `name` when the caller
/// hasn't overridden the choice.
///
/// - Ends in `.local` (case-insensitive), at least 6 characters -> mDNS.
/// - No dot, at most 15 characters, IPv4 family -> NBNS (or LLMNR if NBNS
///   isn't configured).
/// - No dot -> LLMNR.
/// - Otherwise -> DNS.
fn select_resolver(name: &str, family: AddressFamily, nbns_configured: bool) -> ResolverKind {
    if name.len() >= 6 && name.len() <= MAX_HOSTNAME_LEN {
        let suffix_start = name.len() - 6;
        if name.as_bytes()[suffix_start..].eq_ignore_ascii_case(b".local") {
            return ResolverKind::Mdns;
        }
    }
    let has_dot = name.contains('.');
    if !has_dot && name.len() <= 15 && family == AddressFamily::V4 {
        return if nbns_configured {
            ResolverKind::Nbns
        } else {
            ResolverKind::Llmnr
        };
    }
    if !has_dot {
        return ResolverKind::Llmnr;
    }
    ResolverKind::Dns
}

/// §4.5: resolve `name` to an address.
///
/// A literal IPv4 (or, with the `ipv6` feature, IPv6) address short-circuits
/// straight to `Ok` without touching any resolver at all. Otherwise the
/// request is handed to the resolver `select_resolver` picks for `name`'s
/// shape and the requested address family.
pub fn get_host_by_name(
    name: &str,
    prefer: AddressFamily,
    resolvers: &mut Resolvers<'_>,
) -> Result<IpAddr> {
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return Err(NetError::InvalidParameter);
    }

    if let Some(v4) = parse_ipv4_literal(name) {
        return Ok(IpAddr::V4(v4));
    }
    #[cfg(feature = "ipv6")]
    if let Some(v6) = parse_ipv6_literal(name) {
        return Ok(IpAddr::V6(v6));
    }

    let kind = select_resolver(name, prefer, resolvers.nbns.is_some());
    match resolvers.get_mut(kind) {
        Some(r) => r.resolve(name, prefer),
        None => Err(NetError::InvalidParameter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubResolver {
        answer: Result<IpAddr>,
        calls: usize,
    }

    impl Resolver for StubResolver {
        fn resolve(&mut self, _name: &str, _prefer: AddressFamily) -> Result<IpAddr> {
            self.calls += 1;
            self.answer
        }
    }

    #[test]
    fn literal_v4_short_circuits() {
        let mut resolvers = Resolvers::default();
        let ip = get_host_by_name("127.0.0.1", AddressFamily::V4, &mut resolvers).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr([127, 0, 0, 1])));
    }

    #[test]
    fn dotted_name_without_local_suffix_uses_dns() {
        let mut dns = StubResolver {
            answer: Ok(IpAddr::V4(Ipv4Addr([10, 0, 0, 9]))),
            calls: 0,
        };
        let mut resolvers = Resolvers {
            dns: Some(&mut dns),
            ..Default::default()
        };
        let ip = get_host_by_name("host.example.com", AddressFamily::V4, &mut resolvers).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr([10, 0, 0, 9])));
        assert_eq!(dns.calls, 1);
    }

    #[test]
    fn dot_local_suffix_uses_mdns() {
        let mut mdns = StubResolver {
            answer: Ok(IpAddr::V4(Ipv4Addr([192, 168, 1, 2]))),
            calls: 0,
        };
        let mut resolvers = Resolvers {
            mdns: Some(&mut mdns),
            ..Default::default()
        };
        let ip = get_host_by_name("printer.local", AddressFamily::V4, &mut resolvers).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr([192, 168, 1, 2])));
        assert_eq!(mdns.calls, 1);
    }

    #[test]
    fn short_undotted_v4_name_prefers_nbns_over_llmnr() {
        let mut nbns = StubResolver {
            answer: Ok(IpAddr::V4(Ipv4Addr([10, 1, 1, 1]))),
            calls: 0,
        };
        let mut llmnr = StubResolver {
            answer: Ok(IpAddr::V4(Ipv4Addr([10, 2, 2, 2]))),
            calls: 0,
        };
        let mut resolvers = Resolvers {
            nbns: Some(&mut nbns),
            llmnr: Some(&mut llmnr),
            ..Default::default()
        };
        let ip = get_host_by_name("workstation1", AddressFamily::V4, &mut resolvers).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr([10, 1, 1, 1])));
        assert_eq!(nbns.calls, 1);
        assert_eq!(llmnr.calls, 0);
    }

    #[test]
    fn short_undotted_name_falls_back_to_llmnr_without_nbns() {
        let mut llmnr = StubResolver {
            answer: Ok(IpAddr::V4(Ipv4Addr([10, 2, 2, 2]))),
            calls: 0,
        };
        let mut resolvers = Resolvers {
            llmnr: Some(&mut llmnr),
            ..Default::default()
        };
        let ip = get_host_by_name("workstation1", AddressFamily::V4, &mut resolvers).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr([10, 2, 2, 2])));
        assert_eq!(llmnr.calls, 1);
    }

    #[test]
    fn unconfigured_resolver_is_invalid_parameter() {
        let mut resolvers = Resolvers::default();
        let err = get_host_by_name("host.example.com", AddressFamily::V4, &mut resolvers)
            .unwrap_err();
        assert_eq!(err, NetError::InvalidParameter);
    }

    #[test]
    fn empty_name_is_invalid_parameter() {
        let mut resolvers = Resolvers::default();
        let err = get_host_by_name("", AddressFamily::V4, &mut resolvers).unwrap_err();
        assert_eq!(err, NetError::InvalidParameter);
    }
}
