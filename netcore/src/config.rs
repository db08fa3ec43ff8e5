// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time table sizes.
//!
//! The C sources this crate's design is based on select these at
//! preprocessor time; we do the same with plain `const`s so every table is
//! statically allocated and a full build still fits comfortably in a
//! microcontroller's SRAM. A board support package picks its own sizes by
//! wrapping this crate and re-exporting different values, or by vendoring
//! this file -- there is no runtime path that reads these as variables.

/// Socket table depth.
pub const N_SOCK: usize = 8;
/// Multicast group slots per socket.
pub const K_GRP: usize = 4;
/// Source-list depth per socket multicast group.
pub const K_SRC: usize = 8;
/// Source-list depth per per-interface multicast filter entry.
pub const K_IF_SRC: usize = 16;
/// Distinct multicast groups tracked per interface, per address family.
pub const N_IF_GRP: usize = 8;
/// ARP cache depth per interface.
pub const N_ARP: usize = 16;
/// Packets an incomplete ARP entry may hold while resolution is pending.
pub const Q_ARP: usize = 4;
/// Receive queue depth for a DGRAM/RAW socket.
pub const RX_QUEUE_DEPTH: usize = 8;
/// Maximum simultaneous `poll` subscribers per socket.
pub const MAX_SUBSCRIBERS: usize = 4;

pub const MIN_MSS: u16 = 88;
pub const MAX_MSS: u16 = 1460;

pub const MAX_TTL: u8 = 255;
pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_MULTICAST_TTL: u8 = 1;

/// ARP timing, in milliseconds (RFC 826 / RFC 4861 §10 style defaults).
pub const ARP_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const ARP_MAX_REQUESTS: u8 = 3;
pub const ARP_REACHABLE_TIME_MS: u64 = 30_000;
pub const ARP_DELAY_FIRST_PROBE_TIME_MS: u64 = 5_000;
pub const ARP_PROBE_TIMEOUT_MS: u64 = 1_000;
pub const ARP_MAX_PROBES: u8 = 3;
