// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPv6 instantiation of the generic multicast engine (component F).
//!
//! Everything here behaves identically to `ipv4.rs`'s instantiation except
//! for the MAC mapping (`33:33` + low 32 bits) baked into `McastAddr for
//! Ipv6Addr`, per §4.2 / §6.

use crate::addr::Ipv6Addr;
use crate::config::{K_GRP, N_IF_GRP};
use crate::multicast::{McastFilterTable, McastGroupTable};

pub type Ipv6McastGroups = McastGroupTable<Ipv6Addr, K_GRP>;
pub type Ipv6FilterTable = McastFilterTable<Ipv6Addr, N_IF_GRP>;

pub fn ipv6_multicast_filter(
    table: &Ipv6FilterTable,
    dst: Ipv6Addr,
    src: Ipv6Addr,
) -> crate::error::Result<()> {
    table.accept(dst, src)
}
