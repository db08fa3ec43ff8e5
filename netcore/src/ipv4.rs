// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPv4 instantiation of the generic multicast engine (component E).

use crate::addr::Ipv4Addr;
use crate::config::{K_GRP, N_IF_GRP};
use crate::multicast::{McastFilterTable, McastGroupTable};

pub type Ipv4McastGroups = McastGroupTable<Ipv4Addr, K_GRP>;
pub type Ipv4FilterTable = McastFilterTable<Ipv4Addr, N_IF_GRP>;

/// §4.2: accept iff an entry for `dst` exists and it would admit `src`.
pub fn ipv4_multicast_filter(
    table: &Ipv4FilterTable,
    dst: Ipv4Addr,
    src: Ipv4Addr,
) -> crate::error::Result<()> {
    table.accept(dst, src)
}
