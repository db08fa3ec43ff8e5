// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The IPv4/IPv6 multicast reception state machine (components E, F), §4.2.
//!
//! The two address families are handled by exactly the same algorithm, so
//! it's written once here, generic over `McastAddr`, and `ipv4.rs`/`ipv6.rs`
//! are thin instantiations that also own the MAC-mapping and
//! IGMP/MLD-report-shaped bits that differ between families.

use heapless::Vec;

use crate::addr::MacAddr;
use crate::config::{K_IF_SRC, K_SRC, N_SOCK};
use crate::error::{NetError, Result};

/// An address family usable as a multicast group/source address.
pub trait McastAddr: Copy + Eq + core::fmt::Debug {
    fn is_multicast(&self) -> bool;
    fn multicast_mac(&self) -> MacAddr;
}

impl McastAddr for crate::addr::Ipv4Addr {
    fn is_multicast(&self) -> bool {
        crate::addr::Ipv4Addr::is_multicast(self)
    }
    fn multicast_mac(&self) -> MacAddr {
        MacAddr::from_ipv4_multicast(*self)
    }
}

#[cfg(feature = "ipv6")]
impl McastAddr for crate::addr::Ipv6Addr {
    fn is_multicast(&self) -> bool {
        crate::addr::Ipv6Addr::is_multicast(self)
    }
    fn multicast_mac(&self) -> MacAddr {
        MacAddr::from_ipv6_multicast(*self)
    }
}

/// RFC 3376 / RFC 3810 source filter mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// One `(socket, group)` slot, per §3.
///
/// The "non-existent" state is `(Include, [])`; after any mutation a slot
/// that collapses to that state is freed (`addr = None`).
#[derive(Clone)]
pub struct SocketMulticastGroup<A: McastAddr> {
    addr: Option<A>,
    interface: usize,
    filter_mode: FilterMode,
    sources: Vec<A, K_SRC>,
    /// Set by `join_group`; cleared by `leave_group`. Tracked separately
    /// from `filter_mode` because an any-source join coexists with
    /// source-specific `add_source` calls from the *same* socket only in
    /// the sense that the interface-level reconciliation (not this slot)
    /// forces exclude-any semantics when it sees this flag from any socket.
    any_source: bool,
}

impl<A: McastAddr> SocketMulticastGroup<A> {
    const fn empty() -> Self {
        SocketMulticastGroup {
            addr: None,
            interface: 0,
            filter_mode: FilterMode::Include,
            sources: Vec::new(),
            any_source: false,
        }
    }

    pub fn addr(&self) -> Option<A> {
        self.addr
    }

    pub fn interface(&self) -> usize {
        self.interface
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    pub fn sources(&self) -> &[A] {
        &self.sources
    }

    pub fn any_source(&self) -> bool {
        self.any_source
    }

    fn is_collapsed(&self) -> bool {
        self.filter_mode == FilterMode::Include && self.sources.is_empty() && !self.any_source
    }
}

/// The fixed-size array of multicast group slots embedded in each socket.
#[derive(Clone)]
pub struct McastGroupTable<A: McastAddr, const K: usize> {
    slots: [SocketMulticastGroup<A>; K],
}

impl<A: McastAddr, const K: usize> McastGroupTable<A, K> {
    pub const fn new() -> Self {
        McastGroupTable {
            slots: [SocketMulticastGroup::empty(); K],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketMulticastGroup<A>> {
        self.slots.iter().filter(|s| s.addr.is_some())
    }

    fn find(&self, interface: usize, group: A) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.addr == Some(group) && s.interface == interface)
    }

    fn find_or_alloc(&mut self, interface: usize, group: A) -> Result<usize> {
        if let Some(i) = self.find(interface, group) {
            return Ok(i);
        }
        let free = self
            .slots
            .iter()
            .position(|s| s.addr.is_none())
            .ok_or(NetError::NoResource)?;
        self.slots[free] = SocketMulticastGroup {
            addr: Some(group),
            interface,
            filter_mode: FilterMode::Include,
            sources: Vec::new(),
            any_source: false,
        };
        Ok(free)
    }

    fn free_if_collapsed(&mut self, i: usize) {
        if self.slots[i].is_collapsed() {
            self.slots[i] = SocketMulticastGroup::empty();
        }
    }

    /// `join_group`: an any-source join. Per §4.2 the slot "adopts
    /// `(Exclude, {})` semantics" at reconciliation time; we record that
    /// directly via the `any_source` flag rather than faking an `Exclude`
    /// mode the socket never asked for, so `get_source_filter` still
    /// reports what the application actually requested.
    pub fn join_group(&mut self, interface: usize, group: A) -> Result<()> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        let i = self.find_or_alloc(interface, group)?;
        self.slots[i].any_source = true;
        Ok(())
    }

    pub fn leave_group(&mut self, interface: usize, group: A) -> Result<()> {
        let i = self.find(interface, group).ok_or(NetError::AddressNotFound)?;
        self.slots[i].any_source = false;
        self.free_if_collapsed(i);
        Ok(())
    }

    pub fn add_source(&mut self, interface: usize, group: A, src: A) -> Result<()> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        let i = self.find_or_alloc(interface, group)?;
        let slot = &mut self.slots[i];
        if slot.filter_mode == FilterMode::Exclude {
            slot.filter_mode = FilterMode::Include;
            slot.sources.clear();
        }
        if !slot.sources.contains(&src) {
            slot.sources
                .push(src)
                .map_err(|_| NetError::NoResource)?;
        }
        Ok(())
    }

    pub fn drop_source(&mut self, interface: usize, group: A, src: A) -> Result<()> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        let i = self.find(interface, group).ok_or(NetError::AddressNotFound)?;
        let slot = &mut self.slots[i];
        if slot.filter_mode == FilterMode::Include {
            if let Some(pos) = slot.sources.iter().position(|s| *s == src) {
                slot.sources.swap_remove(pos);
            }
        }
        self.free_if_collapsed(i);
        Ok(())
    }

    pub fn block_source(&mut self, interface: usize, group: A, src: A) -> Result<()> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        let i = self.find_or_alloc(interface, group)?;
        let slot = &mut self.slots[i];
        if slot.filter_mode == FilterMode::Include {
            slot.filter_mode = FilterMode::Exclude;
            slot.sources.clear();
        }
        if !slot.sources.contains(&src) {
            slot.sources
                .push(src)
                .map_err(|_| NetError::NoResource)?;
        }
        Ok(())
    }

    pub fn unblock_source(&mut self, interface: usize, group: A, src: A) -> Result<()> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        let i = self.find(interface, group).ok_or(NetError::AddressNotFound)?;
        let slot = &mut self.slots[i];
        if slot.filter_mode == FilterMode::Exclude {
            if let Some(pos) = slot.sources.iter().position(|s| *s == src) {
                slot.sources.swap_remove(pos);
            }
        }
        Ok(())
    }

    pub fn set_source_filter(
        &mut self,
        interface: usize,
        group: A,
        mode: FilterMode,
        sources: &[A],
    ) -> Result<()> {
        if sources.len() > K_SRC {
            return Err(NetError::InvalidParameter);
        }
        if mode == FilterMode::Include && sources.is_empty() {
            if let Some(i) = self.find(interface, group) {
                self.slots[i] = SocketMulticastGroup::empty();
            }
            return Ok(());
        }
        let i = self.find_or_alloc(interface, group)?;
        let mut v = Vec::new();
        for s in sources {
            v.push(*s).map_err(|_| NetError::InvalidParameter)?;
        }
        self.slots[i].filter_mode = mode;
        self.slots[i].sources = v;
        self.slots[i].any_source = false;
        Ok(())
    }

    /// `ipv4_get_multicast_source_filter`/`ipv6_get_multicast_source_filter`.
    ///
    /// Documented ambiguity (§9): when no slot exists this returns
    /// `(Exclude, [])` even though the "non-existent" state is elsewhere
    /// defined as `(Include, [])`. That asymmetry is in the source this
    /// design is based on and is reproduced here deliberately.
    pub fn get_source_filter(&self, interface: usize, group: A) -> (FilterMode, Vec<A, K_SRC>) {
        match self.find(interface, group) {
            Some(i) => (self.slots[i].filter_mode, self.slots[i].sources.clone()),
            None => (FilterMode::Exclude, Vec::new()),
        }
    }

    pub fn remove_interface(&mut self, interface: usize) {
        for slot in &mut self.slots {
            if slot.interface == interface {
                *slot = SocketMulticastGroup::empty();
            }
        }
    }
}

impl<A: McastAddr, const K: usize> Default for McastGroupTable<A, K> {
    fn default() -> Self {
        Self::new()
    }
}

/// The reconciled per-interface state for one group, per §3/§4.2.
#[derive(Clone)]
pub struct McastFilterEntry<A: McastAddr> {
    addr: A,
    any_source_ref_count: u16,
    mac_filter_configured: bool,
    mode: FilterMode,
    sources: Vec<A, K_IF_SRC>,
}

impl<A: McastAddr> McastFilterEntry<A> {
    pub fn addr(&self) -> A {
        self.addr
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn sources(&self) -> &[A] {
        &self.sources
    }

    pub fn mac_filter_configured(&self) -> bool {
        self.mac_filter_configured
    }

    /// §4.2 inbound acceptance test.
    pub fn accepts(&self, src: A) -> bool {
        match self.mode {
            FilterMode::Include => self.sources.contains(&src),
            FilterMode::Exclude => !self.sources.contains(&src),
        }
    }

    fn has_reception_state(&self) -> bool {
        match self.mode {
            FilterMode::Exclude => true,
            FilterMode::Include => !self.sources.is_empty(),
        }
    }
}

/// Table of reconciled per-interface multicast state, plus the mechanics of
/// §4.2's reconciliation algorithm. One of these (per address family) lives
/// on each `Interface`.
pub struct McastFilterTable<A: McastAddr, const N: usize> {
    entries: [Option<McastFilterEntry<A>>; N],
}

impl<A: McastAddr, const N: usize> McastFilterTable<A, N> {
    pub fn new() -> Self {
        // `Option<McastFilterEntry<A>>` isn't `Copy` (it holds a `Vec`), so
        // the `[None; N]` const-array shorthand doesn't apply here.
        McastFilterTable {
            entries: core::array::from_fn(|_| None),
        }
    }

    pub fn find(&self, addr: A) -> Option<&McastFilterEntry<A>> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref())
            .find(|e| e.addr == addr)
    }

    /// §4.2 inbound acceptance: `Accept` iff an entry exists for `dst` and
    /// it would admit `src`.
    pub fn accept(&self, dst: A, src: A) -> Result<()> {
        match self.find(dst) {
            Some(e) if e.accepts(src) => Ok(()),
            _ => Err(NetError::InvalidAddress),
        }
    }

    fn find_mut(&mut self, addr: A) -> Option<&mut McastFilterEntry<A>> {
        self.entries
            .iter_mut()
            .filter_map(|e| e.as_mut())
            .find(|e| e.addr == addr)
    }

    fn entry_mut_or_insert(&mut self, addr: A) -> Result<&mut McastFilterEntry<A>> {
        if self.find(addr).is_none() {
            let free = self
                .entries
                .iter()
                .position(|e| e.is_none())
                .ok_or(NetError::NoResource)?;
            self.entries[free] = Some(McastFilterEntry {
                addr,
                any_source_ref_count: 0,
                mac_filter_configured: false,
                mode: FilterMode::Include,
                sources: Vec::new(),
            });
        }
        Ok(self.find_mut(addr).unwrap())
    }

    fn remove(&mut self, addr: A) {
        if let Some(slot) = self.entries.iter_mut().find(|e| {
            e.as_ref().map(|e| e.addr) == Some(addr)
        }) {
            *slot = None;
        }
    }

    /// Recompute the per-interface state for `group` from the terminal set
    /// of matching socket slots, per the normative algorithm in §4.2, then
    /// drive the MAC filter and the IGMP/MLD hook.
    ///
    /// Returns `true` if the resulting reception state changed in a way
    /// that callers should act on (this crate's own NIC-filter/hook
    /// updates are already applied by the time this returns; the return
    /// value is informational, e.g. for tests).
    pub fn reconcile<'s>(
        &mut self,
        group: A,
        socket_slots: impl Iterator<Item = (FilterMode, &'s [A])>,
        mut on_change: impl FnMut(A, FilterMode, &[A]),
    ) -> Result<bool>
    where
        A: 's,
    {
        let mut all_include = true;
        let mut all_exclude = true;
        let mut include_union: Vec<A, K_IF_SRC> = Vec::new();
        let mut exclude_sets: Vec<Vec<A, K_IF_SRC>, N_SOCK> = Vec::new();
        let mut saw_any = false;

        for (mode, sources) in socket_slots {
            saw_any = true;
            match mode {
                FilterMode::Include => {
                    all_exclude = false;
                    for s in sources {
                        if !include_union.contains(s) {
                            let _ = include_union.push(*s);
                        }
                    }
                }
                FilterMode::Exclude => {
                    all_include = false;
                    let mut v: Vec<A, K_IF_SRC> = Vec::new();
                    for s in sources {
                        let _ = v.push(*s);
                    }
                    let _ = exclude_sets.push(v);
                }
            }
        }

        let entry = self.entry_mut_or_insert(group)?;
        // any_source_ref_count is tracked by McastFilterTable::note_any_source,
        // called directly from join_group/leave_group; read it here.
        let any_source = entry.any_source_ref_count > 0;

        if !saw_any && entry.any_source_ref_count == 0 {
            // No socket references this group at all any more.
            self.remove(group);
            on_change(group, FilterMode::Include, &[]);
            return Ok(true);
        }

        let (new_mode, new_sources): (FilterMode, Vec<A, K_IF_SRC>) = if any_source {
            (FilterMode::Exclude, Vec::new())
        } else if all_include {
            (FilterMode::Include, include_union)
        } else if all_exclude {
            // Intersection of all EXCLUDE source lists.
            let mut iter = exclude_sets.into_iter();
            let mut acc = iter.next().unwrap_or_default();
            for s in iter {
                acc.retain(|x| s.contains(x));
            }
            (FilterMode::Exclude, acc)
        } else {
            // Mixed: (union of EXCLUDE sources) \ (union of INCLUDE sources).
            let mut acc: Vec<A, K_IF_SRC> = Vec::new();
            for s in &exclude_sets {
                for x in s {
                    if !acc.contains(x) {
                        let _ = acc.push(*x);
                    }
                }
            }
            acc.retain(|x| !include_union.contains(x));
            (FilterMode::Exclude, acc)
        };

        let entry = self.entry_mut_or_insert(group)?;
        entry.mode = new_mode;
        entry.sources = new_sources;
        let reception = entry.has_reception_state();

        if reception && !entry.mac_filter_configured {
            entry.mac_filter_configured = true;
        } else if !reception && entry.mac_filter_configured {
            entry.mac_filter_configured = false;
        }

        let (mode, sources, delete) = {
            let e = self.find(group).unwrap();
            (e.mode, e.sources.clone(), !e.has_reception_state())
        };
        on_change(group, mode, &sources);

        if delete {
            self.remove(group);
        }

        Ok(true)
    }

    /// Record (or clear) an any-source join against this group's entry,
    /// independent of the per-socket slot set, because `any_source_ref_count`
    /// is tracked at the interface level per §3.
    pub fn note_any_source(&mut self, group: A, delta: i8) -> Result<()> {
        let entry = self.entry_mut_or_insert(group)?;
        if delta > 0 {
            entry.any_source_ref_count += 1;
        } else if entry.any_source_ref_count > 0 {
            entry.any_source_ref_count -= 1;
        }
        Ok(())
    }

    pub fn mac_filter_entries(&self) -> impl Iterator<Item = (A, MacAddr)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref())
            .filter(|e| e.mac_filter_configured)
            .map(|e| (e.addr, e.addr.multicast_mac()))
    }
}

impl<A: McastAddr, const N: usize> Default for McastFilterTable<A, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Addr;
    use crate::config::{K_GRP, N_IF_GRP};

    const GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 2, 3);
    const SRC_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const SRC_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);

    fn reconcile_from(
        filters: &mut McastFilterTable<Ipv4Addr, N_IF_GRP>,
        slots: &[(FilterMode, &[Ipv4Addr])],
    ) -> Option<(FilterMode, heapless::Vec<Ipv4Addr, K_IF_SRC>)> {
        filters
            .reconcile(GROUP, slots.iter().map(|(m, s)| (*m, *s)), |_, _, _| {})
            .unwrap();
        filters
            .find(GROUP)
            .map(|e| (e.mode(), Vec::from_slice(e.sources()).unwrap()))
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let mut filters: McastFilterTable<Ipv4Addr, N_IF_GRP> = McastFilterTable::new();
        let slots: [(FilterMode, &[Ipv4Addr]); 2] = [
            (FilterMode::Include, &[SRC_A]),
            (FilterMode::Include, &[SRC_B]),
        ];
        let first = reconcile_from(&mut filters, &slots);
        let second = reconcile_from(&mut filters, &slots);
        assert_eq!(first.unwrap().1, second.unwrap().1);
    }

    #[test]
    fn scenario_multicast_reconciliation() {
        let mut sock1: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let mut sock2: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        sock1.add_source(0, GROUP, SRC_A).unwrap();
        sock2.add_source(0, GROUP, SRC_B).unwrap();

        let mut filters: McastFilterTable<Ipv4Addr, N_IF_GRP> = McastFilterTable::new();

        let slot1 = sock1.get_source_filter(0, GROUP);
        let slot2 = sock2.get_source_filter(0, GROUP);
        let slots = [
            (slot1.0, slot1.1.as_slice()),
            (slot2.0, slot2.1.as_slice()),
        ];
        let mut seen = None;
        filters
            .reconcile(GROUP, slots.into_iter(), |g, m, s| {
                seen = Some((g, m, heapless::Vec::<Ipv4Addr, K_IF_SRC>::from_slice(s).unwrap()));
            })
            .unwrap();
        let entry = filters.find(GROUP).expect("entry present after join");
        assert_eq!(entry.mode(), FilterMode::Include);
        assert!(entry.sources().contains(&SRC_A));
        assert!(entry.sources().contains(&SRC_B));
        assert!(entry.mac_filter_configured());
        let (_, _, sources) = seen.unwrap();
        assert!(sources.contains(&SRC_A) && sources.contains(&SRC_B));

        // Socket 2 leaves -- the per-interface entry narrows to socket 1's set.
        sock2.drop_source(0, GROUP, SRC_B).unwrap();
        let slot1 = sock1.get_source_filter(0, GROUP);
        let slots = [(slot1.0, slot1.1.as_slice())];
        filters.reconcile(GROUP, slots.into_iter(), |_, _, _| {}).unwrap();
        let entry = filters.find(GROUP).unwrap();
        assert_eq!(entry.sources(), &[SRC_A]);

        // Socket 1 collapses to (Include, {}) -- the group has no reception
        // state left and the entry is removed.
        sock1.set_source_filter(0, GROUP, FilterMode::Include, &[]).unwrap();
        let slots: [(FilterMode, &[Ipv4Addr]); 0] = [];
        filters.reconcile(GROUP, slots.into_iter(), |_, _, _| {}).unwrap();
        assert!(filters.find(GROUP).is_none());
    }

    #[test]
    fn scenario_mixed_mode_override() {
        let mut filters: McastFilterTable<Ipv4Addr, N_IF_GRP> = McastFilterTable::new();
        let exclude_a: [Ipv4Addr; 1] = [SRC_A];
        let include_ab: [Ipv4Addr; 2] = [SRC_A, SRC_B];
        let slots: [(FilterMode, &[Ipv4Addr]); 2] = [
            (FilterMode::Exclude, &exclude_a),
            (FilterMode::Include, &include_ab),
        ];
        filters.reconcile(GROUP, slots.into_iter(), |_, _, _| {}).unwrap();
        let entry = filters.find(GROUP).unwrap();
        assert_eq!(entry.mode(), FilterMode::Exclude);
        assert!(entry.sources().is_empty());
    }

    #[test]
    fn mac_filter_tracks_reception_state() {
        let mut filters: McastFilterTable<Ipv4Addr, N_IF_GRP> = McastFilterTable::new();
        let include_a: [Ipv4Addr; 1] = [SRC_A];
        let slots: [(FilterMode, &[Ipv4Addr]); 1] = [(FilterMode::Include, &include_a)];
        filters.reconcile(GROUP, slots.into_iter(), |_, _, _| {}).unwrap();
        assert!(filters.find(GROUP).unwrap().mac_filter_configured());
        assert_eq!(filters.mac_filter_entries().count(), 1);

        let none_slots: [(FilterMode, &[Ipv4Addr]); 1] = [(FilterMode::Include, &[])];
        filters
            .reconcile(GROUP, none_slots.into_iter(), |_, _, _| {})
            .unwrap();
        assert!(filters.find(GROUP).is_none());
        assert_eq!(filters.mac_filter_entries().count(), 0);
    }

    #[test]
    fn group_table_join_then_leave_collapses_slot() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        table.join_group(0, GROUP).unwrap();
        assert_eq!(table.iter().count(), 1);
        table.leave_group(0, GROUP).unwrap();
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn join_group_rejects_non_multicast_address() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let unicast = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(table.join_group(0, unicast), Err(NetError::InvalidAddress));
    }

    #[test]
    fn add_source_rejects_non_multicast_group() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let unicast = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            table.add_source(0, unicast, SRC_A),
            Err(NetError::InvalidAddress)
        );
    }

    #[test]
    fn drop_source_rejects_non_multicast_group() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let unicast = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            table.drop_source(0, unicast, SRC_A),
            Err(NetError::InvalidAddress)
        );
    }

    #[test]
    fn block_source_rejects_non_multicast_group() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let unicast = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            table.block_source(0, unicast, SRC_A),
            Err(NetError::InvalidAddress)
        );
    }

    #[test]
    fn unblock_source_rejects_non_multicast_group() {
        let mut table: McastGroupTable<Ipv4Addr, K_GRP> = McastGroupTable::new();
        let unicast = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(
            table.unblock_source(0, unicast, SRC_A),
            Err(NetError::InvalidAddress)
        );
    }
}
