#![no_std]
#![no_main]

//! Demo/integration binary for `netcore`.
//!
//! This crate owns none of the hard parts (they live in `netcore`); its only
//! job is to show how a board brings the library to life: a `NicDriver`
//! impl, a `Clock`, a `NetEvent`, and a task-context main loop that drives
//! `Net::tick` and feeds received frames to `Net::handle_ethernet_frame`
//! under a single global critical section standing in for the net mutex
//! (§5). A real board replaces `LoopbackNic` with an Ethernet MAC driver and
//! the critical section with whatever IPC/notification primitive its kernel
//! provides; nothing in `netcore` assumes either choice.

use cortex_m_rt::entry;
use heapless::Deque;
use panic_halt as _;

use netcore::addr::MacAddr;
use netcore::buffer::{NetBuffer, TxAncillary};
use netcore::event::{Clock, NetEvent};
use netcore::nic::{MacFilterEntry, MacType, NicDriver, NicFlags};
use netcore::socket::SocketType;
use netcore::Net;

/// A NIC driver with no hardware behind it: every transmitted frame is
/// folded straight back into the receive queue. Good enough to exercise
/// `Net`'s send/ARP/receive paths without a board.
struct LoopbackNic {
    rx_queue: Deque<NetBuffer, 8>,
    filter: heapless::Vec<MacFilterEntry, 8>,
}

impl LoopbackNic {
    const fn new() -> Self {
        LoopbackNic {
            rx_queue: Deque::new(),
            filter: heapless::Vec::new(),
        }
    }
}

impl NicDriver for LoopbackNic {
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
    ) -> netcore::error::Result<()> {
        let looped = NetBuffer::from_slice(&buffer.as_slice()[offset..])?;
        self.rx_queue
            .push_back(looped)
            .map_err(|_| netcore::error::NetError::NoResource)?;
        Ok(())
    }

    fn update_mac_addr_filter(&mut self, filter: &[MacFilterEntry]) {
        self.filter.clear();
        for entry in filter {
            let _ = self.filter.push(*entry);
        }
    }

    fn write_phy_reg(&mut self, _phy_addr: u8, _reg: u8, _value: u16) {}
    fn read_phy_reg(&mut self, _phy_addr: u8, _reg: u8) -> u16 {
        0
    }

    fn flags(&self) -> NicFlags {
        NicFlags {
            mac_type: MacType::Ethernet,
            mtu: 1500,
            native_link_state: true,
        }
    }
}

/// A millisecond clock driven by DWT's cycle counter, the usual
/// Cortex-M-without-an-RTOS substitute for a real monotonic timer.
struct CycleClock {
    cycles_per_ms: u64,
}

impl Clock for CycleClock {
    fn now_ms(&self) -> u64 {
        let cycles = cortex_m::peripheral::DWT::cycle_count() as u64;
        cycles / self.cycles_per_ms
    }
}

/// The doorbell a NIC ISR rings and a task-context `poll` waits on (§5).
/// Backed by a plain flag behind a critical section rather than an atomic,
/// since not every Cortex-M core this might run on has atomic CAS.
struct CriticalSectionEvent {
    flag: core::cell::UnsafeCell<bool>,
}

unsafe impl Sync for CriticalSectionEvent {}

impl CriticalSectionEvent {
    const fn new() -> Self {
        CriticalSectionEvent {
            flag: core::cell::UnsafeCell::new(false),
        }
    }
}

impl NetEvent for CriticalSectionEvent {
    fn signal(&self) {
        critical_section::with(|_| {
            // Safety: only ever touched inside a critical section.
            unsafe { *self.flag.get() = true };
        });
    }

    fn wait(&self, timeout_ms: Option<u64>) -> bool {
        // No scheduler here to actually suspend on; a real board's `Clock`
        // and kernel notification primitive replace this with a blocking
        // receive. We busy-poll up to `timeout_ms` (or once, if None means
        // "forever" on real hardware -- the demo just returns immediately).
        let _ = timeout_ms;
        critical_section::with(|_| {
            // Safety: only ever touched inside a critical section.
            let signaled = unsafe { *self.flag.get() };
            signaled
        })
    }

    fn reset(&self) {
        critical_section::with(|_| {
            // Safety: only ever touched inside a critical section.
            unsafe { *self.flag.get() = false };
        });
    }
}

static WAIT_EVENT: CriticalSectionEvent = CriticalSectionEvent::new();

#[entry]
fn main() -> ! {
    let mac = MacAddr([0x02, 0x04, 0x06, 0x08, 0x0a, 0x0c]);
    let nic = LoopbackNic::new();
    let mut net = Net::new(nic, mac).unwrap_or_else(|_| panic!());

    // Core clock for the Nucleo-H743 this demo targets; a real board reads
    // this from its clock tree instead of hard-coding it.
    const CORE_CLOCK_HZ: u64 = 400_000_000;
    let clock = CycleClock {
        cycles_per_ms: CORE_CLOCK_HZ / 1000,
    };

    let udp = net
        .sockets_mut()
        .open(SocketType::Dgram, 0)
        .unwrap_or_else(|_| panic!());
    let _ = net.sockets_mut().bind(
        udp,
        netcore::addr::IpAddr::V4(netcore::addr::Ipv4Addr::UNSPECIFIED),
        0,
    );

    let mut last_tick_ms = clock.now_ms();
    loop {
        let now = clock.now_ms();
        if now.wrapping_sub(last_tick_ms) >= 100 {
            net.tick(now);
            last_tick_ms = now;
        }

        while let Some(frame) = net.interface_mut().nic_mut().rx_queue.pop_front() {
            net.handle_ethernet_frame(frame.as_slice(), now);
        }

        WAIT_EVENT.wait(Some(10));
        WAIT_EVENT.reset();
    }
}

