#![no_std]
//! Driver capability seam consumed by `netcore`'s interface worker.
//!
//! Physical MAC/PHY and Wi-Fi drivers are external collaborators: this
//! crate defines only the narrow contract the interface worker drives
//! them through, plus a deterministic mock pair used by tests. It does
//! not implement a real Ethernet or Wi-Fi driver.

extern crate alloc;

use alloc::vec::Vec;
use bitflags::bitflags;

pub const MAX_FRAME: usize = 1518;

bitflags! {
    /// Driver capability bitset (`get_capabilities`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const RX_IP4_CHECKSUM  = 1 << 0;
        const TX_IP4_CHECKSUM  = 1 << 1;
        const RX_IP6_CHECKSUM  = 1 << 2;
        const TX_IP6_CHECKSUM  = 1 << 3;
        const MAC_FROM_HARDWARE = 1 << 4;
        const EVENT_CALLBACK   = 1 << 5;
        const VLAN_FILTERING   = 1 << 6;
        const MULTICAST_FILTER = 1 << 7;
    }
}

bitflags! {
    /// Flags accompanying `MacDriver::send_frame`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SendFlags: u8 {
        /// More data for this logical frame follows in a subsequent call.
        const FRAGMENT = 1 << 0;
        /// This call completes the frame.
        const BARE = 1 << 1;
    }
}

/// Result of a driver control operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverError {
    Busy,
    NotReady,
    Unsupported,
    Io,
}

/// PHY link state as observed by `poll_link`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub up: bool,
    pub full_duplex: bool,
    pub speed_mbps: u32,
}

impl LinkInfo {
    pub const DOWN: LinkInfo = LinkInfo { up: false, full_duplex: false, speed_mbps: 0 };
}

/// Driver control operations (`control(OP, arg)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlOp {
    Configure,
    RxEnable,
    RxDisable,
    TxEnable,
    TxDisable,
    Flush,
    /// Program the accept/reject VLAN tag; `None` disables tag filtering.
    VlanFilter(Option<u16>),
}

/// The capability interface the interface worker drives: `{send, recv,
/// capabilities, link, filter, control}`.
pub trait MacDriver {
    /// Initialize the driver; `power_control`/`initialize` collapsed into one
    /// call since this seam does not model power states.
    fn initialize(&mut self) -> Result<(), DriverError>;

    fn capabilities(&self) -> Capabilities;

    fn mac_address(&self) -> [u8; 6];
    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), DriverError>;

    fn control(&mut self, op: ControlOp) -> Result<(), DriverError>;

    /// Program the multicast address filter; an empty list and
    /// `Capabilities::MULTICAST_FILTER` unset together mean "accept all
    /// multicast".
    fn set_address_filter(&mut self, macs: &[[u8; 6]]) -> Result<(), DriverError>;

    /// Non-blocking poll of current link state.
    fn poll_link(&mut self) -> LinkInfo;

    /// Maximum single-frame size the driver will hand back from `read_frame`.
    fn rx_frame_size(&self) -> usize;

    /// Drain one queued inbound frame into `buf`, returning the frame length,
    /// or `Ok(0)` if none is queued. A `len == 0` request discards a frame
    /// (`read_frame(buf, len)`).
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;

    /// Send `len` bytes of `buf`. `flags` distinguishes a fragmenting
    /// multi-call send (VLAN insertion path) from a complete one-shot send.
    fn send_frame(&mut self, buf: &[u8], flags: SendFlags) -> Result<(), DriverError>;
}

/// A pair of in-memory drivers wired to each other's RX queues, standing in
/// for a physical link between two interfaces in tests.
pub struct LoopbackPair {
    pub a: MockDriver,
    pub b: MockDriver,
}

impl LoopbackPair {
    pub fn new(mac_a: [u8; 6], mac_b: [u8; 6]) -> Self {
        LoopbackPair { a: MockDriver::new(mac_a), b: MockDriver::new(mac_b) }
    }

    /// Deliver everything `a` has queued for transmit into `b`'s RX queue and
    /// vice versa. Call once per simulated tick in tests.
    pub fn pump(&mut self) {
        let from_a: Vec<Vec<u8>> = self.a.tx_log.drain(..).collect();
        let from_b: Vec<Vec<u8>> = self.b.tx_log.drain(..).collect();
        self.b.rx_queue.extend(from_a);
        self.a.rx_queue.extend(from_b);
    }
}

/// Deterministic software driver used by tests: records every transmitted
/// frame and lets the test harness enqueue inbound frames explicitly.
pub struct MockDriver {
    mac: [u8; 6],
    caps: Capabilities,
    link: LinkInfo,
    filter: Vec<[u8; 6]>,
    accept_all_multicast: bool,
    rx_enabled: bool,
    tx_enabled: bool,
    pub rx_queue: alloc::collections::VecDeque<Vec<u8>>,
    pub tx_log: Vec<Vec<u8>>,
    busy_countdown: u32,
}

impl MockDriver {
    pub fn new(mac: [u8; 6]) -> Self {
        MockDriver {
            mac,
            caps: Capabilities::MULTICAST_FILTER,
            link: LinkInfo { up: true, full_duplex: true, speed_mbps: 100 },
            filter: Vec::new(),
            accept_all_multicast: false,
            rx_enabled: false,
            tx_enabled: false,
            rx_queue: alloc::collections::VecDeque::new(),
            tx_log: Vec::new(),
            busy_countdown: 0,
        }
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.link.up = up;
    }

    /// Make the next `n` sends return `DriverError::Busy` before succeeding,
    /// to exercise the interface worker's bounded retry loop.
    pub fn fail_next_sends(&mut self, n: u32) {
        self.busy_countdown = n;
    }

    pub fn enqueue_rx(&mut self, frame: Vec<u8>) {
        self.rx_queue.push_back(frame);
    }
}

impl MacDriver for MockDriver {
    fn initialize(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn set_mac_address(&mut self, mac: [u8; 6]) -> Result<(), DriverError> {
        self.mac = mac;
        Ok(())
    }

    fn control(&mut self, op: ControlOp) -> Result<(), DriverError> {
        match op {
            ControlOp::Configure => Ok(()),
            ControlOp::RxEnable => {
                self.rx_enabled = true;
                Ok(())
            }
            ControlOp::RxDisable => {
                self.rx_enabled = false;
                Ok(())
            }
            ControlOp::TxEnable => {
                self.tx_enabled = true;
                Ok(())
            }
            ControlOp::TxDisable => {
                self.tx_enabled = false;
                Ok(())
            }
            ControlOp::Flush => {
                self.rx_queue.clear();
                self.tx_log.clear();
                Ok(())
            }
            ControlOp::VlanFilter(_) => {
                if self.caps.contains(Capabilities::VLAN_FILTERING) {
                    Ok(())
                } else {
                    Err(DriverError::Unsupported)
                }
            }
        }
    }

    fn set_address_filter(&mut self, macs: &[[u8; 6]]) -> Result<(), DriverError> {
        if !self.caps.contains(Capabilities::MULTICAST_FILTER) {
            self.accept_all_multicast = true;
            return Err(DriverError::Unsupported);
        }
        self.filter = macs.to_vec();
        self.accept_all_multicast = false;
        Ok(())
    }

    fn poll_link(&mut self) -> LinkInfo {
        self.link
    }

    fn rx_frame_size(&self) -> usize {
        MAX_FRAME
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        if buf.is_empty() {
            self.rx_queue.pop_front();
            return Ok(0);
        }
        match self.rx_queue.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn send_frame(&mut self, buf: &[u8], _flags: SendFlags) -> Result<(), DriverError> {
        if !self.link.up {
            return Err(DriverError::NotReady);
        }
        if self.busy_countdown > 0 {
            self.busy_countdown -= 1;
            return Err(DriverError::Busy);
        }
        self.tx_log.push(buf.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn loopback_pair_delivers_frames() {
        let mut pair = LoopbackPair::new([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1]);
        pair.a.send_frame(&[0xAA; 20], SendFlags::BARE).unwrap();
        pair.pump();
        let mut buf = [0u8; 64];
        let n = pair.b.read_frame(&mut buf).unwrap();
        assert_eq!(n, 20);
        assert_eq!(&buf[..20], &[0xAAu8; 20][..]);
    }

    #[test]
    fn busy_send_retries_then_succeeds() {
        let mut d = MockDriver::new([0; 6]);
        d.fail_next_sends(2);
        assert_eq!(d.send_frame(&[1], SendFlags::BARE), Err(DriverError::Busy));
        assert_eq!(d.send_frame(&[1], SendFlags::BARE), Err(DriverError::Busy));
        assert!(d.send_frame(&[1], SendFlags::BARE).is_ok());
    }

    #[test]
    fn link_down_rejects_send() {
        let mut d = MockDriver::new([0; 6]);
        d.set_link_up(false);
        assert_eq!(d.send_frame(&[1], SendFlags::BARE), Err(DriverError::NotReady));
    }
}
