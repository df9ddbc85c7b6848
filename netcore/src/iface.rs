//! Interface worker: the bridge between a [`MacDriver`] and
//! the protocol layers above it.
//!
//! Owns link-state polling, RX draining and the `send_frame` transmit
//! contract — Ethernet addressing, VLAN tag insertion, and bounded
//! busy-retry. It does not own ARP/NDP cache state itself: [`crate::stack`]
//! resolves a destination to a [`NextHop`] (or learns that resolution is
//! still pending) and this module only ever turns an already-decided
//! `NextHop` into bytes on the wire, keeping the driver seam independent of
//! the resolver state machines in [`crate::arp`]/[`crate::ndp`] — the same
//! separation `sw/net/src/lib.rs`'s `handle_frame`/`send_packet` split draws
//! between framing and the ARP table it consults.

use alloc::vec::Vec as AVec;

use netcore_hal::{Capabilities, ControlOp, DriverError, LinkInfo, MacDriver, SendFlags};

use crate::addr::{Ipv4Addr, Ipv6Addr, MacAddr};
use crate::error::{NetError, NetResult};
use crate::eth;

/// Busy-retry budget for a single `send_frame` call (: "retries
/// on Busy up to 16 times, inserting short sleeps after the 12th").
pub const MAX_BUSY_RETRIES: u8 = 16;
pub const BUSY_SLEEP_AFTER_RETRY: u8 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// A destination MAC address already decided by the caller, e.g. via
/// [`crate::arp::Resolution::Found`] or one of the fixed multicast mappings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextHop {
    Mac(MacAddr),
    Broadcast,
    Ipv4Multicast(Ipv4Addr),
    Ipv6Multicast(Ipv6Addr),
}

impl NextHop {
    pub fn resolve_mac(&self) -> MacAddr {
        match self {
            NextHop::Mac(m) => *m,
            NextHop::Broadcast => MacAddr::BROADCAST,
            NextHop::Ipv4Multicast(a) => MacAddr::from_ipv4_multicast(*a),
            NextHop::Ipv6Multicast(a) => MacAddr::from_ipv6_multicast(*a),
        }
    }
}

/// One physical (or virtual, per-VLAN) link, wrapping a [`MacDriver`].
pub struct Interface<D: MacDriver> {
    driver: D,
    mac: MacAddr,
    vlan_id: u16,
    mtu: u16,
    caps: Capabilities,
    link_up: bool,
    poll_interval_ms: u32,
}

impl<D: MacDriver> Interface<D> {
    pub fn new(mut driver: D, vlan_id: u16, mtu: u16) -> Result<Self, DriverError> {
        driver.initialize()?;
        let mac = MacAddr::new(driver.mac_address());
        let caps = driver.capabilities();
        Ok(Interface { driver, mac, vlan_id, mtu, caps, link_up: false, poll_interval_ms: 25 })
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Poll link state once, returning a transition event if one occurred
    /// (: "once per second, polls link state and emits a
    /// link-up/link-down transition event").
    pub fn poll_link(&mut self) -> Option<LinkEvent> {
        let info: LinkInfo = self.driver.poll_link();
        if info.up && !self.link_up {
            self.link_up = true;
            self.on_link_up();
            Some(LinkEvent::Up)
        } else if !info.up && self.link_up {
            self.link_up = false;
            self.on_link_down();
            Some(LinkEvent::Down)
        } else {
            None
        }
    }

    fn on_link_up(&mut self) {
        let _ = self.driver.control(ControlOp::Configure);
        let _ = self.driver.control(ControlOp::RxEnable);
        let _ = self.driver.control(ControlOp::TxEnable);
        if self.vlan_id != 0 {
            let _ = self.driver.control(ControlOp::VlanFilter(Some(self.vlan_id)));
        }
    }

    fn on_link_down(&mut self) {
        let _ = self.driver.control(ControlOp::TxDisable);
        let _ = self.driver.control(ControlOp::Flush);
    }

    /// Program the hardware (or software-fallback) multicast filter from the
    /// MAC set IGMP/MLD collected. A driver
    /// lacking `MULTICAST_FILTER` rejects this and falls back to accepting
    /// all multicast itself; nothing further to do here in that case.
    pub fn program_multicast_filter(&mut self, macs: &[[u8; 6]]) {
        let _ = self.driver.set_address_filter(macs);
    }

    /// Adaptive poll interval for a driver without `EVENT_CALLBACK`,
    /// tightening on RX activity (: "sleeps an adaptive
    /// interval between 2 and 25 ms, tightening the interval on activity").
    pub fn poll_interval_ms(&self) -> u32 {
        self.poll_interval_ms
    }

    fn note_activity(&mut self) {
        self.poll_interval_ms = 2;
    }

    fn note_idle(&mut self) {
        self.poll_interval_ms = (self.poll_interval_ms + 1).min(25);
    }

    /// Drain every frame currently queued by the driver, calling `on_frame`
    /// with each one in turn. Frames outside `[MAC header, MTU]` are
    /// silently dropped; `on_frame` itself is responsible for
    /// pool/ring admission and so for the "drop when full" clause.
    pub fn drain_rx(&mut self, scratch: &mut [u8], mut on_frame: impl FnMut(&[u8])) -> usize {
        let mut drained = 0;
        loop {
            match self.driver.read_frame(scratch) {
                Ok(0) => break,
                Ok(n) => {
                    drained += 1;
                    let max = eth::MAC_HEADER_LEN + self.mtu as usize;
                    if n >= eth::MAC_HEADER_LEN && n <= max {
                        on_frame(&scratch[..n]);
                    }
                }
                Err(_) => break,
            }
        }
        if drained > 0 {
            self.note_activity();
        } else {
            self.note_idle();
        }
        drained
    }

    /// VLAN accept filter ( "VLAN accept"): for a tagged
    /// interface, drop frames whose tag doesn't match and excise the tag
    /// from frames that do, leaving an untagged frame behind for the
    /// classifier. A no-op when this interface isn't VLAN-scoped.
    pub fn accept_vlan(&self, frame: &mut AVec<u8>) -> bool {
        if self.vlan_id == 0 {
            return true;
        }
        match eth::parse(frame) {
            Ok(hdr) if hdr.vlan_id == Some(self.vlan_id) => {
                frame.drain(12..12 + eth::VLAN_TAG_LEN);
                true
            }
            _ => false,
        }
    }

    /// Transmit contract ( `send_frame(frame, ip_version)`):
    /// builds the Ethernet header for `dst`, inserts a VLAN tag as a
    /// fragmented two-call send when this interface carries one, and
    /// retries a busy driver up to [`MAX_BUSY_RETRIES`] times.
    pub fn send(&mut self, ethertype: u16, dst: NextHop, payload: &[u8]) -> NetResult<()> {
        if !self.link_up {
            return Err(NetError::DriverError);
        }
        let tag_len = if self.vlan_id != 0 { eth::VLAN_TAG_LEN } else { 0 };
        let total_len = eth::MAC_HEADER_LEN + tag_len + payload.len();
        if total_len > eth::MAC_HEADER_LEN + self.mtu as usize {
            return Err(NetError::InvalidParameter);
        }

        let dst_mac = dst.resolve_mac();
        let vlan = if self.vlan_id != 0 { Some(self.vlan_id) } else { None };
        let mut hdr_buf = [0u8; eth::MAC_HEADER_LEN + eth::VLAN_TAG_LEN];
        let hdr_len = eth::build(&mut hdr_buf, dst_mac, self.mac, vlan, ethertype);

        if vlan.is_some() {
            self.send_with_retry(&hdr_buf[..hdr_len], SendFlags::FRAGMENT)?;
            self.send_with_retry(payload, SendFlags::BARE)?;
        } else {
            let mut frame = AVec::with_capacity(hdr_len + payload.len());
            frame.extend_from_slice(&hdr_buf[..hdr_len]);
            frame.extend_from_slice(payload);
            self.send_with_retry(&frame, SendFlags::BARE)?;
        }
        Ok(())
    }

    fn send_with_retry(&mut self, buf: &[u8], flags: SendFlags) -> NetResult<()> {
        let mut retries = 0u8;
        loop {
            match self.driver.send_frame(buf, flags) {
                Ok(()) => return Ok(()),
                Err(DriverError::Busy) => {
                    retries += 1;
                    if retries > MAX_BUSY_RETRIES {
                        return Err(NetError::Busy);
                    }
                    if retries > BUSY_SLEEP_AFTER_RETRY {
                        self.sleep_hint();
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stands in for the short sleep an embedded driver takes after the 12th
    /// busy-retry; a real embedding wires a timer/yield here. A no-op keeps
    /// this module's tests deterministic.
    fn sleep_hint(&self) {}
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use netcore_hal::MockDriver;

    fn up_iface(mac: [u8; 6], vlan_id: u16, mtu: u16) -> Interface<MockDriver> {
        let mut iface = Interface::new(MockDriver::new(mac), vlan_id, mtu).unwrap();
        assert_eq!(iface.poll_link(), Some(LinkEvent::Up));
        iface
    }

    #[test]
    fn link_transitions_fire_once() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 0, 1500);
        assert_eq!(iface.poll_link(), None);
        iface.driver_mut().set_link_up(false);
        assert_eq!(iface.poll_link(), Some(LinkEvent::Down));
        assert!(!iface.is_link_up());
    }

    #[test]
    fn send_to_known_mac_builds_untagged_frame() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 0, 1500);
        let dst = MacAddr::new([9, 9, 9, 9, 9, 9]);
        iface.send(eth::ETHERTYPE_IPV4, NextHop::Mac(dst), &[0xAB; 10]).unwrap();
        let log = &iface.driver().tx_log;
        assert_eq!(log.len(), 1);
        let hdr = eth::parse(&log[0]).unwrap();
        assert_eq!(hdr.dst, dst);
        assert_eq!(hdr.src, iface.mac());
        assert_eq!(hdr.ethertype, eth::ETHERTYPE_IPV4);
    }

    #[test]
    fn send_on_vlan_interface_fragments_header_and_payload() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 42, 1500);
        iface.send(eth::ETHERTYPE_IPV6, NextHop::Broadcast, &[0xCD; 6]).unwrap();
        let log = &iface.driver().tx_log;
        assert_eq!(log.len(), 2, "VLAN insertion sends header and payload as two driver calls");
        let hdr = eth::parse(&log[0]).unwrap();
        assert_eq!(hdr.vlan_id, Some(42));
        assert_eq!(log[1], [0xCDu8; 6]);
    }

    #[test]
    fn multicast_next_hop_maps_to_expected_mac() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 0, 1500);
        let group = Ipv4Addr::new(224, 0, 0, 251);
        iface.send(eth::ETHERTYPE_IPV4, NextHop::Ipv4Multicast(group), &[0]).unwrap();
        let hdr = eth::parse(&iface.driver().tx_log[0]).unwrap();
        assert_eq!(hdr.dst, MacAddr::from_ipv4_multicast(group));
    }

    #[test]
    fn busy_driver_retries_then_succeeds() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 0, 1500);
        iface.driver_mut().fail_next_sends(3);
        iface.send(eth::ETHERTYPE_ARP, NextHop::Broadcast, &[1, 2, 3]).unwrap();
        assert_eq!(iface.driver().tx_log.len(), 1);
    }

    #[test]
    fn send_while_link_down_is_rejected() {
        let mut iface = Interface::new(MockDriver::new([1; 6]), 0, 1500).unwrap();
        assert!(!iface.is_link_up());
        assert_eq!(iface.send(eth::ETHERTYPE_IPV4, NextHop::Broadcast, &[0]), Err(NetError::DriverError));
    }

    #[test]
    fn drain_rx_delivers_queued_frames_and_drops_oversize() {
        let mut iface = up_iface([1, 2, 3, 4, 5, 6], 0, 100);
        let mut small = AVec::new();
        small.extend_from_slice(&[0u8; 64]);
        iface.driver_mut().enqueue_rx(small);
        let mut oversize = AVec::new();
        oversize.extend_from_slice(&[0u8; 1000]);
        iface.driver_mut().enqueue_rx(oversize);

        let mut scratch = [0u8; 1500];
        let mut seen = 0;
        let drained = iface.drain_rx(&mut scratch, |_| seen += 1);
        assert_eq!(drained, 2);
        assert_eq!(seen, 1, "oversize frame must be dropped, not handed to the classifier");
    }
}
