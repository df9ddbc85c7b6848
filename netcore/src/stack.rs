//! The engine's context object: owns every per-protocol module for one
//! interface and drives them from two entry points, [`Stack::poll`] (inbound)
//! and [`Stack::tick`] (timers), rather than the free functions and a single
//! global `NetState` `sw/net/src/lib.rs` uses for its one
//! Ethernet/ARP/IPv4 path: one `Stack` per interface, owning all
//! per-protocol state, instead of module-level globals.
//!
//! `poll`/`tick` mirror `sw/net`'s `NetState::poll`/housekeeping split,
//! generalized to a dual-stack, multi-protocol surface: ARP/NDP neighbor
//! resolution, IGMP/MLD membership, IPv4/IPv6 fragmentation and reassembly,
//! DHCPv4 with AutoIP fallback, SLAAC, and TCP.

use heapless::Vec;

use crate::addr::{Ipv4Addr, Ipv6Addr, MacAddr};
use crate::arp::{self, ArpCache, Resolution as ArpResolution};
use crate::autoip::{self, AutoIp};
use crate::config::{InterfaceConfig, StackConfig};
use crate::dhcp::{self, DhcpClient};
use crate::error::{NetError, NetResult};
use crate::eth;
use crate::frame::{Frame, FramePool, Owner};
use crate::iface::{Interface, LinkEvent, NextHop};
use crate::icmpv4;
use crate::icmpv6;
use crate::igmp::{self, IgmpGroups};
use crate::ip4_frag;
use crate::ip6_frag;
use crate::ipv4;
use crate::ipv6;
use crate::mld::{self, MldGroups};
use crate::ndp::{self, NdpCache, Resolution as NdpResolution, Slaac};
use crate::prng::NetPrng;
use crate::tcp::segment;
use crate::tcp::{IpEndpoint, SegmentOut, State as TcpState, TcpSockets};
use crate::timers::Prescaler;
use netcore_hal::MacDriver;

const ARP_CACHE_N: usize = 8;
const NDP_CACHE_N: usize = 8;
const IGMP_GROUPS_N: usize = 8;
const MLD_GROUPS_N: usize = 8;
const TCP_SOCKETS_N: usize = 8;
const IP4_REASM_N: usize = 4;
const IP6_REASM_N: usize = 4;

const FRAME_POOL_CAPACITY: usize = 4;
const LINK_POLL_INTERVAL_S: u32 = 1;

/// Live IPv4 interface configuration, kept separate from [`crate::config::
/// Ipv4Config`] so DHCP/AutoIP can rewrite it in place without the caller's
/// original ROM table being mutated.
struct Ipv4State {
    addr: Ipv4Addr,
    mask: Ipv4Addr,
    gateway: Ipv4Addr,
    dns: [Ipv4Addr; 2],
}

/// Live IPv6 interface configuration; `link_local` mirrors [`Slaac::
/// link_local`] since SLAAC is what actually derives it from the MAC.
struct Ipv6State {
    link_local: Ipv6Addr,
    static_addr: Option<Ipv6Addr>,
    hop_limit: u8,
}

/// Outcome of deciding where an IPv4/IPv6 datagram should go next, threaded
/// through the already-built [`Frame`] rather than collapsing a pending
/// resolution into an error: the frame has to survive the wait.
enum NextHopResult<A> {
    /// The next-hop MAC is already known; send now.
    Ready(NextHop),
    /// Resolution for `A` (the ARP/NDP target, which is the gateway address
    /// when `dst` is off-link) is underway; the frame should be queued on
    /// that resolver's entry instead of sent or dropped.
    Pending(A),
    /// The resolver cache has no room to even track this address.
    Unavailable,
}

/// Edge-triggered notifications the caller may want to act on (reconfigure a
/// socket, log a lease change), collected across one `poll`/`tick` call
/// rather than returned eagerly from deep inside the dispatch chain.
#[derive(Default)]
pub struct Events {
    pub link_up: bool,
    pub link_down: bool,
    pub dhcp_bound: bool,
    pub dhcp_halted: bool,
    pub autoip_bound: bool,
    pub tcp_accepted: Vec<usize, 4>,
}

/// Context object for one Ethernet (or WiFi, per [`crate::config::
/// InterfaceClass`]) interface: the frame pipeline, ARP/NDP resolution,
/// IGMP/MLD membership, IPv4/IPv6 reassembly, DHCPv4+AutoIP, SLAAC, and TCP.
pub struct Stack<D: MacDriver> {
    iface: Interface<D>,
    pool: FramePool,
    prng: NetPrng,

    ipv4: Ipv4State,
    ipv6: Ipv6State,

    arp: ArpCache<ARP_CACHE_N>,
    ndp: NdpCache<NDP_CACHE_N>,
    slaac: Slaac,

    igmp: IgmpGroups<IGMP_GROUPS_N>,
    mld: MldGroups<MLD_GROUPS_N>,

    ip4_reasm: ip4_frag::ReassemblyTable<IP4_REASM_N>,
    ip6_reasm: ip6_frag::ReassemblyTable<IP6_REASM_N>,

    dhcp: Option<DhcpClient>,
    autoip: AutoIp,
    autoip_active: bool,

    tcp: TcpSockets<TCP_SOCKETS_N>,
    tcp_default_mss: u16,

    ip4_ident: u16,
    ip6_ident: u32,
    link_prescaler: Prescaler,
    mac_changed: bool,
}

impl<D: MacDriver> Stack<D> {
    /// Bring up one interface. `seed` should come from a hardware TRNG at
    /// boot: DHCP `xid`, TCP ISNs, AutoIP candidates and
    /// SLAAC timing all draw from the one seeded [`NetPrng`].
    pub fn new(driver: D, iface_cfg: InterfaceConfig, cfg: StackConfig, seed: &[u16; 8]) -> NetResult<Self> {
        let mtu = iface_cfg
            .ipv4
            .as_ref()
            .map(|c| c.mtu)
            .or_else(|| iface_cfg.ipv6.as_ref().map(|c| c.mtu))
            .unwrap_or(1500);
        let mut iface = Interface::new(driver, iface_cfg.vlan_id, mtu)?;
        if let Some(mac) = iface_cfg.mac {
            iface.driver_mut().set_mac_address(mac.octets())?;
        }

        let ipv4 = iface_cfg.ipv4.as_ref();
        let ipv6 = iface_cfg.ipv6.as_ref();
        let mut prng = NetPrng::new_from(seed);

        let dhcp = match (&iface_cfg.dhcp, ipv4) {
            (Some(options), Some(v4)) if v4.dhcp_enabled => {
                let mut seed_words = [0u16; 8];
                for w in seed_words.iter_mut() {
                    *w = prng.next_u16();
                }
                Some(DhcpClient::new(options.clone(), &seed_words))
            }
            _ => None,
        };

        Ok(Stack {
            iface,
            pool: FramePool::new(FRAME_POOL_CAPACITY),
            prng,
            ipv4: Ipv4State {
                addr: ipv4.map(|c| c.addr).unwrap_or(Ipv4Addr::UNSPECIFIED),
                mask: ipv4.map(|c| c.mask).unwrap_or(Ipv4Addr::UNSPECIFIED),
                gateway: ipv4.map(|c| c.gateway).unwrap_or(Ipv4Addr::UNSPECIFIED),
                dns: ipv4.map(|c| c.dns).unwrap_or([Ipv4Addr::UNSPECIFIED; 2]),
            },
            ipv6: Ipv6State {
                link_local: ipv6.map(|c| c.link_local).unwrap_or(Ipv6Addr::UNSPECIFIED),
                static_addr: ipv6.and_then(|c| c.static_addr),
                hop_limit: ipv6.map(|c| c.hop_limit).unwrap_or(64),
            },
            arp: ArpCache::new(cfg.arp),
            ndp: NdpCache::new(cfg.ndp),
            slaac: Slaac::new(),
            igmp: IgmpGroups::new(cfg.igmp),
            mld: MldGroups::new(cfg.mld),
            ip4_reasm: ip4_frag::ReassemblyTable::new(cfg.ip4_reassembly_timeout_s),
            ip6_reasm: ip6_frag::ReassemblyTable::new(cfg.ip6_reassembly_timeout_s),
            dhcp,
            autoip: AutoIp::new(),
            autoip_active: false,
            tcp: TcpSockets::new(cfg.tcp),
            tcp_default_mss: cfg.tcp.default_mss,
            ip4_ident: 1,
            ip6_ident: 1,
            link_prescaler: Prescaler::new(crate::timers::s_to_ticks(LINK_POLL_INTERVAL_S)),
            mac_changed: true,
        })
    }

    pub fn mac(&self) -> MacAddr {
        self.iface.mac()
    }

    pub fn ipv4_addr(&self) -> Ipv4Addr {
        self.ipv4.addr
    }

    pub fn ipv6_link_local(&self) -> Ipv6Addr {
        self.ipv6.link_local
    }

    pub fn ipv6_static_addr(&self) -> Option<Ipv6Addr> {
        self.ipv6.static_addr
    }

    // ---- egress -----------------------------------------------------

    /// Allocate a frame, let `build` fill in everything after the Ethernet
    /// header, hand it to the interface, and release it. Every egress path
    /// funnels through here so [`FramePool`]'s move-only discipline never
    /// leaks a frame on an early return.
    fn emit(&mut self, ethertype: u16, dst: NextHop, build: impl FnOnce(&mut [u8]) -> usize) -> NetResult<()> {
        let mut frame = self.pool.alloc().ok_or(NetError::Busy)?;
        let len = build(frame.full_buf_mut());
        frame.set_len(len);
        let result = self.iface.send(ethertype, dst, frame.as_slice());
        self.pool.release(frame);
        result
    }

    fn resolve_ipv4_next_hop(&mut self, dst: Ipv4Addr) -> NextHopResult<Ipv4Addr> {
        if dst.is_broadcast() || dst.is_subnet_broadcast(self.ipv4.mask) {
            return NextHopResult::Ready(NextHop::Broadcast);
        }
        if dst.is_multicast() {
            return NextHopResult::Ready(NextHop::Ipv4Multicast(dst));
        }
        let on_link = dst.is_on_link(self.ipv4.addr, self.ipv4.mask);
        let target = if on_link { dst } else { self.ipv4.gateway };
        match self.arp.resolve(target) {
            ArpResolution::Found(mac) => NextHopResult::Ready(NextHop::Mac(mac)),
            ArpResolution::Requesting | ArpResolution::AlreadyPending => {
                let sha = self.iface.mac();
                let spa = self.ipv4.addr;
                let mut buf = [0u8; arp::ARP_FRAME_LEN];
                let n = arp::build_request(&mut buf, sha, spa, target);
                let _ = self.iface.send(eth::ETHERTYPE_ARP, NextHop::Broadcast, &buf[..n]);
                NextHopResult::Pending(target)
            }
            ArpResolution::CacheFull => NextHopResult::Unavailable,
        }
    }

    /// Send an already-built IPv4 datagram frame, or park it on the ARP
    /// resolver's pending queue if the next hop isn't known yet.
    fn send_or_queue_ipv4(&mut self, dst: Ipv4Addr, mut frame: Frame) -> NetResult<()> {
        match self.resolve_ipv4_next_hop(dst) {
            NextHopResult::Ready(next_hop) => {
                frame.owner = Owner::InFlightToDriver;
                let result = self.iface.send(eth::ETHERTYPE_IPV4, next_hop, frame.as_slice());
                self.pool.release(frame);
                result
            }
            NextHopResult::Pending(target) => {
                frame.owner = Owner::ArpPending;
                match self.arp.enqueue(target, frame) {
                    Ok(()) => Ok(()),
                    Err(frame) => {
                        self.pool.release(frame);
                        Err(NetError::Busy)
                    }
                }
            }
            NextHopResult::Unavailable => {
                self.pool.release(frame);
                Err(NetError::Busy)
            }
        }
    }

    /// Send every frame `learn` handed back after completing a pending ARP
    /// resolution, releasing each to the pool once sent.
    fn flush_arp_pending(&mut self, mac: MacAddr, frames: Vec<Frame, { arp::PENDING_CAP }>) {
        for mut frame in frames {
            frame.owner = Owner::InFlightToDriver;
            let _ = self.iface.send(eth::ETHERTYPE_IPV4, NextHop::Mac(mac), frame.as_slice());
            self.pool.release(frame);
        }
    }

    /// Build and send an IPv4 datagram, resolving the next-hop MAC via ARP
    /// first. `build_payload` writes the protocol payload into a scratch
    /// buffer and returns its length.
    fn emit_ipv4(&mut self, dst: Ipv4Addr, protocol: u8, build_payload: impl FnOnce(&mut [u8]) -> usize) -> NetResult<()> {
        self.emit_ipv4_inner(dst, protocol, false, build_payload)
    }

    /// Like [`Self::emit_ipv4`] but wraps the payload with the IGMPv2
    /// Router Alert option (RFC 2236 §2: "all IGMP messages... MUST be sent
    /// with... the Router Alert option").
    fn emit_ipv4_with_router_alert(&mut self, dst: Ipv4Addr, protocol: u8, build_payload: impl FnOnce(&mut [u8]) -> usize) -> NetResult<()> {
        self.emit_ipv4_inner(dst, protocol, true, build_payload)
    }

    fn emit_ipv4_inner(
        &mut self,
        dst: Ipv4Addr,
        protocol: u8,
        router_alert: bool,
        build_payload: impl FnOnce(&mut [u8]) -> usize,
    ) -> NetResult<()> {
        let src = self.ipv4.addr;
        let id = self.ip4_ident;
        self.ip4_ident = self.ip4_ident.wrapping_add(1);
        let mut frame = self.pool.alloc().ok_or(NetError::Busy)?;
        let len = {
            let mut scratch = [0u8; 1480];
            let plen = build_payload(&mut scratch);
            let hdr = ipv4::Ipv4Header {
                dscp_ecn: 0,
                total_len: 0,
                id,
                flags: ipv4::Flags { dont_fragment: false, more_fragments: false },
                frag_offset: 0,
                ttl: 64,
                protocol,
                src,
                dst,
                header_len: ipv4::MIN_HEADER_LEN,
            };
            if router_alert {
                ipv4::build_with_router_alert(frame.full_buf_mut(), &hdr, &scratch[..plen])
            } else {
                ipv4::build(frame.full_buf_mut(), &hdr, &scratch[..plen])
            }
        };
        frame.set_len(len);
        self.send_or_queue_ipv4(dst, frame)
    }

    fn pick_ipv6_source(&self, dst: Ipv6Addr) -> Ipv6Addr {
        if dst.is_link_local() {
            self.ipv6.link_local
        } else {
            self.ipv6.static_addr.unwrap_or(self.ipv6.link_local)
        }
    }

    fn resolve_ipv6_next_hop(&mut self, dst: Ipv6Addr) -> NextHopResult<Ipv6Addr> {
        if dst.is_multicast() {
            return NextHopResult::Ready(NextHop::Ipv6Multicast(dst));
        }
        let target = if dst.is_link_local() { dst } else { self.ndp.default_router().unwrap_or(dst) };
        match self.ndp.resolve(target) {
            NdpResolution::Found(mac) => NextHopResult::Ready(NextHop::Mac(mac)),
            NdpResolution::Requesting | NdpResolution::AlreadyPending => {
                self.send_neighbor_solicitation(target);
                NextHopResult::Pending(target)
            }
            NdpResolution::CacheFull => NextHopResult::Unavailable,
        }
    }

    /// Send an already-built IPv6 datagram frame, or park it on the NDP
    /// resolver's pending queue if the next hop isn't known yet.
    fn send_or_queue_ipv6(&mut self, dst: Ipv6Addr, mut frame: Frame) -> NetResult<()> {
        match self.resolve_ipv6_next_hop(dst) {
            NextHopResult::Ready(next_hop) => {
                frame.owner = Owner::InFlightToDriver;
                let result = self.iface.send(eth::ETHERTYPE_IPV6, next_hop, frame.as_slice());
                self.pool.release(frame);
                result
            }
            NextHopResult::Pending(target) => {
                frame.owner = Owner::NdpPending;
                match self.ndp.enqueue(target, frame) {
                    Ok(()) => Ok(()),
                    Err(frame) => {
                        self.pool.release(frame);
                        Err(NetError::Busy)
                    }
                }
            }
            NextHopResult::Unavailable => {
                self.pool.release(frame);
                Err(NetError::Busy)
            }
        }
    }

    /// Send every frame `learn` handed back after completing a pending NDP
    /// resolution, releasing each to the pool once sent.
    fn flush_ndp_pending(&mut self, mac: MacAddr, frames: Vec<Frame, { ndp::PENDING_CAP }>) {
        for mut frame in frames {
            frame.owner = Owner::InFlightToDriver;
            let _ = self.iface.send(eth::ETHERTYPE_IPV6, NextHop::Mac(mac), frame.as_slice());
            self.pool.release(frame);
        }
    }

    fn send_neighbor_solicitation(&mut self, target: Ipv6Addr) {
        let mac = self.iface.mac();
        let src = self.ipv6.link_local;
        let solicited_node = target.solicited_node();
        let mut buf = [0u8; 64];
        buf[0] = icmpv6::TYPE_NEIGHBOR_SOLICITATION;
        buf[1] = 0;
        let n = ndp::wire::build_neighbor_solicitation(&mut buf[4..], target, Some(mac));
        let total = icmpv6::finish_with_checksum(&mut buf, 4 + n, src, solicited_node);
        let _ = self.iface.send(eth::ETHERTYPE_IPV6, NextHop::Ipv6Multicast(solicited_node), &buf[..total]);
    }

    fn emit_ipv6(&mut self, dst: Ipv6Addr, next_header: u8, build_payload: impl FnOnce(&mut [u8]) -> usize) -> NetResult<()> {
        let src = self.pick_ipv6_source(dst);
        let hop_limit = self.ipv6.hop_limit;
        let mut frame = self.pool.alloc().ok_or(NetError::Busy)?;
        let len = {
            let mut scratch = [0u8; 1480];
            let plen = build_payload(&mut scratch);
            let hdr = ipv6::Ipv6Header { traffic_class: 0, flow_label: 0, payload_len: plen as u16, next_header, hop_limit, src, dst };
            ipv6::build(frame.full_buf_mut(), &hdr, &scratch[..plen])
        };
        frame.set_len(len);
        self.send_or_queue_ipv6(dst, frame)
    }

    fn send_gratuitous_arp(&mut self, addr: Ipv4Addr) {
        let mac = self.iface.mac();
        let mut buf = [0u8; arp::ARP_FRAME_LEN];
        let n = arp::build_request(&mut buf, mac, addr, addr);
        let _ = self.iface.send(eth::ETHERTYPE_ARP, NextHop::Broadcast, &buf[..n]);
    }

    // ---- DHCP ---------------------------------------------------------

    fn send_dhcp_datagram(&mut self, src: Ipv4Addr, dst: Ipv4Addr, next_hop: NextHop, dhcp_payload: &[u8]) -> NetResult<()> {
        let id = self.ip4_ident;
        self.ip4_ident = self.ip4_ident.wrapping_add(1);
        self.emit(eth::ETHERTYPE_IPV4, next_hop, |buf| {
            let mut udp_buf = [0u8; 400];
            let udp_len = crate::udp::build_ipv4(&mut udp_buf, src, dst, dhcp::CLIENT_PORT, dhcp::SERVER_PORT, dhcp_payload);
            let hdr = ipv4::Ipv4Header {
                dscp_ecn: 0,
                total_len: 0,
                id,
                flags: ipv4::Flags { dont_fragment: false, more_fragments: false },
                frag_offset: 0,
                ttl: 64,
                protocol: ipv4::PROTO_UDP,
                src,
                dst,
                header_len: ipv4::MIN_HEADER_LEN,
            };
            ipv4::build(buf, &hdr, &udp_buf[..udp_len])
        })
    }

    /// Drive the DHCP client's retry/renewal clock, sending whatever packet
    /// `cycle_clock` says is due, and fold a latched bind/halt event into
    /// `self.ipv4`/`events`.
    fn cycle_dhcp(&mut self, events: &mut Events) {
        let Some(mut dhcp) = self.dhcp.take() else { return };
        let mac = self.iface.mac();

        match dhcp.cycle_clock() {
            dhcp::PacketNeeded::Discover => {
                let mut buf = [0u8; 360];
                let n = dhcp::build_discover(&mut buf, &dhcp, mac);
                let _ = self.send_dhcp_datagram(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST, NextHop::Broadcast, &buf[..n]);
            }
            dhcp::PacketNeeded::Request | dhcp::PacketNeeded::Rebind => {
                let mut buf = [0u8; 360];
                let n = dhcp::build_request(&mut buf, &dhcp, mac, false);
                let _ = self.send_dhcp_datagram(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST, NextHop::Broadcast, &buf[..n]);
            }
            dhcp::PacketNeeded::Renew => {
                let client_ip = dhcp.ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
                let mut buf = [0u8; 360];
                let n = dhcp::build_request(&mut buf, &dhcp, mac, true);
                match dhcp.sid {
                    Some(server) => {
                        let next_hop = match self.arp.resolve(server) {
                            ArpResolution::Found(server_mac) => NextHop::Mac(server_mac),
                            _ => NextHop::Broadcast,
                        };
                        let _ = self.send_dhcp_datagram(client_ip, server, next_hop, &buf[..n]);
                    }
                    None => {
                        let _ = self.send_dhcp_datagram(client_ip, Ipv4Addr::BROADCAST, NextHop::Broadcast, &buf[..n]);
                    }
                }
            }
            dhcp::PacketNeeded::None => {}
        }

        match dhcp.pop_and_ack_change_event() {
            Some(dhcp::DhcpEvent::ChangedToBound) => {
                self.ipv4.addr = dhcp.ip.unwrap_or(self.ipv4.addr);
                self.ipv4.mask = dhcp.subnet.unwrap_or(self.ipv4.mask);
                self.ipv4.gateway = dhcp.gateway.unwrap_or(self.ipv4.gateway);
                if let Some(dns) = dhcp.dns {
                    self.ipv4.dns[0] = dns;
                }
                self.autoip_active = false;
                events.dhcp_bound = true;
            }
            Some(dhcp::DhcpEvent::ChangedToHalted) => {
                self.ipv4.addr = Ipv4Addr::UNSPECIFIED;
                if !self.autoip_active {
                    self.autoip.begin(&mut self.prng);
                    self.autoip_active = true;
                }
                events.dhcp_halted = true;
            }
            None => {}
        }

        self.dhcp = Some(dhcp);
    }

    fn handle_dhcp_reply(&mut self, body: &[u8]) {
        let Some(dhcp) = self.dhcp.as_mut() else { return };
        let Ok(msg) = dhcp::parse(body) else { return };
        if dhcp.xid != Some(msg.header.xid) {
            return;
        }
        match msg.msg_type {
            Some(dhcp::MessageType::Offer) => dhcp.handle_offer(&dhcp::OfferFields {
                server_id: msg.server_id.unwrap_or(Ipv4Addr::UNSPECIFIED),
                your_ip: msg.header.yiaddr,
                gateway: msg.gateway,
                gateway_mac: None,
                lease_sec: msg.lease_sec.unwrap_or(0),
                subnet: msg.subnet,
                dns: msg.dns,
            }),
            Some(dhcp::MessageType::Ack) => dhcp.handle_ack(msg.lease_sec.unwrap_or(0)),
            Some(dhcp::MessageType::Nak) => dhcp.handle_nak(),
            _ => {}
        }
    }

    // ---- ingress: Ethernet/ARP -----------------------------------------

    /// Process one inbound Ethernet frame (post-VLAN-acceptance). Runs as
    /// many times per [`Self::poll`] call as frames arrive.
    fn handle_frame(&mut self, data: &[u8], events: &mut Events) {
        let Ok(hdr) = eth::parse(data) else { return };
        let payload = &data[hdr.payload_offset..];
        let _ = match hdr.ethertype {
            eth::ETHERTYPE_ARP => self.handle_arp(payload),
            eth::ETHERTYPE_IPV4 => self.handle_ipv4(payload, events),
            eth::ETHERTYPE_IPV6 => self.handle_ipv6(payload, events),
            _ => Ok(()),
        };
    }

    fn handle_arp(&mut self, payload: &[u8]) -> NetResult<()> {
        let pkt = arp::parse(payload).map_err(|_| NetError::InvalidParameter)?;
        if !pkt.spa.is_unspecified() {
            let drained = self.arp.learn(pkt.spa, pkt.sha);
            self.flush_arp_pending(pkt.sha, drained);
        }

        if self.autoip_active && pkt.spa == self.autoip.candidate && pkt.sha != self.iface.mac() {
            match self.autoip.state {
                autoip::State::Bound => {
                    if self.autoip.on_defend(&mut self.prng) {
                        let candidate = self.autoip.candidate;
                        self.send_gratuitous_arp(candidate);
                    }
                }
                autoip::State::Probing | autoip::State::Announcing => {
                    self.autoip.on_probe_conflict(&mut self.prng);
                }
                _ => {}
            }
        }

        if pkt.op == arp::OP_REQUEST && pkt.tpa == self.ipv4.addr && !self.ipv4.addr.is_unspecified() {
            let sha = self.iface.mac();
            let spa = self.ipv4.addr;
            let mut buf = [0u8; arp::ARP_FRAME_LEN];
            let n = arp::build_reply(&mut buf, sha, spa, pkt.sha, pkt.spa);
            let _ = self.iface.send(eth::ETHERTYPE_ARP, NextHop::Mac(pkt.sha), &buf[..n]);
        }
        Ok(())
    }

    // ---- ingress: IPv4 --------------------------------------------------

    fn handle_ipv4(&mut self, data: &[u8], events: &mut Events) -> NetResult<()> {
        let hdr = ipv4::parse(data).map_err(|_| NetError::InvalidParameter)?;
        let decision = ipv4::route(hdr.dst, self.ipv4.addr, self.ipv4.mask, |g| self.igmp.is_member(g));
        if matches!(decision, ipv4::RouteDecision::NotForUs) {
            return Ok(());
        }
        let body = &data[hdr.header_len..hdr.total_len as usize];

        if hdr.frag_offset != 0 || hdr.flags.more_fragments {
            match self.ip4_reasm.insert(hdr.src, hdr.dst, hdr.protocol, hdr.id, hdr.frag_offset, hdr.flags.more_fragments, body) {
                Ok((ip4_frag::ReassemblyOutcome::Complete, Some(full))) => {
                    return self.dispatch_ipv4_payload(hdr.src, hdr.dst, hdr.protocol, &full, events);
                }
                _ => return Ok(()),
            }
        }

        self.dispatch_ipv4_payload(hdr.src, hdr.dst, hdr.protocol, body, events)
    }

    fn dispatch_ipv4_payload(&mut self, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8], events: &mut Events) -> NetResult<()> {
        match protocol {
            ipv4::PROTO_ICMP => self.handle_icmpv4(src, dst, payload),
            ipv4::PROTO_IGMP => self.handle_igmp(payload),
            ipv4::PROTO_UDP => self.handle_udp4(src, dst, payload, events),
            ipv4::PROTO_TCP => self.handle_tcp4(src, dst, payload, events),
            _ => Ok(()),
        }
    }

    fn handle_icmpv4(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> NetResult<()> {
        let msg = icmpv4::parse(payload).map_err(|_| NetError::InvalidParameter)?;
        if let icmpv4::Message::EchoRequest { id, seq, data } = msg {
            let mut scratch = [0u8; 1480];
            let n = icmpv4::build_echo_reply(&mut scratch, id, seq, data);
            let reply_dst = src;
            self.emit_ipv4(reply_dst, ipv4::PROTO_ICMP, |buf| {
                buf[..n].copy_from_slice(&scratch[..n]);
                n
            })?;
        }
        let _ = dst;
        Ok(())
    }

    fn handle_igmp(&mut self, payload: &[u8]) -> NetResult<()> {
        let msg = igmp::parse(payload).map_err(|_| NetError::InvalidParameter)?;
        match msg.kind {
            igmp::IGMP_QUERY => {
                let mode = if msg.max_resp_time_ds == 0 { igmp::QuerierMode::V1 } else { igmp::QuerierMode::V2 };
                let entropy = self.prng.next_u32();
                self.igmp.on_query(&msg, mode, entropy);
            }
            igmp::IGMP_REPORT_V1 | igmp::IGMP_REPORT_V2 => self.igmp.on_report_overheard(msg.group),
            _ => {}
        }
        Ok(())
    }

    fn handle_udp4(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8], events: &mut Events) -> NetResult<()> {
        let (hdr, body) = crate::udp::parse_ipv4(payload, src, dst).map_err(|_| NetError::InvalidParameter)?;
        if hdr.dst_port == dhcp::CLIENT_PORT && hdr.src_port == dhcp::SERVER_PORT {
            self.handle_dhcp_reply(body);
            let _ = events;
        }
        Ok(())
    }

    // ---- ingress: IPv6 --------------------------------------------------

    fn handle_ipv6(&mut self, data: &[u8], events: &mut Events) -> NetResult<()> {
        let hdr = ipv6::parse(data).map_err(|_| NetError::InvalidParameter)?;
        let full_len = ipv6::HEADER_LEN + hdr.payload_len as usize;
        if data.len() < full_len {
            return Err(NetError::InvalidParameter);
        }

        let mut locals: Vec<Ipv6Addr, 3> = Vec::new();
        let _ = locals.push(self.ipv6.link_local);
        if let Some(a) = self.ipv6.static_addr {
            let _ = locals.push(a);
        }
        let decision = ipv6::route(hdr.dst, &locals, |g| self.mld.is_member(g));
        if matches!(decision, ipv6::RouteDecision::NotForUs) {
            return Ok(());
        }

        let (next_header, offset) = match ipv6::walk_extension_headers(data, hdr.next_header, ipv6::HEADER_LEN) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };

        if next_header == ipv6::NEXT_HEADER_FRAGMENT {
            let frag_data = &data[offset..full_len];
            let frag_hdr = ip6_frag::parse_fragment_header(frag_data).map_err(|_| NetError::InvalidParameter)?;
            let frag_payload = &frag_data[ip6_frag::FRAGMENT_HEADER_LEN..];
            return match self.ip6_reasm.insert(
                hdr.src,
                hdr.dst,
                frag_hdr.next_header,
                frag_hdr.identification,
                frag_hdr.offset,
                frag_hdr.more_fragments,
                frag_payload,
            ) {
                Ok((ip6_frag::ReassemblyOutcome::Complete, Some((proto, full)))) => {
                    self.dispatch_ipv6_payload(hdr.src, hdr.dst, proto, &full, events)
                }
                _ => Ok(()),
            };
        }

        let upper_payload = &data[offset..full_len];
        self.dispatch_ipv6_payload(hdr.src, hdr.dst, next_header, upper_payload, events)
    }

    fn dispatch_ipv6_payload(&mut self, src: Ipv6Addr, dst: Ipv6Addr, protocol: u8, payload: &[u8], events: &mut Events) -> NetResult<()> {
        match protocol {
            ipv6::NEXT_HEADER_ICMPV6 => self.handle_icmpv6(src, dst, payload, events),
            ipv6::NEXT_HEADER_TCP => self.handle_tcp6(src, dst, payload, events),
            ipv6::NEXT_HEADER_UDP | ipv6::NEXT_HEADER_NO_NEXT => Ok(()),
            _ => Ok(()),
        }
    }

    fn handle_icmpv6(&mut self, src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8], events: &mut Events) -> NetResult<()> {
        if payload.len() < 4 || !icmpv6::verify_checksum(src, dst, payload) {
            return Err(NetError::InvalidParameter);
        }
        let kind = payload[0];
        match icmpv6::classify(kind) {
            icmpv6::Dispatch::Echo if kind == icmpv6::TYPE_ECHO_REQUEST => {
                let id = u16::from_be_bytes([payload[4], payload[5]]);
                let seq = u16::from_be_bytes([payload[6], payload[7]]);
                let mut echo_data: Vec<u8, 1472> = Vec::new();
                let _ = echo_data.extend_from_slice(&payload[8..]);
                let reply_dst = src;
                let reply_src = self.pick_ipv6_source(reply_dst);
                self.emit_ipv6(reply_dst, ipv6::NEXT_HEADER_ICMPV6, |buf| {
                    icmpv6::build_echo_reply(buf, reply_src, reply_dst, id, seq, &echo_data)
                })?;
            }
            icmpv6::Dispatch::Ndp => self.handle_ndp(src, dst, kind, &payload[4..], events)?,
            icmpv6::Dispatch::Mld => self.handle_mld(src, dst, payload)?,
            _ => {}
        }
        Ok(())
    }

    fn handle_ndp(&mut self, src: Ipv6Addr, dst: Ipv6Addr, kind: u8, body: &[u8], events: &mut Events) -> NetResult<()> {
        match kind {
            icmpv6::TYPE_NEIGHBOR_SOLICITATION => {
                let ns = ndp::wire::parse_neighbor_solicitation(body).map_err(|_| NetError::InvalidParameter)?;
                if let Some(mac) = ns.source_ll {
                    let drained = self.ndp.learn(src, mac, false);
                    self.flush_ndp_pending(mac, drained);
                }
                let is_ours = Some(ns.target) == Some(self.ipv6.link_local) || Some(ns.target) == self.ipv6.static_addr;
                if is_ours {
                    let mac = self.iface.mac();
                    let target = ns.target;
                    let local = dst;
                    let reply_dst = if src.is_unspecified() { Ipv6Addr::ALL_NODES } else { src };
                    self.emit_ipv6(reply_dst, ipv6::NEXT_HEADER_ICMPV6, |buf| {
                        buf[0] = icmpv6::TYPE_NEIGHBOR_ADVERTISEMENT;
                        buf[1] = 0;
                        let flags = ndp::wire::FLAG_SOLICITED | ndp::wire::FLAG_OVERRIDE;
                        let body_len = ndp::wire::build_neighbor_advertisement(&mut buf[4..], flags, target, Some(mac));
                        icmpv6::finish_with_checksum(buf, 4 + body_len, local, reply_dst)
                    })?;
                }
            }
            icmpv6::TYPE_NEIGHBOR_ADVERTISEMENT => {
                let na = ndp::wire::parse_neighbor_advertisement(body).map_err(|_| NetError::InvalidParameter)?;
                if let Some(mac) = na.target_ll {
                    let drained = self.ndp.learn(na.target, mac, na.is_router());
                    self.flush_ndp_pending(mac, drained);
                }
            }
            icmpv6::TYPE_ROUTER_ADVERTISEMENT => {
                let ra = ndp::wire::parse_router_advertisement(body).map_err(|_| NetError::InvalidParameter)?;
                if let Some(mac) = ra.options.source_ll {
                    let drained = self.ndp.learn(src, mac, true);
                    self.flush_ndp_pending(mac, drained);
                }
                if let Some(prefix) = ra.options.prefix {
                    self.slaac.learn_prefix(prefix.prefix, prefix.prefix_len, prefix.valid_lifetime_s);
                }
            }
            _ => {}
        }
        let _ = events;
        Ok(())
    }

    fn handle_mld(&mut self, src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) -> NetResult<()> {
        let msg = mld::parse(payload).map_err(|_| NetError::InvalidParameter)?;
        match msg.kind {
            mld::MLD_LISTENER_QUERY => {
                let entropy = self.prng.next_u32();
                self.mld.on_query(&msg, entropy);
            }
            mld::MLD_LISTENER_REPORT => self.mld.on_report_overheard(msg.group),
            _ => {}
        }
        let _ = (src, dst);
        Ok(())
    }

    // ---- ingress/egress: TCP -------------------------------------------

    fn handle_tcp4(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8], events: &mut Events) -> NetResult<()> {
        let seg = segment::parse_ipv4(payload, src, dst).map_err(|_| NetError::InvalidParameter)?;
        let remote = IpEndpoint::V4 { addr: src, port: seg.src_port };
        let local = IpEndpoint::V4 { addr: dst, port: seg.dst_port };
        self.dispatch_tcp_segment(local, remote, &seg, events)
    }

    fn handle_tcp6(&mut self, src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8], events: &mut Events) -> NetResult<()> {
        let seg = segment::parse_ipv6(payload, src, dst).map_err(|_| NetError::InvalidParameter)?;
        let remote = IpEndpoint::V6 { addr: src, port: seg.src_port };
        let local = IpEndpoint::V6 { addr: dst, port: seg.dst_port };
        self.dispatch_tcp_segment(local, remote, &seg, events)
    }

    fn dispatch_tcp_segment(&mut self, local: IpEndpoint, remote: IpEndpoint, seg: &segment::Segment<'_>, events: &mut Events) -> NetResult<()> {
        let Some(idx) = self.tcp.find_socket(local, remote) else { return Ok(()) };

        if self.tcp.state(idx) == Some(TcpState::Listen) {
            if seg.flags.syn && !seg.flags.ack {
                let iss = self.prng.isn();
                let mss = seg.options.mss.unwrap_or(536);
                if let Ok((new_idx, out)) = self.tcp.accept_into(idx, remote, seg.seq, mss, iss) {
                    let _ = events.tcp_accepted.push(new_idx);
                    self.send_tcp_segment(new_idx, local, remote, &out)?;
                }
            }
            return Ok(());
        }

        if let Ok(outs) = self.tcp.receive(idx, seg) {
            for out in outs.iter() {
                self.send_tcp_segment(idx, local, remote, out)?;
            }
        }
        Ok(())
    }

    fn send_tcp_segment(&mut self, idx: usize, local: IpEndpoint, remote: IpEndpoint, out: &SegmentOut) -> NetResult<()> {
        let mut payload_buf = [0u8; 1460];
        let n = self.tcp.peek_payload(idx, out.payload_from, out.payload_len, &mut payload_buf);
        match (local, remote) {
            (IpEndpoint::V4 { addr: local_addr, port: local_port }, IpEndpoint::V4 { addr: remote_addr, port: remote_port }) => {
                let payload = &payload_buf[..n];
                self.emit_ipv4(remote_addr, ipv4::PROTO_TCP, |buf| {
                    segment::build_ipv4(
                        buf, local_addr, remote_addr, local_port, remote_port, out.seq, out.ack, out.flags, out.window, out.mss,
                        payload,
                    )
                })
            }
            (IpEndpoint::V6 { addr: local_addr, port: local_port }, IpEndpoint::V6 { addr: remote_addr, port: remote_port }) => {
                let payload = &payload_buf[..n];
                self.emit_ipv6(remote_addr, ipv6::NEXT_HEADER_TCP, |buf| {
                    segment::build_ipv6(
                        buf, local_addr, remote_addr, local_port, remote_port, out.seq, out.ack, out.flags, out.window, out.mss,
                        payload,
                    )
                })
            }
            _ => Err(NetError::InvalidParameter),
        }
    }

    /// Open a listening IPv4 socket on `port`. This engine binds to the
    /// interface's one configured address rather than a wildcard: no
    /// multi-address/any-address TCP listen.
    pub fn tcp_listen_v4(&mut self, port: u16) -> NetResult<usize> {
        let local = IpEndpoint::V4 { addr: self.ipv4.addr, port };
        let idx = self.tcp.get_socket(local)?;
        self.tcp.listen(idx)?;
        Ok(idx)
    }

    pub fn tcp_listen_v6(&mut self, port: u16) -> NetResult<usize> {
        let addr = self.ipv6.static_addr.unwrap_or(self.ipv6.link_local);
        let local = IpEndpoint::V6 { addr, port };
        let idx = self.tcp.get_socket(local)?;
        self.tcp.listen(idx)?;
        Ok(idx)
    }

    pub fn tcp_connect(&mut self, local_port: u16, remote: IpEndpoint) -> NetResult<usize> {
        let local = match remote {
            IpEndpoint::V4 { .. } => IpEndpoint::V4 { addr: self.ipv4.addr, port: local_port },
            IpEndpoint::V6 { .. } => {
                IpEndpoint::V6 { addr: self.ipv6.static_addr.unwrap_or(self.ipv6.link_local), port: local_port }
            }
        };
        let idx = self.tcp.get_socket(local)?;
        let iss = self.prng.isn();
        let mss = self.tcp_default_mss;
        let out = self.tcp.connect(idx, remote, iss, mss)?;
        self.send_tcp_segment(idx, local, remote, &out)?;
        Ok(idx)
    }

    pub fn tcp_send(&mut self, idx: usize, data: &[u8]) -> NetResult<usize> {
        self.tcp.send(idx, data)
    }

    pub fn tcp_send_ready(&self, idx: usize) -> usize {
        self.tcp.send_ready(idx)
    }

    pub fn tcp_recv(&mut self, idx: usize, out: &mut [u8]) -> usize {
        self.tcp.get_buf(idx, out)
    }

    pub fn tcp_close(&mut self, idx: usize) -> NetResult<()> {
        let endpoints = self.tcp.endpoints(idx);
        if let Some(out) = self.tcp.close(idx)? {
            if let Some((local, remote)) = endpoints {
                self.send_tcp_segment(idx, local, remote, &out)?;
            }
        }
        Ok(())
    }

    pub fn tcp_abort(&mut self, idx: usize) -> NetResult<()> {
        let endpoints = self.tcp.endpoints(idx);
        if let Some(out) = self.tcp.abort(idx)? {
            if let Some((local, remote)) = endpoints {
                self.send_tcp_segment(idx, local, remote, &out)?;
            }
        }
        Ok(())
    }

    pub fn tcp_state(&self, idx: usize) -> Option<TcpState> {
        self.tcp.state(idx)
    }

    pub fn tcp_take_error(&mut self, idx: usize) -> Option<NetError> {
        self.tcp.take_error(idx)
    }

    // ---- multicast membership ------------------------------------------

    pub fn join_multicast_v4(&mut self, group: Ipv4Addr) -> bool {
        self.igmp.join(group)
    }

    pub fn leave_multicast_v4(&mut self, group: Ipv4Addr) -> bool {
        self.igmp.leave(group)
    }

    pub fn join_multicast_v6(&mut self, group: Ipv6Addr) -> bool {
        self.mld.join(group)
    }

    pub fn leave_multicast_v6(&mut self, group: Ipv6Addr) -> bool {
        self.mld.leave(group)
    }

    // ---- poll / tick ----------------------------------------------------

    /// Drain every frame the driver has waiting and dispatch it. Call this
    /// as often as the driver can produce frames; `tick` drives everything
    /// time-based instead.
    pub fn poll(&mut self, events: &mut Events) {
        let mut scratch = [0u8; crate::frame::MAX_FRAME_LEN];
        let mut owned: Vec<heapless::Vec<u8, { crate::frame::MAX_FRAME_LEN }>, 4> = Vec::new();
        self.iface.drain_rx(&mut scratch, |frame| {
            if owned.is_full() {
                return;
            }
            let mut buf: heapless::Vec<u8, { crate::frame::MAX_FRAME_LEN }> = heapless::Vec::new();
            let _ = buf.extend_from_slice(frame);
            let _ = owned.push(buf);
        });
        for frame in owned.iter() {
            self.handle_frame(frame, events);
        }
    }

    /// Advance every timer-driven sub-component by `ticks` 100ms ticks
    /// ([`crate::timers::TICK_MS`]) and transmit whatever becomes due:
    /// ARP/NDP retries, IGMP/MLD reports, DHCP/AutoIP/SLAAC progress, and
    /// queued TCP segments.
    pub fn tick(&mut self, ticks: u32, events: &mut Events) {
        if self.link_prescaler.advance(ticks) > 0 {
            if let Some(event) = self.iface.poll_link() {
                self.on_link_event(event, events);
            }
        }

        self.tick_arp();
        self.tick_ndp();
        self.tick_slaac(ticks);
        self.tick_igmp(ticks);
        self.tick_mld(ticks);
        self.tick_ip4_reasm(ticks);
        self.tick_ip6_reasm(ticks);

        if self.dhcp.is_some() {
            self.cycle_dhcp(events);
        } else if self.autoip_active {
            self.tick_autoip();
        }

        self.tick_tcp(ticks);
    }

    fn on_link_event(&mut self, event: LinkEvent, events: &mut Events) {
        match event {
            LinkEvent::Up => {
                events.link_up = true;
                self.mac_changed = true;
                if let Some(dhcp) = self.dhcp.as_mut() {
                    match dhcp.remembered_ip {
                        Some(ip) => dhcp.begin_at_init_reboot(ip),
                        None => dhcp.begin_at_init(),
                    }
                } else if !self.autoip_active {
                    self.autoip.begin(&mut self.prng);
                    self.autoip_active = true;
                }
            }
            LinkEvent::Down => {
                events.link_down = true;
                if let Some(dhcp) = self.dhcp.as_mut() {
                    dhcp.handle_link_drop();
                }
                self.autoip_active = false;
                self.ipv4.addr = Ipv4Addr::UNSPECIFIED;
            }
        }
    }

    fn tick_arp(&mut self) {
        let mut retry: Vec<Ipv4Addr, ARP_CACHE_N> = Vec::new();
        self.arp.tick(1, &mut retry);
        for addr in retry.iter() {
            let sha = self.iface.mac();
            let spa = self.ipv4.addr;
            let mut buf = [0u8; arp::ARP_FRAME_LEN];
            let n = arp::build_request(&mut buf, sha, spa, *addr);
            let _ = self.iface.send(eth::ETHERTYPE_ARP, NextHop::Broadcast, &buf[..n]);
        }
    }

    fn tick_ndp(&mut self) {
        let mut retry: Vec<Ipv6Addr, NDP_CACHE_N> = Vec::new();
        self.ndp.tick(1, &mut retry);
        for addr in retry.iter() {
            self.send_neighbor_solicitation(*addr);
        }
    }

    fn tick_slaac(&mut self, ticks: u32) {
        let mac = self.iface.mac();
        let link_up = self.iface.is_link_up();
        let entropy = self.prng.next_u32();
        self.slaac.advance(ticks, link_up, self.mac_changed, mac, entropy);
        self.mac_changed = false;
        self.ipv6.link_local = self.slaac.link_local;
        if let Some(addr) = self.slaac.slaac_addresses(mac).first() {
            self.ipv6.static_addr = Some(*addr);
        }
        if self.slaac.should_send_rs() {
            let src = Ipv6Addr::UNSPECIFIED;
            let dst = ipv6::NEXT_HEADER_ICMPV6;
            let _ = dst;
            let mut buf = [0u8; 32];
            buf[0] = icmpv6::TYPE_ROUTER_SOLICITATION;
            buf[1] = 0;
            let n = ndp::wire::build_router_solicitation(&mut buf[4..], Some(mac));
            let all_routers = Ipv6Addr::from_octets([0xFF, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
            let total = icmpv6::finish_with_checksum(&mut buf, 4 + n, src, all_routers);
            let _ = self.iface.send(eth::ETHERTYPE_IPV6, NextHop::Ipv6Multicast(all_routers), &buf[..total]);
        }
    }

    fn tick_igmp(&mut self, ticks: u32) {
        let mut due_reports: Vec<Ipv4Addr, IGMP_GROUPS_N> = Vec::new();
        let mut due_joins: Vec<Ipv4Addr, IGMP_GROUPS_N> = Vec::new();
        self.igmp.tick(ticks, &mut due_reports, &mut due_joins);
        for group in due_reports.iter().chain(due_joins.iter()) {
            let group = *group;
            let v1 = self.igmp.v1_compat_active(group);
            let kind = if v1 { igmp::IGMP_REPORT_V1 } else { igmp::IGMP_REPORT_V2 };
            let _ = self.emit_ipv4_with_router_alert(group, ipv4::PROTO_IGMP, |buf| igmp::build(buf, kind, 0, group));
        }
        for group in due_reports.iter() {
            self.igmp.ack_report(*group);
        }
        for group in due_joins.iter() {
            self.igmp.ack_join(*group);
        }
    }

    fn tick_mld(&mut self, ticks: u32) {
        let mut due_reports: Vec<Ipv6Addr, MLD_GROUPS_N> = Vec::new();
        let mut due_joins: Vec<Ipv6Addr, MLD_GROUPS_N> = Vec::new();
        self.mld.tick(ticks, &mut due_reports, &mut due_joins);
        for group in due_reports.iter().chain(due_joins.iter()) {
            let group = *group;
            let src = self.ipv6.link_local;
            let _ = self.emit_ipv6_multicast_report(src, group);
        }
        for group in due_reports.iter() {
            self.mld.ack_report(*group);
        }
        for group in due_joins.iter() {
            self.mld.ack_join(*group);
        }
    }

    fn emit_ipv6_multicast_report(&mut self, src: Ipv6Addr, group: Ipv6Addr) -> NetResult<()> {
        self.emit_ipv6(group, ipv6::NEXT_HEADER_ICMPV6, |buf| {
            let n = mld::build(buf, mld::MLD_LISTENER_REPORT, 0, group);
            icmpv6::finish_with_checksum(buf, n, src, group)
        })
    }

    fn tick_ip4_reasm(&mut self, ticks: u32) {
        let mut expired: Vec<(Ipv4Addr, Ipv4Addr, u8, u16), IP4_REASM_N> = Vec::new();
        self.ip4_reasm.tick(ticks, &mut expired);
    }

    fn tick_ip6_reasm(&mut self, ticks: u32) {
        let mut expired: Vec<(Ipv6Addr, Ipv6Addr, u32), IP6_REASM_N> = Vec::new();
        self.ip6_reasm.tick(ticks, &mut expired);
    }

    fn tick_autoip(&mut self) {
        match self.autoip.advance(1, &mut self.prng) {
            autoip::Action::SendProbe(candidate) => {
                let mac = self.iface.mac();
                let mut buf = [0u8; arp::ARP_FRAME_LEN];
                let n = arp::build_request(&mut buf, mac, Ipv4Addr::UNSPECIFIED, candidate);
                let _ = self.iface.send(eth::ETHERTYPE_ARP, NextHop::Broadcast, &buf[..n]);
            }
            autoip::Action::SendAnnounce(candidate) => self.send_gratuitous_arp(candidate),
            autoip::Action::Bound(candidate) => {
                self.ipv4.addr = candidate;
                self.ipv4.mask = Ipv4Addr::new(255, 255, 0, 0);
                self.ipv4.gateway = Ipv4Addr::UNSPECIFIED;
            }
            autoip::Action::None => {}
        }
    }

    fn tick_tcp(&mut self, ticks: u32) {
        let mut out: Vec<(usize, SegmentOut), TCP_SOCKETS_N> = Vec::new();
        self.tcp.tick(ticks, &mut out);
        for (idx, seg_out) in out.iter() {
            if let Some((local, remote)) = self.tcp.endpoints(*idx) {
                let _ = self.send_tcp_segment(*idx, local, remote, seg_out);
            }
        }
    }
}
