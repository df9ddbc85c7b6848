//! DHCPv4 client (RFC 2131, RFC 2132).
//!
//! State machine shape, retry/timer naming and the options table are
//! grounded on `DhcpClient` in `sw/net/src/dhcp.rs`, which deliberately
//! omits `InitReboot`/`Rebooting` ("Note that InitReboot and Rebooting
//! were intentionally omitted"). This engine adds them back in, along with
//! relay-agent (`giaddr`, Option 82) handling that a client reaching its
//! server directly never needed.
//! Packet construction uses this crate's own [`crate::eth`]/[`crate::ipv4`]/
//! [`crate::checksum`] building blocks rather than raw byte-offset
//! templates, since those primitives now exist at the engine level instead
//! of being one-off to this module.

use heapless::Vec;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::DhcpOptions;
use crate::hostname::Hostname;
use crate::prng::NetPrng;
use crate::timers::{Backoff, Countdown, CountdownStatus, RetryStatus, Stopwatch};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const DHCP_HEADER_LEN: usize = 240;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// DHCP client states (RFC 2131 §4.4 state diagram).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum State {
    Halted,
    Init,
    /// Added : restart with a remembered lease instead
    /// of beginning a full Discover/Offer exchange (RFC 2131 §4.4.3, used on
    /// link restoration when a prior binding may still be valid).
    InitReboot,
    Selecting,
    Rebooting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PacketNeeded {
    Discover,
    Request,
    Renew,
    Rebind,
    None,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DhcpEvent {
    ChangedToBound,
    ChangedToHalted,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum RequestKind {
    Discover,
    Reboot,
    Renew,
    Rebind,
}

const RETRY_SCHEDULE: [u32; 6] = [4, 8, 16, 32, 64, 64];

/// Relay-agent context attached to a request when this engine itself is
/// relaying rather than reaching a server directly on-link.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelayInfo {
    pub giaddr: Ipv4Addr,
    pub circuit_id: Option<[u8; 8]>,
    pub remote_id: Option<[u8; 8]>,
}

pub struct DhcpClient {
    entropy: NetPrng,
    event_latch: Option<DhcpEvent>,
    timer_t1: Countdown,
    timer_t2: Countdown,
    timer_lease: Countdown,
    pub hostname: Hostname,
    pub state: State,
    pub secs: Stopwatch,
    retry: Backoff,
    pub options: DhcpOptions,
    pub relay: Option<RelayInfo>,
    pub xid: Option<u32>,
    pub sid: Option<Ipv4Addr>,
    pub ip: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub gateway_mac: Option<MacAddr>,
    pub lease_sec: Option<u32>,
    pub dns: Option<Ipv4Addr>,
    /// Remembered binding from a previous session, consulted by
    /// `begin_at_init_reboot`.
    pub remembered_ip: Option<Ipv4Addr>,
}

impl DhcpClient {
    pub fn new(options: DhcpOptions, seed: &[u16; 8]) -> Self {
        DhcpClient {
            entropy: NetPrng::new_from(seed),
            event_latch: None,
            timer_t1: Countdown::new(),
            timer_t2: Countdown::new(),
            timer_lease: Countdown::new(),
            hostname: Hostname::new_blank(),
            state: State::Halted,
            secs: Stopwatch::new(),
            retry: Backoff::new(&RETRY_SCHEDULE),
            options,
            relay: None,
            xid: None,
            sid: None,
            ip: None,
            subnet: None,
            gateway: None,
            gateway_mac: None,
            lease_sec: None,
            dns: None,
            remembered_ip: None,
        }
    }

    pub fn pop_and_ack_change_event(&mut self) -> Option<DhcpEvent> {
        self.event_latch.take()
    }

    fn reset_bindings(&mut self) {
        self.sid = None;
        self.ip = None;
        self.subnet = None;
        self.gateway = None;
        self.lease_sec = None;
        self.dns = None;
        self.timer_t1.clear();
        self.timer_t2.clear();
        self.timer_lease.clear();
    }

    fn halt_and_reset(&mut self) {
        self.state = State::Halted;
        self.event_latch = Some(DhcpEvent::ChangedToHalted);
        self.secs.reset();
        self.reset_bindings();
    }

    pub fn handle_link_drop(&mut self) {
        self.halt_and_reset();
    }

    /// Begin a full Discover/Offer/Request exchange (RFC 2131 §4.4.1 INIT).
    pub fn begin_at_init(&mut self) {
        if self.hostname.is_empty() {
            self.hostname.randomize(&mut self.entropy);
        }
        self.state = State::Init;
        self.secs.reset();
        self.retry = Backoff::new(&RETRY_SCHEDULE);
        self.xid = Some(self.entropy.xid());
    }

    /// Begin at INIT-REBOOT with a remembered binding (RFC 2131 §4.4.3,
    /// ): skip straight to a unicast/broadcast Request for
    /// `remembered_ip` instead of re-Discovering.
    pub fn begin_at_init_reboot(&mut self, remembered_ip: Ipv4Addr) {
        self.remembered_ip = Some(remembered_ip);
        self.state = State::InitReboot;
        self.secs.reset();
        self.retry = Backoff::new(&RETRY_SCHEDULE);
        self.xid = Some(self.entropy.xid());
    }

    /// Advance the state machine by one tick, returning what packet (if
    /// any) must be transmitted.
    pub fn cycle_clock(&mut self) -> PacketNeeded {
        match self.state {
            State::Halted => PacketNeeded::None,
            State::Init => {
                self.secs.start();
                self.retry.start(self.entropy.next_u32());
                self.state = State::Selecting;
                PacketNeeded::Discover
            }
            State::InitReboot => {
                self.secs.start();
                self.retry.start(self.entropy.next_u32());
                self.state = State::Rebooting;
                PacketNeeded::Request
            }
            State::Selecting => match self.ip {
                Some(_) => {
                    self.state = State::Requesting;
                    self.retry.start(self.entropy.next_u32());
                    PacketNeeded::Request
                }
                None => self.on_retry(RequestKind::Discover),
            },
            State::Rebooting => self.on_retry(RequestKind::Reboot),
            State::Requesting => self.on_retry(RequestKind::Discover),
            State::Bound => match self.timer_t1.status() {
                CountdownStatus::Done => {
                    self.timer_t1.clear();
                    self.state = State::Renewing;
                    self.retry.start(self.entropy.next_u32());
                    self.secs.start();
                    PacketNeeded::Renew
                }
                _ => PacketNeeded::None,
            },
            State::Renewing => match self.timer_t2.status() {
                CountdownStatus::Done => {
                    self.timer_t2.clear();
                    self.state = State::Rebinding;
                    self.retry.start(self.entropy.next_u32());
                    self.secs.start();
                    PacketNeeded::Rebind
                }
                _ => self.on_retry(RequestKind::Renew),
            },
            State::Rebinding => match self.timer_lease.status() {
                CountdownStatus::Done => {
                    self.reset_bindings();
                    self.state = State::Halted;
                    self.event_latch = Some(DhcpEvent::ChangedToHalted);
                    PacketNeeded::None
                }
                _ => self.on_retry(RequestKind::Rebind),
            },
        }
    }

    fn on_retry(&mut self, kind: RequestKind) -> PacketNeeded {
        match self.retry.status() {
            RetryStatus::Halted => {
                self.halt_and_reset();
                PacketNeeded::None
            }
            RetryStatus::Running => PacketNeeded::None,
            RetryStatus::Expired => {
                self.retry.schedule_next(self.entropy.next_u32());
                match kind {
                    RequestKind::Discover => PacketNeeded::Discover,
                    RequestKind::Reboot => PacketNeeded::Request,
                    RequestKind::Renew => PacketNeeded::Renew,
                    RequestKind::Rebind => PacketNeeded::Rebind,
                }
            }
        }
    }

    pub fn advance_ticks(&mut self, ticks: u32) {
        self.secs.advance(ticks);
        self.retry.advance(ticks);
        self.timer_t1.advance(ticks);
        self.timer_t2.advance(ticks);
        self.timer_lease.advance(ticks);
    }

    pub fn handle_offer(&mut self, offer: &OfferFields) {
        if self.state != State::Selecting {
            return;
        }
        self.sid = Some(offer.server_id);
        self.ip = Some(offer.your_ip);
        self.gateway = offer.gateway;
        self.gateway_mac = offer.gateway_mac;
        self.lease_sec = Some(offer.lease_sec);
        self.subnet = offer.subnet;
        self.dns = offer.dns;
    }

    /// RFC 2131 §4.4.5: T1 = 0.5*lease, T2 = 0.875*lease, with the lease
    /// timer itself set a little short of the full interval as clock-drift
    /// margin.
    pub fn handle_ack(&mut self, lease_sec: u32) {
        match self.state {
            State::Requesting | State::Rebooting | State::Renewing | State::Rebinding => {
                self.lease_sec = Some(lease_sec);
                self.timer_t1.start(lease_sec >> 1);
                self.timer_t2.start(((lease_sec as u64 * 7) >> 3) as u32);
                self.timer_lease.start(((lease_sec as u64 * 15) >> 4) as u32);
                self.state = State::Bound;
                self.event_latch = Some(DhcpEvent::ChangedToBound);
            }
            _ => {}
        }
    }

    pub fn handle_nak(&mut self) {
        match self.state {
            State::Requesting | State::Rebooting => {
                self.reset_bindings();
                self.state = State::Init;
            }
            State::Renewing | State::Rebinding => {
                self.reset_bindings();
                self.state = State::Halted;
                self.event_latch = Some(DhcpEvent::ChangedToHalted);
            }
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OfferFields {
    pub server_id: Ipv4Addr,
    pub your_ip: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub gateway_mac: Option<MacAddr>,
    pub lease_sec: u32,
    pub subnet: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl MessageType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

/// BOOTP/DHCP message header (RFC 2131 §2), before the options block.
#[derive(Clone, Copy, Debug)]
pub struct BootpHeader {
    pub op: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpParseError {
    TooShort,
    NotReply,
    BadMagicCookie,
}

pub struct ParsedMessage {
    pub header: BootpHeader,
    pub msg_type: Option<MessageType>,
    pub server_id: Option<Ipv4Addr>,
    pub lease_sec: Option<u32>,
    pub subnet: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
}

const BOOTREPLY: u8 = 2;

pub fn parse(data: &[u8]) -> Result<ParsedMessage, DhcpParseError> {
    if data.len() < DHCP_HEADER_LEN + 4 {
        return Err(DhcpParseError::TooShort);
    }
    if data[0] != BOOTREPLY {
        return Err(DhcpParseError::NotReply);
    }
    let header = BootpHeader {
        op: data[0],
        xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        secs: u16::from_be_bytes([data[8], data[9]]),
        broadcast: data[10] & 0x80 != 0,
        ciaddr: Ipv4Addr::from_be_bytes([data[12], data[13], data[14], data[15]]),
        yiaddr: Ipv4Addr::from_be_bytes([data[16], data[17], data[18], data[19]]),
        siaddr: Ipv4Addr::from_be_bytes([data[20], data[21], data[22], data[23]]),
        giaddr: Ipv4Addr::from_be_bytes([data[24], data[25], data[26], data[27]]),
        chaddr: MacAddr::from_bytes(&data[28..34]),
    };
    if &data[236..240] != &MAGIC_COOKIE {
        return Err(DhcpParseError::BadMagicCookie);
    }
    let mut msg = ParsedMessage { header, msg_type: None, server_id: None, lease_sec: None, subnet: None, gateway: None, dns: None };
    let options = &data[240..];
    let mut i = 0;
    while i < options.len() {
        let tag = options[i];
        if tag == 255 {
            break;
        }
        if tag == 0 {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            break;
        }
        let len = options[i + 1] as usize;
        let start = i + 2;
        if start + len > options.len() {
            break;
        }
        let body = &options[start..start + len];
        match tag {
            53 if len == 1 => msg.msg_type = MessageType::from_u8(body[0]),
            54 if len == 4 => msg.server_id = Some(Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])),
            51 if len == 4 => msg.lease_sec = Some(u32::from_be_bytes([body[0], body[1], body[2], body[3]])),
            1 if len == 4 => msg.subnet = Some(Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])),
            3 if len >= 4 => msg.gateway = Some(Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])),
            6 if len >= 4 => msg.dns = Some(Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])),
            _ => {}
        }
        i = start + len;
    }
    Ok(msg)
}

/// Append standard client options (param request list, max message size,
/// client identifier) to `out` starting at `pos`, returning the new
/// position. Client identifier defaults to hardware type + MAC unless
/// `options.client_id` overrides it ( Open Question, resolved in
/// `config::DhcpOptions` as a per-instance field).
fn append_common_options(out: &mut [u8], mut pos: usize, mac: MacAddr, options: &DhcpOptions) -> usize {
    out[pos..pos + 2].copy_from_slice(&[55, 4]);
    out[pos + 2..pos + 6].copy_from_slice(&[1, 3, 6, 15]);
    pos += 6;
    out[pos..pos + 2].copy_from_slice(&[57, 2]);
    out[pos + 2..pos + 4].copy_from_slice(&1500u16.to_be_bytes());
    pos += 4;
    match &options.client_id {
        Some(id) => {
            out[pos] = 61;
            out[pos + 1] = id.len() as u8;
            out[pos + 2..pos + 2 + id.len()].copy_from_slice(id);
            pos += 2 + id.len();
        }
        None => {
            out[pos..pos + 2].copy_from_slice(&[61, 7]);
            out[pos + 2] = 1;
            out[pos + 3..pos + 9].copy_from_slice(&mac.octets());
            pos += 9;
        }
    }
    pos
}

fn write_bootp_header(out: &mut [u8], xid: u32, secs: u16, ciaddr: Ipv4Addr, mac: MacAddr, giaddr: Ipv4Addr) {
    out[0] = 1; // BOOTREQUEST
    out[1] = 1; // htype Ethernet
    out[2] = 6; // hlen
    out[3] = 0; // hops
    out[4..8].copy_from_slice(&xid.to_be_bytes());
    out[8..10].copy_from_slice(&secs.to_be_bytes());
    out[10..12].copy_from_slice(&[0, 0]);
    out[12..16].copy_from_slice(&ciaddr.octets());
    out[16..20].copy_from_slice(&[0, 0, 0, 0]);
    out[20..24].copy_from_slice(&[0, 0, 0, 0]);
    out[24..28].copy_from_slice(&giaddr.octets());
    out[28..34].copy_from_slice(&mac.octets());
    out[34..236].fill(0);
    out[236..240].copy_from_slice(&MAGIC_COOKIE);
}

/// Build a DHCPDISCOVER (or DHCPREQUEST for INIT-REBOOT) message into
/// `out`, returning the number of bytes written.
pub fn build_discover(out: &mut [u8], client: &DhcpClient, mac: MacAddr) -> usize {
    let giaddr = client.relay.map(|r| r.giaddr).unwrap_or(Ipv4Addr::UNSPECIFIED);
    write_bootp_header(out, client.xid.unwrap_or(0), client.secs.elapsed_s() as u16, Ipv4Addr::UNSPECIFIED, mac, giaddr);
    let mut pos = 240;
    out[pos..pos + 3].copy_from_slice(&[53, 1, MessageType::Discover.as_u8()]);
    pos += 3;
    if let State::InitReboot | State::Rebooting = client.state {
        if let Some(ip) = client.remembered_ip {
            out[pos..pos + 2].copy_from_slice(&[50, 4]);
            out[pos + 2..pos + 6].copy_from_slice(&ip.octets());
            pos += 6;
        }
    }
    pos = append_common_options(out, pos, mac, &client.options);
    if !client.hostname.is_empty() {
        out[pos] = 12;
        out[pos + 1] = client.hostname.len() as u8;
        out[pos + 2..pos + 2 + client.hostname.len()].copy_from_slice(client.hostname.as_bytes());
        pos += 2 + client.hostname.len();
    }
    out[pos] = 255;
    pos + 1
}

/// Build a DHCPREQUEST for the Requesting/Renewing/Rebinding states.
pub fn build_request(out: &mut [u8], client: &DhcpClient, mac: MacAddr, renewing: bool) -> usize {
    let ciaddr = if renewing { client.ip.unwrap_or(Ipv4Addr::UNSPECIFIED) } else { Ipv4Addr::UNSPECIFIED };
    let giaddr = client.relay.map(|r| r.giaddr).unwrap_or(Ipv4Addr::UNSPECIFIED);
    write_bootp_header(out, client.xid.unwrap_or(0), client.secs.elapsed_s() as u16, ciaddr, mac, giaddr);
    let mut pos = 240;
    out[pos..pos + 3].copy_from_slice(&[53, 1, MessageType::Request.as_u8()]);
    pos += 3;
    if !renewing {
        if let (Some(ip), Some(sid)) = (client.ip, client.sid) {
            out[pos..pos + 2].copy_from_slice(&[50, 4]);
            out[pos + 2..pos + 6].copy_from_slice(&ip.octets());
            out[pos + 6..pos + 8].copy_from_slice(&[54, 4]);
            out[pos + 8..pos + 12].copy_from_slice(&sid.octets());
            pos += 12;
        }
    }
    pos = append_common_options(out, pos, mac, &client.options);
    out[pos] = 255;
    pos + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddr {
        MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    #[test]
    fn full_exchange_reaches_bound_state() {
        let mut client = DhcpClient::new(DhcpOptions::defaults(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        client.begin_at_init();
        assert_eq!(client.cycle_clock(), PacketNeeded::Discover);
        assert_eq!(client.state, State::Selecting);
        client.handle_offer(&OfferFields {
            server_id: Ipv4Addr::new(10, 0, 0, 1),
            your_ip: Ipv4Addr::new(10, 0, 0, 50),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            gateway_mac: Some(mac()),
            lease_sec: 3600,
            subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns: Some(Ipv4Addr::new(10, 0, 0, 1)),
        });
        assert_eq!(client.cycle_clock(), PacketNeeded::Request);
        assert_eq!(client.state, State::Requesting);
        client.handle_ack(3600);
        assert_eq!(client.state, State::Bound);
        assert_eq!(client.pop_and_ack_change_event(), Some(DhcpEvent::ChangedToBound));
    }

    #[test]
    fn nak_during_requesting_returns_to_init() {
        let mut client = DhcpClient::new(DhcpOptions::defaults(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        client.begin_at_init();
        client.cycle_clock();
        client.state = State::Requesting;
        client.handle_nak();
        assert_eq!(client.state, State::Init);
    }

    #[test]
    fn selecting_retries_then_halts_when_schedule_exhausts() {
        let mut client = DhcpClient::new(DhcpOptions::defaults(), &[9, 8, 7, 6, 5, 4, 3, 2]);
        client.begin_at_init();
        client.cycle_clock();
        for _ in 0..(RETRY_SCHEDULE.len() + 1) {
            loop {
                client.advance_ticks(1);
                if client.retry.status() != RetryStatus::Running {
                    break;
                }
            }
            client.cycle_clock();
        }
        assert_eq!(client.state, State::Halted);
    }

    #[test]
    fn discover_frame_round_trips_through_parse() {
        let mut client = DhcpClient::new(DhcpOptions::defaults(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        client.begin_at_init();
        let mut buf = [0u8; 300];
        let n = build_discover(&mut buf, &client, mac());
        assert_eq!(buf[236..240], MAGIC_COOKIE);
        assert!(n > 240);
    }

    #[test]
    fn parse_offer_extracts_expected_fields() {
        let mut client = DhcpClient::new(DhcpOptions::defaults(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        client.begin_at_init();
        let xid = client.xid.unwrap();
        let mut buf = [0u8; 300];
        write_bootp_header(&mut buf, xid, 0, Ipv4Addr::UNSPECIFIED, mac(), Ipv4Addr::UNSPECIFIED);
        buf[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 50).octets());
        let mut pos = 240;
        buf[pos..pos + 3].copy_from_slice(&[53, 1, MessageType::Offer.as_u8()]);
        pos += 3;
        buf[pos..pos + 2].copy_from_slice(&[54, 4]);
        buf[pos + 2..pos + 6].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        pos += 6;
        buf[pos..pos + 2].copy_from_slice(&[51, 4]);
        buf[pos + 2..pos + 6].copy_from_slice(&3600u32.to_be_bytes());
        pos += 6;
        buf[pos] = 255;
        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.msg_type, Some(MessageType::Offer));
        assert_eq!(parsed.header.yiaddr, Ipv4Addr::new(10, 0, 0, 50));
        assert_eq!(parsed.server_id, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parsed.lease_sec, Some(3600));
    }
}
