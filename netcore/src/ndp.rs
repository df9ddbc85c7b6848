//! Neighbor Discovery Protocol (RFC 4861) neighbor cache and SLAAC address
//! autoconfiguration (RFC 4862).
//!
//! Grounded on `net_ndp.c`: the
//! neighbor cache state machine (`NDP_STATE_FREE/RESERVED/PENDING/REFRESH/
//! RESOLVED`) and the SLAAC runner's four-state progression
//! (`SLAAC_STATE_INIT -> START -> DISCOVER -> ACTIVE`, driven off a 100ms
//! system tick) are carried over in spirit; the cache container itself is
//! new, built the way [`crate::arp::ArpCache`] is built for IPv4.

use heapless::Vec;

use crate::addr::{Ipv6Addr, MacAddr};
use crate::config::NdpConfig;
use crate::frame::Frame;
use crate::timers::{s_to_ticks, Countdown, CountdownStatus};

/// Per-entry pending-frame queue depth, mirroring [`crate::arp::PENDING_CAP`].
pub const PENDING_CAP: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NeighborState {
    Resolved,
    Pending,
    /// Reachability is being reconfirmed; the old MAC is still usable until
    /// resolution completes or times out.
    Stale,
}

struct Neighbor {
    addr: Ipv6Addr,
    mac: MacAddr,
    state: NeighborState,
    ttl: Countdown,
    retries: u8,
    is_router: bool,
    /// Frames waiting on this neighbor's resolution, mirroring the ARP
    /// cache's own pending queue.
    pending: Vec<Frame, PENDING_CAP>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub evictions: u32,
    pub resolutions: u32,
    pub timeouts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(MacAddr),
    Requesting,
    AlreadyPending,
    CacheFull,
}

pub struct NdpCache<const N: usize> {
    neighbors: Vec<Neighbor, N>,
    cfg: NdpConfig,
    pub stats: CacheStats,
}

impl<const N: usize> NdpCache<N> {
    pub fn new(cfg: NdpConfig) -> Self {
        NdpCache { neighbors: Vec::new(), cfg, stats: CacheStats::default() }
    }

    pub fn lookup(&mut self, addr: Ipv6Addr) -> Option<MacAddr> {
        let hit = self
            .neighbors
            .iter()
            .find(|n| n.addr == addr && n.state != NeighborState::Pending)
            .map(|n| n.mac);
        if hit.is_some() {
            self.stats.hits += 1;
        }
        hit
    }

    fn find_mut(&mut self, addr: Ipv6Addr) -> Option<&mut Neighbor> {
        self.neighbors.iter_mut().find(|n| n.addr == addr)
    }

    pub fn resolve(&mut self, addr: Ipv6Addr) -> Resolution {
        if let Some(n) = self.find_mut(addr) {
            return match n.state {
                NeighborState::Resolved | NeighborState::Stale => {
                    self.stats.hits += 1;
                    Resolution::Found(n.mac)
                }
                NeighborState::Pending => Resolution::AlreadyPending,
            };
        }
        self.stats.misses += 1;
        if self.neighbors.is_full() && !self.evict_one() {
            return Resolution::CacheFull;
        }
        let mut ttl = Countdown::new();
        ttl.start(s_to_ticks(self.cfg.pending_timeout_s));
        let _ = self.neighbors.push(Neighbor {
            addr,
            mac: MacAddr::ZERO,
            state: NeighborState::Pending,
            ttl,
            retries: 0,
            is_router: false,
            pending: Vec::new(),
        });
        Resolution::Requesting
    }

    /// Append `frame` to the pending queue of the resolver entry for `addr`.
    /// The entry must already exist in `Pending` state. Returns the frame
    /// back to the caller if there is no such entry or its queue is full.
    pub fn enqueue(&mut self, addr: Ipv6Addr, frame: Frame) -> Result<(), Frame> {
        match self.find_mut(addr) {
            Some(n) if n.state == NeighborState::Pending => n.pending.push(frame),
            _ => Err(frame),
        }
    }

    fn evict_one(&mut self) -> bool {
        if let Some(idx) = self.neighbors.iter().position(|n| n.state != NeighborState::Pending) {
            self.neighbors.swap_remove(idx);
            self.stats.evictions += 1;
            true
        } else {
            false
        }
    }

    /// Install or refresh a neighbor entry from a Neighbor Advertisement or
    /// Router Advertisement source-link-layer option. Returns the frames
    /// queued behind a previously pending request, if this call completed
    /// one, for the caller to send to the now-known MAC and release.
    pub fn learn(&mut self, addr: Ipv6Addr, mac: MacAddr, is_router: bool) -> Vec<Frame, PENDING_CAP> {
        if let Some(n) = self.find_mut(addr) {
            let was_pending = n.state == NeighborState::Pending;
            n.mac = mac;
            n.state = NeighborState::Resolved;
            n.is_router = n.is_router || is_router;
            n.ttl.start(s_to_ticks(self.cfg.cache_timeout_s));
            n.retries = 0;
            if was_pending {
                self.stats.resolutions += 1;
                core::mem::take(&mut n.pending)
            } else {
                Vec::new()
            }
        } else {
            if self.neighbors.is_full() && !self.evict_one() {
                return Vec::new();
            }
            let mut ttl = Countdown::new();
            ttl.start(s_to_ticks(self.cfg.cache_timeout_s));
            let _ = self.neighbors.push(Neighbor {
                addr,
                mac,
                state: NeighborState::Resolved,
                ttl,
                retries: 0,
                is_router,
                pending: Vec::new(),
            });
            Vec::new()
        }
    }

    /// Pick any known default router, preferring one that is not currently
    /// stale.
    pub fn default_router(&self) -> Option<Ipv6Addr> {
        self.neighbors.iter().find(|n| n.is_router && n.state == NeighborState::Resolved).map(|n| n.addr)
    }

    pub fn tick(&mut self, ticks: u32, retry: &mut Vec<Ipv6Addr, N>) {
        retry.clear();
        let mut i = 0;
        while i < self.neighbors.len() {
            self.neighbors[i].ttl.advance(ticks);
            if self.neighbors[i].ttl.status() == CountdownStatus::Done {
                match self.neighbors[i].state {
                    NeighborState::Resolved => {
                        self.neighbors[i].state = NeighborState::Stale;
                        self.neighbors[i].ttl.start(s_to_ticks(self.cfg.pending_timeout_s));
                        let _ = retry.push(self.neighbors[i].addr);
                    }
                    NeighborState::Stale => {
                        self.neighbors.swap_remove(i);
                        self.stats.evictions += 1;
                        continue;
                    }
                    NeighborState::Pending => {
                        if self.neighbors[i].retries >= self.cfg.max_retries {
                            self.stats.timeouts += 1;
                            self.neighbors.swap_remove(i);
                            continue;
                        }
                        self.neighbors[i].retries += 1;
                        self.neighbors[i].ttl.start(s_to_ticks(self.cfg.pending_timeout_s));
                        let _ = retry.push(self.neighbors[i].addr);
                    }
                }
            }
            i += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

/// On-link prefix learned from a Router Advertisement, with a decrementing
/// valid lifetime ("prefix lifetime decrement" on the 64s
/// prescaler, mirroring `net_ndp.c`'s per-minute sweep).
#[derive(Clone, Copy, Debug)]
pub struct PrefixEntry {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub valid_lifetime_s: u32,
}

/// Minimum valid lifetime floor applied to all learned prefixes/addresses,
/// matching `net_ndp.c`'s `SLAAC_MIN_VALID` guard against routers
/// advertising implausibly short lifetimes.
pub const SLAAC_MIN_VALID_S: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlaacState {
    Init,
    Start,
    Discover,
    Active,
}

/// SLAAC autoconfiguration runner (RFC 4862), ported from `net_ndp.c`'s
/// `ndp_slaac_run` state machine but driven by an explicit `advance(ticks)`
/// rather than a live system tick counter.
pub struct Slaac {
    pub state: SlaacState,
    timer: Countdown,
    retries: u8,
    pub link_local: Ipv6Addr,
    pub prefixes: Vec<PrefixEntry, 4>,
    minute_prescaler: crate::timers::Prescaler,
}

impl Slaac {
    pub fn new() -> Self {
        Slaac {
            state: SlaacState::Init,
            timer: Countdown::new(),
            retries: 0,
            link_local: Ipv6Addr::UNSPECIFIED,
            prefixes: Vec::new(),
            minute_prescaler: crate::timers::Prescaler::new(s_to_ticks(64)),
        }
    }

    /// Drive the FSM forward by `ticks` 100ms ticks. `link_up` and
    /// `mac_changed` mirror `net_ndp.c`'s `LinkUp`/`MacNew` interface state
    /// flags; `entropy` seeds the randomized initial delay.
    pub fn advance(&mut self, ticks: u32, link_up: bool, mac_changed: bool, mac: MacAddr, entropy: u32) {
        for _ in 0..ticks {
            self.step(link_up, mac_changed, mac, entropy);
        }
        if self.minute_prescaler.advance(ticks) > 0 {
            self.decrement_prefix_lifetimes();
        }
    }

    fn step(&mut self, link_up: bool, mac_changed: bool, mac: MacAddr, entropy: u32) {
        match self.state {
            SlaacState::Init => {
                if !link_up {
                    return;
                }
                if mac_changed {
                    self.link_local = Ipv6Addr::link_local_from_mac(mac);
                }
                // Random initial delay of 0.1-1.0s, i.e. 1-10 ticks.
                self.timer.start(1 + (entropy % 10));
                self.state = SlaacState::Start;
            }
            SlaacState::Start => {
                self.timer.advance(1);
                if self.timer.status() != CountdownStatus::Done {
                    return;
                }
                self.state = SlaacState::Discover;
                self.retries = 3;
                self.timer.start(1);
            }
            SlaacState::Discover => {
                if !link_up || mac_changed {
                    self.state = SlaacState::Init;
                    return;
                }
                self.timer.advance(1);
                if self.timer.status() != CountdownStatus::Done {
                    return;
                }
                if self.retries != 0 {
                    self.retries -= 1;
                    self.timer.start(s_to_ticks(4));
                    // Caller observes `should_send_rs()` to learn a Router
                    // Solicitation needs to go out this tick.
                } else {
                    self.state = SlaacState::Active;
                }
            }
            SlaacState::Active => {
                if !link_up || mac_changed {
                    self.state = SlaacState::Init;
                }
            }
        }
    }

    /// `true` exactly on the tick a Router Solicitation should be
    /// (re)transmitted.
    pub fn should_send_rs(&self) -> bool {
        self.state == SlaacState::Discover && self.timer.status() == CountdownStatus::Done && self.retries > 0
    }

    fn decrement_prefix_lifetimes(&mut self) {
        let mut i = 0;
        while i < self.prefixes.len() {
            if self.prefixes[i].valid_lifetime_s <= 60 {
                self.prefixes.swap_remove(i);
                continue;
            }
            self.prefixes[i].valid_lifetime_s -= 60;
            i += 1;
        }
    }

    /// Learn or refresh an on-link prefix from a Router Advertisement Prefix
    /// Information option, clamping to [`SLAAC_MIN_VALID_S`].
    pub fn learn_prefix(&mut self, prefix: Ipv6Addr, prefix_len: u8, mut valid_lifetime_s: u32) {
        if valid_lifetime_s < SLAAC_MIN_VALID_S {
            valid_lifetime_s = SLAAC_MIN_VALID_S;
        }
        if let Some(existing) = self.prefixes.iter_mut().find(|p| p.prefix == prefix && p.prefix_len == prefix_len) {
            existing.valid_lifetime_s = valid_lifetime_s;
            return;
        }
        if self.prefixes.is_full() {
            self.prefixes.swap_remove(0);
        }
        let _ = self.prefixes.push(PrefixEntry { prefix, prefix_len, valid_lifetime_s });
    }

    /// Derive SLAAC addresses (one per 64-bit on-link prefix) for the
    /// current MAC, per RFC 4862 §5.5.3.
    pub fn slaac_addresses(&self, mac: MacAddr) -> Vec<Ipv6Addr, 4> {
        let mut out = Vec::new();
        for p in self.prefixes.iter() {
            if p.prefix_len == 64 {
                let _ = out.push(Ipv6Addr::slaac_from_prefix(p.prefix, mac));
            }
        }
        out
    }
}

impl Default for Slaac {
    fn default() -> Self {
        Self::new()
    }
}

/// NDP message wire formats (RFC 4861 §4): Router Solicitation/Advertisement
/// and Neighbor Solicitation/Advertisement, plus the Source/Target
/// Link-Layer-Address and Prefix Information options they carry.
/// These sit in `ndp` rather than `icmpv6` because `icmpv6::classify` only
/// needs the bare message type to route here; the option layout is specific
/// to neighbor discovery.
pub mod wire {
    use super::Ipv6Addr;
    use crate::addr::MacAddr;

    pub const OPT_SOURCE_LL: u8 = 1;
    pub const OPT_TARGET_LL: u8 = 2;
    pub const OPT_PREFIX_INFO: u8 = 3;
    pub const OPT_MTU: u8 = 5;

    pub const FLAG_ROUTER: u8 = 0x80;
    pub const FLAG_SOLICITED: u8 = 0x40;
    pub const FLAG_OVERRIDE: u8 = 0x20;

    pub const PREFIX_FLAG_ONLINK: u8 = 0x80;
    pub const PREFIX_FLAG_AUTONOMOUS: u8 = 0x40;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum NdpParseError {
        TooShort,
        BadOptionLen,
    }

    #[derive(Clone, Copy, Debug, Default)]
    pub struct PrefixOption {
        pub prefix_len: u8,
        pub flags: u8,
        pub valid_lifetime_s: u32,
        pub preferred_lifetime_s: u32,
        pub prefix: Ipv6Addr,
    }

    /// Options found while scanning a Router Advertisement: source
    /// link-layer address, advertised MTU (clamped by the caller to
    /// [1280..1500] ) and up to one Prefix Information
    /// option (the engine's cached-prefix list is small; the firmware this is
    /// grounded on only ever autoconfigures from the first valid one).
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RaOptions {
        pub source_ll: Option<MacAddr>,
        pub mtu: Option<u32>,
        pub prefix: Option<PrefixOption>,
    }

    fn scan_options(data: &[u8]) -> Result<RaOptions, NdpParseError> {
        let mut out = RaOptions::default();
        let mut off = 0usize;
        while off + 2 <= data.len() {
            let kind = data[off];
            let len_units = data[off + 1] as usize;
            if len_units == 0 {
                return Err(NdpParseError::BadOptionLen);
            }
            let len = len_units * 8;
            if off + len > data.len() {
                return Err(NdpParseError::BadOptionLen);
            }
            match kind {
                OPT_SOURCE_LL if len >= 8 => out.source_ll = Some(MacAddr::from_bytes(&data[off + 2..off + 8])),
                OPT_MTU if len == 8 => {
                    out.mtu = Some(u32::from_be_bytes([data[off + 4], data[off + 5], data[off + 6], data[off + 7]]))
                }
                OPT_PREFIX_INFO if len == 32 => {
                    let mut prefix = [0u8; 16];
                    prefix.copy_from_slice(&data[off + 16..off + 32]);
                    out.prefix = Some(PrefixOption {
                        prefix_len: data[off + 2],
                        flags: data[off + 3],
                        valid_lifetime_s: u32::from_be_bytes([
                            data[off + 4],
                            data[off + 5],
                            data[off + 6],
                            data[off + 7],
                        ]),
                        preferred_lifetime_s: u32::from_be_bytes([
                            data[off + 8],
                            data[off + 9],
                            data[off + 10],
                            data[off + 11],
                        ]),
                        prefix: Ipv6Addr::from_octets(prefix),
                    });
                }
                _ => {}
            }
            off += len;
        }
        Ok(out)
    }

    #[derive(Clone, Copy, Debug)]
    pub struct RouterAdvertisement {
        pub router_lifetime_s: u16,
        pub options: RaOptions,
    }

    /// Parse a Router Advertisement body (RFC 4861 §4.2), starting right
    /// after the common ICMPv6 type/code/checksum octets.
    pub fn parse_router_advertisement(body: &[u8]) -> Result<RouterAdvertisement, NdpParseError> {
        if body.len() < 12 {
            return Err(NdpParseError::TooShort);
        }
        let router_lifetime_s = u16::from_be_bytes([body[2], body[3]]);
        let options = scan_options(&body[12..])?;
        Ok(RouterAdvertisement { router_lifetime_s, options })
    }

    #[derive(Clone, Copy, Debug)]
    pub struct NeighborSolicitation {
        pub target: Ipv6Addr,
        pub source_ll: Option<MacAddr>,
    }

    /// Parse a Neighbor Solicitation body (RFC 4861 §4.3).
    pub fn parse_neighbor_solicitation(body: &[u8]) -> Result<NeighborSolicitation, NdpParseError> {
        if body.len() < 20 {
            return Err(NdpParseError::TooShort);
        }
        let mut target = [0u8; 16];
        target.copy_from_slice(&body[4..20]);
        let opts = scan_options(&body[20..])?;
        Ok(NeighborSolicitation { target: Ipv6Addr::from_octets(target), source_ll: opts.source_ll })
    }

    #[derive(Clone, Copy, Debug)]
    pub struct NeighborAdvertisement {
        pub flags: u8,
        pub target: Ipv6Addr,
        pub target_ll: Option<MacAddr>,
    }

    impl NeighborAdvertisement {
        pub fn is_router(&self) -> bool {
            self.flags & FLAG_ROUTER != 0
        }
        pub fn is_solicited(&self) -> bool {
            self.flags & FLAG_SOLICITED != 0
        }
        pub fn is_override(&self) -> bool {
            self.flags & FLAG_OVERRIDE != 0
        }
    }

    /// Parse a Neighbor Advertisement body (RFC 4861 §4.4).
    pub fn parse_neighbor_advertisement(body: &[u8]) -> Result<NeighborAdvertisement, NdpParseError> {
        if body.len() < 20 {
            return Err(NdpParseError::TooShort);
        }
        let flags = body[0];
        let mut target = [0u8; 16];
        target.copy_from_slice(&body[4..20]);
        // Target-LL option reuses the Source-LL option code (2 vs 1) but the
        // same fixed layout, so scan it directly rather than through
        // `scan_options` (which only records `OPT_SOURCE_LL`).
        let mut target_ll = None;
        let mut off = 20;
        while off + 2 <= body.len() {
            let kind = body[off];
            let len_units = body[off + 1] as usize;
            if len_units == 0 {
                return Err(NdpParseError::BadOptionLen);
            }
            let len = len_units * 8;
            if off + len > body.len() {
                return Err(NdpParseError::BadOptionLen);
            }
            if kind == OPT_TARGET_LL && len >= 8 {
                target_ll = Some(MacAddr::from_bytes(&body[off + 2..off + 8]));
            }
            off += len;
        }
        Ok(NeighborAdvertisement { flags, target: Ipv6Addr::from_octets(target), target_ll })
    }

    /// Build a Router Solicitation body (RFC 4861 §4.1), optionally carrying
    /// our Source-LL option.
    pub fn build_router_solicitation(out: &mut [u8], source_ll: Option<MacAddr>) -> usize {
        out[0..4].copy_from_slice(&[0, 0, 0, 0]);
        let mut len = 4;
        if let Some(mac) = source_ll {
            len += write_ll_option(&mut out[len..], OPT_SOURCE_LL, mac);
        }
        len
    }

    /// Build a Neighbor Solicitation body (RFC 4861 §4.3).
    pub fn build_neighbor_solicitation(out: &mut [u8], target: Ipv6Addr, source_ll: Option<MacAddr>) -> usize {
        out[0..4].copy_from_slice(&[0, 0, 0, 0]);
        out[4..20].copy_from_slice(&target.octets());
        let mut len = 20;
        if let Some(mac) = source_ll {
            len += write_ll_option(&mut out[len..], OPT_SOURCE_LL, mac);
        }
        len
    }

    /// Build a Neighbor Advertisement body (RFC 4861 §4.4).
    pub fn build_neighbor_advertisement(
        out: &mut [u8],
        flags: u8,
        target: Ipv6Addr,
        target_ll: Option<MacAddr>,
    ) -> usize {
        out[0] = flags;
        out[1..4].copy_from_slice(&[0, 0, 0]);
        out[4..20].copy_from_slice(&target.octets());
        let mut len = 20;
        if let Some(mac) = target_ll {
            len += write_ll_option(&mut out[len..], OPT_TARGET_LL, mac);
        }
        len
    }

    fn write_ll_option(out: &mut [u8], kind: u8, mac: MacAddr) -> usize {
        out[0] = kind;
        out[1] = 1; // 8 bytes / 8
        out[2..8].copy_from_slice(&mac.octets());
        8
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn neighbor_solicitation_round_trips() {
            let target = Ipv6Addr::LOOPBACK;
            let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
            let mut buf = [0u8; 32];
            let n = build_neighbor_solicitation(&mut buf, target, Some(mac));
            let parsed = parse_neighbor_solicitation(&buf[..n]).unwrap();
            assert_eq!(parsed.target, target);
            assert_eq!(parsed.source_ll, Some(mac));
        }

        #[test]
        fn neighbor_advertisement_flags_round_trip() {
            let target = Ipv6Addr::LOOPBACK;
            let mac = MacAddr::new([9; 6]);
            let mut buf = [0u8; 32];
            let n = build_neighbor_advertisement(&mut buf, FLAG_SOLICITED | FLAG_OVERRIDE, target, Some(mac));
            let parsed = parse_neighbor_advertisement(&buf[..n]).unwrap();
            assert!(parsed.is_solicited());
            assert!(parsed.is_override());
            assert!(!parsed.is_router());
            assert_eq!(parsed.target_ll, Some(mac));
        }

        #[test]
        fn router_advertisement_prefix_option_parses() {
            let mut buf = [0u8; 64];
            buf[2..4].copy_from_slice(&1800u16.to_be_bytes()); // router lifetime
            let opt = &mut buf[12..44];
            opt[0] = OPT_PREFIX_INFO;
            opt[1] = 4; // 32 bytes
            opt[2] = 64;
            opt[3] = PREFIX_FLAG_ONLINK | PREFIX_FLAG_AUTONOMOUS;
            opt[4..8].copy_from_slice(&3600u32.to_be_bytes());
            opt[8..12].copy_from_slice(&1800u32.to_be_bytes());
            opt[16..32].copy_from_slice(&Ipv6Addr::LOOPBACK.octets());
            let parsed = parse_router_advertisement(&buf[..44]).unwrap();
            assert_eq!(parsed.router_lifetime_s, 1800);
            let prefix = parsed.options.prefix.unwrap();
            assert_eq!(prefix.prefix_len, 64);
            assert_eq!(prefix.valid_lifetime_s, 3600);
            assert!(prefix.flags & PREFIX_FLAG_AUTONOMOUS != 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NdpConfig {
        NdpConfig { cache_size: 4, cache_timeout_s: 1200, pending_timeout_s: 2, max_retries: 3, prefix_cache_size: 4 }
    }

    #[test]
    fn resolve_then_learn_completes_pending() {
        let mut cache: NdpCache<4> = NdpCache::new(cfg());
        let addr = Ipv6Addr::LOOPBACK;
        assert_eq!(cache.resolve(addr), Resolution::Requesting);
        assert_eq!(cache.resolve(addr), Resolution::AlreadyPending);
        let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        assert!(cache.learn(addr, mac, false).is_empty());
        assert_eq!(cache.resolve(addr), Resolution::Found(mac));
    }

    #[test]
    fn learn_flushes_queued_frame_on_completed_resolution() {
        let mut cache: NdpCache<4> = NdpCache::new(cfg());
        let addr = Ipv6Addr::LOOPBACK;
        assert_eq!(cache.resolve(addr), Resolution::Requesting);

        let mut pool = crate::frame::FramePool::new(1);
        let mut frame = pool.alloc().unwrap();
        frame.fill(b"queued tcp segment");
        cache.enqueue(addr, frame).unwrap();

        let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        let drained = cache.learn(addr, mac, false);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].as_slice(), b"queued tcp segment");
    }

    #[test]
    fn default_router_found_after_learn() {
        let mut cache: NdpCache<4> = NdpCache::new(cfg());
        let addr = Ipv6Addr::LOOPBACK;
        cache.learn(addr, MacAddr::new([1; 6]), true);
        assert_eq!(cache.default_router(), Some(addr));
    }

    #[test]
    fn slaac_progresses_init_to_active_and_sends_rs() {
        let mut slaac = Slaac::new();
        let mac = MacAddr::new([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);
        // INIT -> START (link up)
        slaac.advance(1, true, true, mac, 3);
        assert_eq!(slaac.state, SlaacState::Start);
        assert_ne!(slaac.link_local, Ipv6Addr::UNSPECIFIED);
        // Drive past the randomized start delay into DISCOVER.
        for _ in 0..20 {
            slaac.advance(1, true, false, mac, 3);
            if slaac.state != SlaacState::Start {
                break;
            }
        }
        assert_eq!(slaac.state, SlaacState::Discover);
        // Three retries at 40 ticks (4s) apart, then ACTIVE.
        for _ in 0..3 {
            for _ in 0..40 {
                slaac.advance(1, true, false, mac, 3);
            }
        }
        assert_eq!(slaac.state, SlaacState::Active);
    }

    #[test]
    fn prefix_lifetime_decrements_on_minute_prescaler() {
        let mut slaac = Slaac::new();
        slaac.learn_prefix(Ipv6Addr::LOOPBACK, 64, 90);
        slaac.advance(s_to_ticks(64), false, false, MacAddr::ZERO, 0);
        assert_eq!(slaac.prefixes[0].valid_lifetime_s, 30);
        slaac.advance(s_to_ticks(64), false, false, MacAddr::ZERO, 0);
        assert!(slaac.prefixes.is_empty());
    }
}
