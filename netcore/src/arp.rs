//! Address Resolution Protocol (RFC 826) cache and resolver.
//!
//! `handle_arp_frame` in `sw/net/src/lib.rs` only classifies
//! inbound ARP traffic into filter bins and forwards replies across a COM bus
//! to a host that owns the real cache; the header-format constants and
//! request/reply dispatch shape come from there, but the cache itself —
//! pending-queue, retry-bounded resolution, eviction — is new: this engine
//! owns IPv4 neighbor resolution directly rather than delegating it.

use heapless::Vec;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::ArpConfig;
use crate::frame::Frame;
use crate::timers::{s_to_ticks, Countdown};

/// Per-entry pending-frame queue depth: how many frames this engine will
/// hold for one unresolved address before later sends to it see `CacheFull`-
/// style back-pressure via `enqueue`'s `Err`.
pub const PENDING_CAP: usize = 2;

pub const ARP_FRAME_LEN: usize = 42;
const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const HLEN: u8 = 6;
const PLEN: u8 = 4;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

#[derive(Clone, Copy, Debug)]
pub struct ArpPacket {
    pub op: u16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpParseError {
    TooShort,
    UnsupportedFormat,
}

pub fn parse(data: &[u8]) -> Result<ArpPacket, ArpParseError> {
    if data.len() < ARP_FRAME_LEN {
        return Err(ArpParseError::TooShort);
    }
    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hlen = data[4];
    let plen = data[5];
    if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != HLEN || plen != PLEN {
        return Err(ArpParseError::UnsupportedFormat);
    }
    let op = u16::from_be_bytes([data[6], data[7]]);
    let sha = MacAddr::from_bytes(&data[8..14]);
    let spa = Ipv4Addr::from_be_bytes([data[14], data[15], data[16], data[17]]);
    let tha = MacAddr::from_bytes(&data[18..24]);
    let tpa = Ipv4Addr::from_be_bytes([data[24], data[25], data[26], data[27]]);
    Ok(ArpPacket { op, sha, spa, tha, tpa })
}

/// Serialize an ARP packet into `out` (must hold at least [`ARP_FRAME_LEN`]
/// bytes), returning the number of bytes written.
pub fn build(out: &mut [u8], pkt: &ArpPacket) -> usize {
    out[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    out[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
    out[4] = HLEN;
    out[5] = PLEN;
    out[6..8].copy_from_slice(&pkt.op.to_be_bytes());
    out[8..14].copy_from_slice(&pkt.sha.octets());
    out[14..18].copy_from_slice(&pkt.spa.octets());
    out[18..24].copy_from_slice(&pkt.tha.octets());
    out[24..28].copy_from_slice(&pkt.tpa.octets());
    ARP_FRAME_LEN
}

pub fn build_request(out: &mut [u8], sha: MacAddr, spa: Ipv4Addr, tpa: Ipv4Addr) -> usize {
    build(out, &ArpPacket { op: OP_REQUEST, sha, spa, tha: MacAddr::ZERO, tpa })
}

pub fn build_reply(out: &mut [u8], sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> usize {
    build(out, &ArpPacket { op: OP_REPLY, sha, spa, tha, tpa })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    Resolved,
    Pending,
}

struct Entry {
    addr: Ipv4Addr,
    mac: MacAddr,
    state: EntryState,
    ttl: Countdown,
    retries: u8,
    /// Frames waiting on this entry's resolution, deep-copied onto the
    /// queue by `enqueue` and flushed by `learn` once the entry resolves.
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

/// What the caller should do after a resolution-path call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The MAC address is already known; the caller may send immediately.
    Found(MacAddr),
    /// No entry existed; a request was just armed and the caller should
    /// queue the frame until resolution completes.
    Requesting,
    /// A request is already pending for this address; the caller should
    /// enqueue behind the existing one.
    AlreadyPending,
    /// The cache has no room and no entry could be evicted (all pending).
    CacheFull,
}

pub struct ArpCache<const N: usize> {
    entries: Vec<Entry, N>,
    cfg: ArpConfig,
    pub stats: CacheStats,
}

impl<const N: usize> ArpCache<N> {
    pub fn new(cfg: ArpConfig) -> Self {
        ArpCache { entries: Vec::new(), cfg, stats: CacheStats::default() }
    }

    pub fn lookup(&mut self, addr: Ipv4Addr) -> Option<MacAddr> {
        let hit = self.entries.iter().find(|e| e.addr == addr && e.state == EntryState::Resolved).map(|e| e.mac);
        if hit.is_some() {
            self.stats.hits += 1;
        }
        hit
    }

    fn find_mut(&mut self, addr: Ipv4Addr) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.addr == addr)
    }

    /// Resolve `addr`, arming a request if there is no usable entry yet.
    /// Returns what the caller should do with the frame waiting on this
    /// resolution.
    pub fn resolve(&mut self, addr: Ipv4Addr) -> Resolution {
        if let Some(entry) = self.find_mut(addr) {
            return match entry.state {
                EntryState::Resolved => {
                    self.stats.hits += 1;
                    Resolution::Found(entry.mac)
                }
                EntryState::Pending => Resolution::AlreadyPending,
            };
        }
        self.stats.misses += 1;
        if self.entries.is_full() {
            if !self.evict_one() {
                return Resolution::CacheFull;
            }
        }
        let _ = self.entries.push(Entry {
            addr,
            mac: MacAddr::ZERO,
            state: EntryState::Pending,
            ttl: {
                let mut c = Countdown::new();
                c.start(s_to_ticks(self.cfg.pending_timeout_s));
                c
            },
            retries: 0,
            pending: Vec::new(),
        });
        Resolution::Requesting
    }

    /// Append `frame` to the pending queue of the resolver entry for `addr`
    /// (the ARP-resolved target, not necessarily the datagram's final
    /// destination — callers off-link pass the gateway address here). The
    /// entry must already exist in `Pending` state, i.e. `resolve` must have
    /// just returned `Requesting`/`AlreadyPending` for the same address.
    /// Returns the frame back to the caller on any failure to queue it (no
    /// such entry, or its queue is already full) so the caller can release
    /// it back to the frame pool instead of leaking it.
    pub fn enqueue(&mut self, addr: Ipv4Addr, frame: Frame) -> Result<(), Frame> {
        match self.find_mut(addr) {
            Some(entry) if entry.state == EntryState::Pending => entry.pending.push(frame),
            _ => Err(frame),
        }
    }

    /// Evict the oldest resolved (non-pending) entry to make room. Returns
    /// `false` if every slot is pending (nothing safe to evict).
    fn evict_one(&mut self) -> bool {
        if let Some(idx) = self.entries.iter().position(|e| e.state == EntryState::Resolved) {
            self.entries.swap_remove(idx);
            self.stats.evictions += 1;
            true
        } else {
            false
        }
    }

    /// Install or refresh a resolved mapping, e.g. from an ARP reply or a
    /// gratuitous announcement. Returns the frames that were queued behind a
    /// previously pending request, if this call completed one — the caller
    /// is responsible for sending each one to the now-known MAC and
    /// releasing it back to the frame pool.
    pub fn learn(&mut self, addr: Ipv4Addr, mac: MacAddr) -> Vec<Frame, PENDING_CAP> {
        if let Some(entry) = self.find_mut(addr) {
            let was_pending = entry.state == EntryState::Pending;
            entry.mac = mac;
            entry.state = EntryState::Resolved;
            entry.ttl.start(s_to_ticks(self.cfg.cache_timeout_s));
            entry.retries = 0;
            if was_pending {
                self.stats.resolutions += 1;
                core::mem::take(&mut entry.pending)
            } else {
                Vec::new()
            }
        } else {
            if self.entries.is_full() && !self.evict_one() {
                return Vec::new();
            }
            let _ = self.entries.push(Entry {
                addr,
                mac,
                state: EntryState::Resolved,
                ttl: {
                    let mut c = Countdown::new();
                    c.start(s_to_ticks(self.cfg.cache_timeout_s));
                    c
                },
                retries: 0,
                pending: Vec::new(),
            });
            Vec::new()
        }
    }

    /// Drive TTL countdowns and pending-request retransmission. Returns the
    /// list of addresses a fresh ARP request should be sent for this tick
    /// (either the initial probe or a retry), and drops entries that expire
    /// or exhaust their retry budget.
    pub fn tick(&mut self, ticks: u32, retry: &mut Vec<Ipv4Addr, N>) {
        retry.clear();
        let mut i = 0;
        while i < self.entries.len() {
            self.entries[i].ttl.advance(ticks);
            let expired = matches!(self.entries[i].ttl.status(), crate::timers::CountdownStatus::Done);
            if expired {
                match self.entries[i].state {
                    EntryState::Resolved => {
                        self.entries.swap_remove(i);
                        self.stats.evictions += 1;
                        continue;
                    }
                    EntryState::Pending => {
                        if self.entries[i].retries >= self.cfg.max_retries {
                            self.stats.timeouts += 1;
                            self.entries.swap_remove(i);
                            continue;
                        }
                        self.entries[i].retries += 1;
                        self.entries[i].ttl.start(s_to_ticks(self.cfg.pending_timeout_s));
                        let _ = retry.push(self.entries[i].addr);
                    }
                }
            }
            i += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ArpConfig {
        ArpConfig { cache_size: 4, cache_timeout_s: 1200, pending_timeout_s: 2, max_retries: 3 }
    }

    #[test]
    fn round_trips_request_through_bytes() {
        let sha = MacAddr::new([1, 2, 3, 4, 5, 6]);
        let spa = Ipv4Addr::new(10, 0, 0, 1);
        let tpa = Ipv4Addr::new(10, 0, 0, 2);
        let mut buf = [0u8; ARP_FRAME_LEN];
        let n = build_request(&mut buf, sha, spa, tpa);
        assert_eq!(n, ARP_FRAME_LEN);
        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.op, OP_REQUEST);
        assert_eq!(parsed.sha, sha);
        assert_eq!(parsed.spa, spa);
        assert_eq!(parsed.tpa, tpa);
    }

    #[test]
    fn resolve_then_learn_completes_pending() {
        let mut cache: ArpCache<4> = ArpCache::new(cfg());
        let addr = Ipv4Addr::new(192, 168, 1, 1);
        assert_eq!(cache.resolve(addr), Resolution::Requesting);
        assert_eq!(cache.resolve(addr), Resolution::AlreadyPending);
        let mac = MacAddr::new([9, 9, 9, 9, 9, 9]);
        assert!(cache.learn(addr, mac).is_empty());
        assert_eq!(cache.resolve(addr), Resolution::Found(mac));
    }

    #[test]
    fn learn_flushes_queued_frame_on_completed_resolution() {
        let mut cache: ArpCache<4> = ArpCache::new(cfg());
        let addr = Ipv4Addr::new(192, 168, 1, 7);
        assert_eq!(cache.resolve(addr), Resolution::Requesting);

        let mut pool = crate::frame::FramePool::new(1);
        let mut frame = pool.alloc().unwrap();
        frame.fill(b"queued tcp segment");
        cache.enqueue(addr, frame).unwrap();

        let mac = MacAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let drained = cache.learn(addr, mac);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].as_slice(), b"queued tcp segment");
    }

    #[test]
    fn pending_entry_retries_then_times_out() {
        let mut cache: ArpCache<4> = ArpCache::new(cfg());
        let addr = Ipv4Addr::new(192, 168, 1, 5);
        cache.resolve(addr);
        let mut retry: Vec<Ipv4Addr, 4> = Vec::new();
        for _ in 0..3 {
            cache.tick(s_to_ticks(2), &mut retry);
            assert_eq!(retry.len(), 1);
        }
        cache.tick(s_to_ticks(2), &mut retry);
        assert!(retry.is_empty());
        assert!(cache.is_empty());
        assert_eq!(cache.stats.timeouts, 1);
    }

    #[test]
    fn full_cache_evicts_resolved_before_rejecting() {
        let mut cache: ArpCache<2> = ArpCache::new(cfg());
        cache.learn(Ipv4Addr::new(1, 1, 1, 1), MacAddr::new([1; 6]));
        cache.learn(Ipv4Addr::new(1, 1, 1, 2), MacAddr::new([2; 6]));
        // Both slots resolved; a new resolve should evict one to make room.
        assert_eq!(cache.resolve(Ipv4Addr::new(1, 1, 1, 3)), Resolution::Requesting);
        assert_eq!(cache.len(), 2);
    }
}
