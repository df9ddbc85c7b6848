//! RFC 3927 IPv4 Link-Local Address Autoconfiguration ("AutoIP"), the
//! fallback this engine runs when DHCP fails to produce a lease.
//!
//! No equivalent exists in `sw/net` (its DHCP client has no link-local
//! fallback); the probe/announce/defend shape here follows the
//! probe-wait/probe/announce-wait/announce progression RFC 3927 §2.2
//! specifies, driven the way [`crate::ndp::Slaac`] drives its own
//! probe/discover progression off an explicit `advance(ticks)` tick.

use crate::addr::{Ipv4Addr, MacAddr};
use crate::prng::NetPrng;
use crate::timers::{s_to_ticks, Countdown, CountdownStatus};

const PROBE_WAIT_S: u32 = 1;
const PROBE_NUM: u8 = 3;
const PROBE_MIN_S: u32 = 1;
const PROBE_MAX_S: u32 = 2;
const ANNOUNCE_WAIT_S: u32 = 2;
const ANNOUNCE_NUM: u8 = 2;
const ANNOUNCE_INTERVAL_S: u32 = 2;
/// RFC 3927 §2.2.1: after this many address conflicts in quick succession,
/// slow down and stop probing for a while instead of hammering the network.
const MAX_CONFLICTS: u8 = 10;
const RATE_LIMIT_INTERVAL_S: u32 = 60;
const DEFEND_INTERVAL_S: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Probing,
    AnnounceWait,
    Announcing,
    Bound,
    /// Probing is suspended after too many conflicts (RFC 3927 §2.2.1).
    RateLimited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    SendProbe(Ipv4Addr),
    SendAnnounce(Ipv4Addr),
    Bound(Ipv4Addr),
}

/// RFC 3927 link-local address claimant, driven by an explicit
/// `advance(ticks)` rather than a live system tick counter.
pub struct AutoIp {
    pub state: State,
    pub candidate: Ipv4Addr,
    timer: Countdown,
    count: u8,
    conflicts: u8,
    rate_limit_timer: Countdown,
}

impl AutoIp {
    pub fn new() -> Self {
        AutoIp {
            state: State::Init,
            candidate: Ipv4Addr::UNSPECIFIED,
            timer: Countdown::new(),
            count: 0,
            conflicts: 0,
            rate_limit_timer: Countdown::new(),
        }
    }

    fn pick_candidate(&mut self, entropy: &mut NetPrng) {
        let (third, fourth) = entropy.autoip_host();
        self.candidate = Ipv4Addr::new(169, 254, third, fourth);
    }

    /// (Re)start the claim process with a fresh candidate address, unless
    /// currently rate-limited.
    pub fn begin(&mut self, entropy: &mut NetPrng) {
        if self.state == State::RateLimited {
            return;
        }
        self.pick_candidate(entropy);
        self.count = 0;
        self.state = State::Probing;
        self.timer.start(entropy.range_u32(0, s_to_ticks(PROBE_WAIT_S)));
    }

    /// Drive the FSM forward by `ticks`, returning the action the caller
    /// should take this step: send an ARP probe or gratuitous announcement,
    /// or learn that `candidate` is now bound.
    pub fn advance(&mut self, ticks: u32, entropy: &mut NetPrng) -> Action {
        if self.state == State::RateLimited {
            self.rate_limit_timer.advance(ticks);
            if self.rate_limit_timer.status() == CountdownStatus::Done {
                self.state = State::Init;
            }
            return Action::None;
        }
        self.timer.advance(ticks);
        if self.timer.status() != CountdownStatus::Done {
            return Action::None;
        }
        match self.state {
            State::Init => Action::None,
            State::Probing => {
                if self.count < PROBE_NUM {
                    self.count += 1;
                    self.timer.start(entropy.range_u32(s_to_ticks(PROBE_MIN_S), s_to_ticks(PROBE_MAX_S)));
                    Action::SendProbe(self.candidate)
                } else {
                    self.state = State::AnnounceWait;
                    self.timer.start(s_to_ticks(ANNOUNCE_WAIT_S));
                    Action::None
                }
            }
            State::AnnounceWait => {
                self.state = State::Announcing;
                self.count = 0;
                self.timer.start(0);
                Action::None
            }
            State::Announcing => {
                if self.count < ANNOUNCE_NUM {
                    self.count += 1;
                    self.timer.start(s_to_ticks(ANNOUNCE_INTERVAL_S));
                    Action::SendAnnounce(self.candidate)
                } else {
                    self.state = State::Bound;
                    self.conflicts = 0;
                    Action::Bound(self.candidate)
                }
            }
            State::Bound | State::RateLimited => Action::None,
        }
    }

    /// A conflicting ARP packet for `self.candidate` was observed while
    /// still probing or announcing (RFC 3927 §2.2.1): start over with a new
    /// candidate, rate-limiting after too many conflicts in a row.
    pub fn on_probe_conflict(&mut self, entropy: &mut NetPrng) {
        if self.state == State::RateLimited {
            return;
        }
        self.conflicts = self.conflicts.saturating_add(1);
        if self.conflicts >= MAX_CONFLICTS {
            self.state = State::RateLimited;
            self.rate_limit_timer.start(s_to_ticks(RATE_LIMIT_INTERVAL_S));
            return;
        }
        self.begin(entropy);
    }

    /// A conflicting ARP was observed for our already-bound address
    /// (RFC 3927 §2.5 "Conflict Defense"): send one gratuitous ARP in
    /// defense unless we defended within the last [`DEFEND_INTERVAL_S`], in
    /// which case give the address up and restart. Returns `true` if the
    /// caller should transmit a defending announcement.
    pub fn on_defend(&mut self, entropy: &mut NetPrng) -> bool {
        if self.rate_limit_timer.is_running() {
            self.begin(entropy);
            false
        } else {
            self.rate_limit_timer.start(s_to_ticks(DEFEND_INTERVAL_S));
            true
        }
    }
}

impl Default for AutoIp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    fn entropy() -> NetPrng {
        NetPrng::new_from(&[1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[test]
    fn candidate_stays_within_link_local_excluding_reserved_thirds() {
        let mut e = entropy();
        let mut a = AutoIp::new();
        a.begin(&mut e);
        assert_eq!(a.candidate.octets()[0..2], [169, 254]);
        assert!((1..=254).contains(&a.candidate.octets()[2]));
    }

    #[test]
    fn full_claim_sequence_probes_then_announces_then_binds() {
        let mut e = entropy();
        let mut a = AutoIp::new();
        a.begin(&mut e);
        let mut probes = 0;
        let mut announces = 0;
        let mut bound = None;
        for _ in 0..200 {
            match a.advance(1, &mut e) {
                Action::SendProbe(_) => probes += 1,
                Action::SendAnnounce(_) => announces += 1,
                Action::Bound(addr) => {
                    bound = Some(addr);
                    break;
                }
                Action::None => {}
            }
        }
        assert_eq!(probes, PROBE_NUM as u32 as usize);
        assert_eq!(announces, ANNOUNCE_NUM as usize);
        assert_eq!(bound, Some(a.candidate));
        assert_eq!(a.state, State::Bound);
    }

    #[test]
    fn repeated_conflicts_trigger_rate_limiting() {
        let mut e = entropy();
        let mut a = AutoIp::new();
        a.begin(&mut e);
        for _ in 0..MAX_CONFLICTS {
            a.on_probe_conflict(&mut e);
        }
        assert_eq!(a.state, State::RateLimited);
    }

    #[test]
    fn defend_then_relinquish_on_second_conflict_within_window() {
        let mut e = entropy();
        let mut a = AutoIp::new();
        a.begin(&mut e);
        a.state = State::Bound;
        assert!(a.on_defend(&mut e));
        assert!(!a.on_defend(&mut e));
        assert_eq!(a.state, State::Probing);
    }
}
