//! IGMPv1/v2 multicast group membership (RFC 1112, RFC 2236).
//!
//! State names and the report-scheduling/cancellation shape are grounded on
//! `net_igmp.c`'s state machine (`IGMP_STATE_NON/DELAYING/IDLE`, per-group
//! `Report`/`Leave` construction, v1-compatibility-mode switch on receipt of
//! a v1 Query). The timer driving "delayed report" here is tick-based rather
//! than a live system clock, and group-join retransmission is new.

use heapless::Vec;

use crate::addr::Ipv4Addr;
use crate::config::McastConfig;
use crate::timers::{Countdown, CountdownStatus};

pub const IGMP_QUERY: u8 = 0x11;
pub const IGMP_REPORT_V1: u8 = 0x12;
pub const IGMP_REPORT_V2: u8 = 0x16;
pub const IGMP_LEAVE_V2: u8 = 0x17;

/// Robustness variable (RFC 2236 §8.1 default): number of times a Join
/// (unsolicited Report) is retransmitted, 
pub const ROBUSTNESS: u8 = 2;

#[derive(Clone, Copy, Debug)]
pub struct IgmpMessage {
    pub kind: u8,
    pub max_resp_time_ds: u8,
    pub group: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgmpParseError {
    TooShort,
    BadChecksum,
}

pub fn parse(data: &[u8]) -> Result<IgmpMessage, IgmpParseError> {
    if data.len() < 8 {
        return Err(IgmpParseError::TooShort);
    }
    if crate::checksum::ipv4_header_checksum(&data[..8]) != 0 {
        return Err(IgmpParseError::BadChecksum);
    }
    Ok(IgmpMessage {
        kind: data[0],
        max_resp_time_ds: data[1],
        group: Ipv4Addr::from_be_bytes([data[4], data[5], data[6], data[7]]),
    })
}

pub fn build(out: &mut [u8], kind: u8, max_resp_time_ds: u8, group: Ipv4Addr) -> usize {
    out[0] = kind;
    out[1] = max_resp_time_ds;
    out[2] = 0;
    out[3] = 0;
    out[4..8].copy_from_slice(&group.octets());
    let cksum = crate::checksum::ipv4_header_checksum(&out[..8]);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MemberState {
    NonMember,
    Idle,
    Delaying,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuerierMode {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug)]
struct Membership {
    group: Ipv4Addr,
    state: MemberState,
    report_timer: Countdown,
    /// Set while a v1 querier was last heard, per RFC 2236 §4's
    /// version-compatibility mode: suppress Leave messages and always send
    /// v1-style Reports until this falls silent long enough to revert.
    v1_compat_timer: Countdown,
    pending_joins: u8,
}

pub struct IgmpGroups<const N: usize> {
    groups: Vec<Membership, N>,
    cfg: McastConfig,
}

impl<const N: usize> IgmpGroups<N> {
    pub fn new(cfg: McastConfig) -> Self {
        IgmpGroups { groups: Vec::new(), cfg }
    }

    pub fn is_member(&self, group: Ipv4Addr) -> bool {
        self.groups.iter().any(|m| m.group == group && m.state != MemberState::NonMember)
    }

    /// Join a group: arms `ROBUSTNESS` unsolicited Reports, spaced by the
    /// caller's next tick.
    pub fn join(&mut self, group: Ipv4Addr) -> bool {
        if self.is_member(group) {
            return true;
        }
        if self.groups.is_full() {
            return false;
        }
        let _ = self.groups.push(Membership {
            group,
            state: MemberState::Idle,
            report_timer: Countdown::new(),
            v1_compat_timer: Countdown::new(),
            pending_joins: ROBUSTNESS,
        });
        true
    }

    /// Leave a group, returning `true` if a Leave message should be sent
    /// (only meaningful under IGMPv2, and only if this host's Report was the
    /// most recent one seen — callers track that via `cancel_own_report`).
    pub fn leave(&mut self, group: Ipv4Addr) -> bool {
        if let Some(idx) = self.groups.iter().position(|m| m.group == group) {
            self.groups.swap_remove(idx);
            true
        } else {
            false
        }
    }

    /// Handle an inbound Query. For a General Query (group == UNSPECIFIED)
    /// schedule delayed Reports for every joined group; for a
    /// Group-Specific Query, only that group.
    pub fn on_query(&mut self, msg: &IgmpMessage, mode: QuerierMode, entropy: u32) {
        let max_ticks = ((msg.max_resp_time_ds as u32) * 100 / 1000).max(1);
        for m in self.groups.iter_mut() {
            if msg.group.is_unspecified() || msg.group == m.group {
                if mode == QuerierMode::V1 {
                    m.v1_compat_timer.start(crate::timers::s_to_ticks(400));
                }
                match m.state {
                    MemberState::NonMember => {}
                    MemberState::Idle => {
                        m.state = MemberState::Delaying;
                        m.report_timer.start(1 + entropy % max_ticks.max(1));
                    }
                    MemberState::Delaying => {
                        // Keep the earlier, shorter of the two deadlines.
                        let candidate = 1 + entropy % max_ticks.max(1);
                        if let Some(remaining) = m.report_timer.remaining_ticks() {
                            if candidate < remaining {
                                m.report_timer.start(candidate);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Another host's Report was overheard for `group`: cancel our own
    /// pending Report to suppress duplicate traffic (RFC 2236 §3).
    pub fn on_report_overheard(&mut self, group: Ipv4Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            if m.state == MemberState::Delaying {
                m.state = MemberState::Idle;
            }
        }
    }

    /// Advance timers by `ticks`, returning groups whose Report or pending
    /// Join is now due (the caller sends a Report/Leave and calls
    /// `ack_report`/`ack_join`).
    pub fn tick(&mut self, ticks: u32, due_reports: &mut Vec<Ipv4Addr, N>, due_joins: &mut Vec<Ipv4Addr, N>) {
        due_reports.clear();
        due_joins.clear();
        for m in self.groups.iter_mut() {
            m.report_timer.advance(ticks);
            m.v1_compat_timer.advance(ticks);
            if m.state == MemberState::Delaying && m.report_timer.status() == CountdownStatus::Done {
                let _ = due_reports.push(m.group);
            }
            if m.pending_joins > 0 {
                let _ = due_joins.push(m.group);
            }
        }
    }

    pub fn ack_report(&mut self, group: Ipv4Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            m.state = MemberState::Idle;
        }
    }

    pub fn ack_join(&mut self, group: Ipv4Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            m.pending_joins = m.pending_joins.saturating_sub(1);
        }
    }

    /// `true` if group `group`'s last heard Query used IGMPv1, meaning this
    /// host must send v1-style Reports and never a Leave.
    pub fn v1_compat_active(&self, group: Ipv4Addr) -> bool {
        self.groups
            .iter()
            .find(|m| m.group == group)
            .map(|m| m.v1_compat_timer.status() == CountdownStatus::Running)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Every group currently joined, for programming a driver's multicast
    /// MAC filter ( `set_address_filter`).
    pub fn iter_groups(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.groups.iter().filter(|m| m.state != MemberState::NonMember).map(|m| m.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_schedules_robustness_retransmissions() {
        let mut g: IgmpGroups<4> = IgmpGroups::new(McastConfig::DEFAULT);
        assert!(g.join(Ipv4Addr::new(224, 0, 0, 5)));
        let mut reports = Vec::new();
        let mut joins = Vec::new();
        g.tick(1, &mut reports, &mut joins);
        assert_eq!(joins.len(), 1);
        g.ack_join(Ipv4Addr::new(224, 0, 0, 5));
        g.tick(1, &mut reports, &mut joins);
        assert_eq!(joins.len(), 1);
        g.ack_join(Ipv4Addr::new(224, 0, 0, 5));
        g.tick(1, &mut reports, &mut joins);
        assert!(joins.is_empty());
    }

    #[test]
    fn overheard_report_cancels_own_pending_report() {
        let mut g: IgmpGroups<4> = IgmpGroups::new(McastConfig::DEFAULT);
        let grp = Ipv4Addr::new(224, 0, 0, 9);
        g.join(grp);
        g.on_query(&IgmpMessage { kind: IGMP_QUERY, max_resp_time_ds: 100, group: Ipv4Addr::UNSPECIFIED }, QuerierMode::V2, 1);
        g.on_report_overheard(grp);
        let mut reports = Vec::new();
        let mut joins = Vec::new();
        g.tick(1000, &mut reports, &mut joins);
        assert!(reports.is_empty());
    }

    #[test]
    fn report_round_trips_through_bytes() {
        let mut buf = [0u8; 8];
        let n = build(&mut buf, IGMP_REPORT_V2, 0, Ipv4Addr::new(224, 0, 0, 1));
        assert_eq!(n, 8);
        let msg = parse(&buf).unwrap();
        assert_eq!(msg.kind, IGMP_REPORT_V2);
        assert_eq!(msg.group, Ipv4Addr::new(224, 0, 0, 1));
    }
}
