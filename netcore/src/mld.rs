//! MLDv1 multicast listener discovery (RFC 2710).
//!
//! The IPv6 analog of [`crate::igmp`]: same Idle/Delaying membership shape
//! and the same RFC 2236-style report-suppression and robustness-variable
//! join retransmission, grounded on `net_mld.c`'s state machine, carried
//! over to ICMPv6 message types (RFC 2710 §3) instead of IGMP's own IP
//! protocol.

use heapless::Vec;

use crate::addr::Ipv6Addr;
use crate::config::McastConfig;
use crate::timers::{Countdown, CountdownStatus};

pub const MLD_LISTENER_QUERY: u8 = 130;
pub const MLD_LISTENER_REPORT: u8 = 131;
pub const MLD_LISTENER_DONE: u8 = 132;

pub const ROBUSTNESS: u8 = 2;

#[derive(Clone, Copy, Debug)]
pub struct MldMessage {
    pub kind: u8,
    pub max_resp_delay_ms: u16,
    pub group: Ipv6Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MldParseError {
    TooShort,
}

/// Parse a full ICMPv6 MLD message (type, code, checksum, max-resp-delay,
/// reserved, 16-byte multicast address — 24 bytes total, checksum already
/// verified by the caller via the IPv6 pseudo-header).
pub fn parse(data: &[u8]) -> Result<MldMessage, MldParseError> {
    if data.len() < 24 {
        return Err(MldParseError::TooShort);
    }
    let kind = data[0];
    let max_resp_delay_ms = u16::from_be_bytes([data[4], data[5]]);
    let mut group_bytes = [0u8; 16];
    group_bytes.copy_from_slice(&data[8..24]);
    Ok(MldMessage { kind, max_resp_delay_ms, group: Ipv6Addr::from_segments(bytes_to_segments(&group_bytes)) })
}

fn bytes_to_segments(b: &[u8; 16]) -> [u16; 8] {
    let mut out = [0u16; 8];
    for i in 0..8 {
        out[i] = u16::from_be_bytes([b[i * 2], b[i * 2 + 1]]);
    }
    out
}

/// Build an MLD message body (type/code/checksum placeholder + max-resp +
/// reserved + group address), leaving the checksum field zeroed for the
/// caller to fill in via the ICMPv6 pseudo-header.
pub fn build(out: &mut [u8], kind: u8, max_resp_delay_ms: u16, group: Ipv6Addr) -> usize {
    out[0] = kind;
    out[1] = 0;
    out[2] = 0;
    out[3] = 0;
    out[4..6].copy_from_slice(&max_resp_delay_ms.to_be_bytes());
    out[6..8].copy_from_slice(&[0, 0]);
    out[8..24].copy_from_slice(&group.octets());
    24
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MemberState {
    Idle,
    Delaying,
}

#[derive(Clone, Copy, Debug)]
struct Membership {
    group: Ipv6Addr,
    state: MemberState,
    report_timer: Countdown,
    pending_joins: u8,
}

pub struct MldGroups<const N: usize> {
    groups: Vec<Membership, N>,
    #[allow(dead_code)]
    cfg: McastConfig,
}

impl<const N: usize> MldGroups<N> {
    pub fn new(cfg: McastConfig) -> Self {
        MldGroups { groups: Vec::new(), cfg }
    }

    pub fn is_member(&self, group: Ipv6Addr) -> bool {
        self.groups.iter().any(|m| m.group == group)
    }

    pub fn join(&mut self, group: Ipv6Addr) -> bool {
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
            pending_joins: ROBUSTNESS,
        });
        true
    }

    pub fn leave(&mut self, group: Ipv6Addr) -> bool {
        if let Some(idx) = self.groups.iter().position(|m| m.group == group) {
            self.groups.swap_remove(idx);
            true
        } else {
            false
        }
    }

    pub fn on_query(&mut self, msg: &MldMessage, entropy: u32) {
        let max_ticks = ((msg.max_resp_delay_ms as u32) / 100).max(1);
        for m in self.groups.iter_mut() {
            if msg.group.is_unspecified() || msg.group == m.group {
                match m.state {
                    MemberState::Idle => {
                        m.state = MemberState::Delaying;
                        m.report_timer.start(1 + entropy % max_ticks);
                    }
                    MemberState::Delaying => {
                        let candidate = 1 + entropy % max_ticks;
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

    pub fn on_report_overheard(&mut self, group: Ipv6Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            if m.state == MemberState::Delaying {
                m.state = MemberState::Idle;
            }
        }
    }

    pub fn tick(&mut self, ticks: u32, due_reports: &mut Vec<Ipv6Addr, N>, due_joins: &mut Vec<Ipv6Addr, N>) {
        due_reports.clear();
        due_joins.clear();
        for m in self.groups.iter_mut() {
            m.report_timer.advance(ticks);
            if m.state == MemberState::Delaying && m.report_timer.status() == CountdownStatus::Done {
                let _ = due_reports.push(m.group);
            }
            if m.pending_joins > 0 {
                let _ = due_joins.push(m.group);
            }
        }
    }

    pub fn ack_report(&mut self, group: Ipv6Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            m.state = MemberState::Idle;
        }
    }

    pub fn ack_join(&mut self, group: Ipv6Addr) {
        if let Some(m) = self.groups.iter_mut().find(|m| m.group == group) {
            m.pending_joins = m.pending_joins.saturating_sub(1);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Every group currently joined, for programming a driver's multicast
    /// MAC filter ( `set_address_filter`).
    pub fn iter_groups(&self) -> impl Iterator<Item = Ipv6Addr> + '_ {
        self.groups.iter().map(|m| m.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_bytes() {
        let mut buf = [0u8; 24];
        let group = Ipv6Addr::LOOPBACK.solicited_node();
        let n = build(&mut buf, MLD_LISTENER_REPORT, 0, group);
        assert_eq!(n, 24);
        let msg = parse(&buf).unwrap();
        assert_eq!(msg.kind, MLD_LISTENER_REPORT);
        assert_eq!(msg.group, group);
    }

    #[test]
    fn join_schedules_robustness_retransmissions() {
        let mut g: MldGroups<4> = MldGroups::new(McastConfig::DEFAULT);
        let grp = Ipv6Addr::LOOPBACK;
        assert!(g.join(grp));
        let mut reports = Vec::new();
        let mut joins = Vec::new();
        g.tick(1, &mut reports, &mut joins);
        assert_eq!(joins.len(), 1);
        g.ack_join(grp);
        g.tick(1, &mut reports, &mut joins);
        assert_eq!(joins.len(), 1);
        g.ack_join(grp);
        g.tick(1, &mut reports, &mut joins);
        assert!(joins.is_empty());
    }
}
