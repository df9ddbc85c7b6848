//! IPv4 fragmentation and reassembly (RFC 791 §3.2).
//!
//! `sw/net` drops all fragmented IPv4 traffic outright (`sw/net/src/
//! lib.rs`: "Drop frames that are part of a fragmented IP packet"); this
//! engine needs reassembly and fragmentation, so the session-table
//! shape here is new, built the way [`crate::arp::ArpCache`] structures a
//! bounded, tick-timed collection of in-progress entries.

use alloc::vec::Vec as AVec;
use heapless::Vec;

use crate::addr::Ipv4Addr;
use crate::timers::{s_to_ticks, Countdown, CountdownStatus};

/// One non-overlapping received fragment, recorded by byte range within the
/// reassembled datagram.
#[derive(Clone, Copy, Debug)]
struct Span {
    start: u16,
    end: u16,
}

struct Session {
    key: (Ipv4Addr, Ipv4Addr, u8, u16),
    spans: AVec<Span>,
    buf: AVec<u8>,
    last_fragment_end: Option<u16>,
    ttl: Countdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// More fragments are still expected.
    Incomplete,
    /// Every byte from 0 to the final fragment's end has now been received.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragError {
    SessionTableFull,
    Overlap,
    TooLarge,
}

/// Largest datagram this engine will reassemble (RFC 791 "all hosts must be
/// prepared to accept datagrams of up to 576 octets" is a floor, not a
/// ceiling; 65535 is the IPv4 total-length field's own limit).
pub const MAX_DATAGRAM_LEN: usize = 65535;

pub struct ReassemblyTable<const N: usize> {
    sessions: Vec<Session, N>,
    timeout_ticks: u32,
}

impl<const N: usize> ReassemblyTable<N> {
    pub fn new(timeout_s: u32) -> Self {
        ReassemblyTable { sessions: Vec::new(), timeout_ticks: s_to_ticks(timeout_s) }
    }

    fn find_idx(&self, key: (Ipv4Addr, Ipv4Addr, u8, u16)) -> Option<usize> {
        self.sessions.iter().position(|s| s.key == key)
    }

    /// Insert a received fragment. `offset`/`more` come from the IPv4 header
    /// (`frag_offset`, `flags.more_fragments`); `data` is the fragment's
    /// payload (post-header) bytes. Returns the reassembled datagram once
    /// complete.
    pub fn insert(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        id: u16,
        offset: u16,
        more: bool,
        data: &[u8],
    ) -> Result<(ReassemblyOutcome, Option<AVec<u8>>), FragError> {
        let key = (src, dst, protocol, id);
        let end = offset as usize + data.len();
        if end > MAX_DATAGRAM_LEN {
            return Err(FragError::TooLarge);
        }
        let idx = match self.find_idx(key) {
            Some(i) => i,
            None => {
                if self.sessions.is_full() {
                    return Err(FragError::SessionTableFull);
                }
                let mut ttl = Countdown::new();
                ttl.start(self.timeout_ticks);
                let _ = self.sessions.push(Session {
                    key,
                    spans: AVec::new(),
                    buf: AVec::new(),
                    last_fragment_end: None,
                    ttl,
                });
                self.sessions.len() - 1
            }
        };
        let session = &mut self.sessions[idx];
        for s in session.spans.iter() {
            let overlaps = (offset as usize) < s.end as usize && (end as u16) > s.start;
            if overlaps {
                return Err(FragError::Overlap);
            }
        }
        if session.buf.len() < end {
            session.buf.resize(end, 0);
        }
        session.buf[offset as usize..end].copy_from_slice(data);
        session.spans.push(Span { start: offset, end: end as u16 });
        if !more {
            session.last_fragment_end = Some(end as u16);
        }
        let complete = match session.last_fragment_end {
            Some(total) => covers_full_range(&session.spans, total),
            None => false,
        };
        if complete {
            let total = session.last_fragment_end.unwrap() as usize;
            let mut out = AVec::new();
            out.extend_from_slice(&session.buf[..total]);
            self.sessions.swap_remove(idx);
            Ok((ReassemblyOutcome::Complete, Some(out)))
        } else {
            Ok((ReassemblyOutcome::Incomplete, None))
        }
    }

    /// Advance timeouts, discarding any session that has sat incomplete for
    /// too long (RFC 791: the receiver should send an ICMP Time Exceeded /
    /// fragment reassembly time exceeded — the caller wires that up one
    /// layer above, in `icmpv4`).
    pub fn tick(&mut self, ticks: u32, expired: &mut Vec<(Ipv4Addr, Ipv4Addr, u8, u16), N>) {
        expired.clear();
        let mut i = 0;
        while i < self.sessions.len() {
            self.sessions[i].ttl.advance(ticks);
            if self.sessions[i].ttl.status() == CountdownStatus::Done {
                let _ = expired.push(self.sessions[i].key);
                self.sessions.swap_remove(i);
                continue;
            }
            i += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn covers_full_range(spans: &AVec<Span>, total: u16) -> bool {
    let mut sorted: AVec<Span> = spans.clone();
    sorted.sort_by_key(|s| s.start);
    let mut covered: u16 = 0;
    for s in sorted.iter() {
        if s.start > covered {
            return false;
        }
        if s.end > covered {
            covered = s.end;
        }
    }
    covered >= total
}

/// Split `payload` into a sequence of `(offset, more, chunk)` fragments no
/// larger than `mtu_payload` bytes each, rounding all but the last chunk
/// down to a multiple of 8 (RFC 791 §3.2 fragment-offset granularity).
pub fn fragment<'a>(payload: &'a [u8], mtu_payload: usize) -> AVec<(u16, bool, &'a [u8])> {
    let chunk_len = mtu_payload & !0x7;
    let mut out = AVec::new();
    if chunk_len == 0 || payload.len() <= mtu_payload {
        out.push((0u16, false, payload));
        return out;
    }
    let mut offset = 0usize;
    while offset < payload.len() {
        let end = (offset + chunk_len).min(payload.len());
        let more = end < payload.len();
        out.push((offset as u16, more, &payload[offset..end]));
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_two_fragments_in_order() {
        let mut table: ReassemblyTable<4> = ReassemblyTable::new(15);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let (outcome, data) = table.insert(src, dst, 17, 42, 0, true, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(outcome, ReassemblyOutcome::Incomplete);
        assert!(data.is_none());
        let (outcome, data) = table.insert(src, dst, 17, 42, 8, false, &[9, 10]).unwrap();
        assert_eq!(outcome, ReassemblyOutcome::Complete);
        assert_eq!(data.unwrap(), alloc::vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut table: ReassemblyTable<4> = ReassemblyTable::new(15);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        table.insert(src, dst, 17, 7, 8, false, &[9, 10]).unwrap();
        let (outcome, data) = table.insert(src, dst, 17, 7, 0, true, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(outcome, ReassemblyOutcome::Complete);
        assert_eq!(data.unwrap(), alloc::vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn overlapping_fragment_is_rejected() {
        let mut table: ReassemblyTable<4> = ReassemblyTable::new(15);
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        table.insert(src, dst, 17, 3, 0, true, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let err = table.insert(src, dst, 17, 3, 4, false, &[0xff, 0xff]).unwrap_err();
        assert_eq!(err, FragError::Overlap);
    }

    #[test]
    fn fragment_splits_on_eight_byte_boundary() {
        let payload: AVec<u8> = (0..20u8).collect();
        let parts = fragment(&payload, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0, 0);
        assert!(parts[0].1);
        assert_eq!(parts[0].2.len(), 8);
        assert_eq!(parts[1].0, 8);
        assert_eq!(parts[2].0, 16);
        assert!(!parts[2].1);
    }
}
