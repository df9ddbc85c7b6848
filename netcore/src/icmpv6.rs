//! ICMPv6 (RFC 4443): Echo, error messages, and the
//! message-type dispatch glue that routes Neighbor Discovery (RFC 4861) and
//! MLD (RFC 2710) messages to [`crate::ndp`]/[`crate::mld`].
//!
//! New to this engine (`sw/net` has no IPv6 stack); checksum/header
//! shape mirrors [`crate::icmpv4`], substituting the IPv6 pseudo-header for
//! the bare-header checksum IPv4 uses.

use crate::checksum::ipv6_pseudo_checksum;
use crate::ipv6::NEXT_HEADER_ICMPV6;

pub const TYPE_DEST_UNREACHABLE: u8 = 1;
pub const TYPE_PACKET_TOO_BIG: u8 = 2;
pub const TYPE_TIME_EXCEEDED: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 128;
pub const TYPE_ECHO_REPLY: u8 = 129;
pub const TYPE_ROUTER_SOLICITATION: u8 = 133;
pub const TYPE_ROUTER_ADVERTISEMENT: u8 = 134;
pub const TYPE_NEIGHBOR_SOLICITATION: u8 = 135;
pub const TYPE_NEIGHBOR_ADVERTISEMENT: u8 = 136;
pub const TYPE_MLD_QUERY: u8 = crate::mld::MLD_LISTENER_QUERY;
pub const TYPE_MLD_REPORT: u8 = crate::mld::MLD_LISTENER_REPORT;
pub const TYPE_MLD_DONE: u8 = crate::mld::MLD_LISTENER_DONE;

pub const CODE_NO_ROUTE: u8 = 0;
pub const CODE_ADDR_UNREACHABLE: u8 = 3;
pub const CODE_PORT_UNREACHABLE: u8 = 4;
pub const CODE_HOP_LIMIT_EXCEEDED: u8 = 0;
pub const CODE_FRAGMENT_REASSEMBLY_TIME_EXCEEDED: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Echo,
    Error,
    Ndp,
    Mld,
    Unhandled,
}

pub fn classify(kind: u8) -> Dispatch {
    match kind {
        TYPE_ECHO_REQUEST | TYPE_ECHO_REPLY => Dispatch::Echo,
        TYPE_DEST_UNREACHABLE | TYPE_PACKET_TOO_BIG | TYPE_TIME_EXCEEDED => Dispatch::Error,
        TYPE_ROUTER_SOLICITATION | TYPE_ROUTER_ADVERTISEMENT | TYPE_NEIGHBOR_SOLICITATION
        | TYPE_NEIGHBOR_ADVERTISEMENT => Dispatch::Ndp,
        TYPE_MLD_QUERY | TYPE_MLD_REPORT | TYPE_MLD_DONE => Dispatch::Mld,
        _ => Dispatch::Unhandled,
    }
}

/// `true` if an ICMPv6 error must not be generated in response to this
/// message type (RFC 4443 §2.4: never for another error, never for a
/// non-initial fragment — the latter is enforced by the caller before this
/// function is reached).
pub fn suppresses_error_response(kind: u8) -> bool {
    matches!(kind, TYPE_DEST_UNREACHABLE | TYPE_PACKET_TOO_BIG | TYPE_TIME_EXCEEDED)
}

use crate::addr::Ipv6Addr;

pub fn verify_checksum(src: Ipv6Addr, dst: Ipv6Addr, body: &[u8]) -> bool {
    ipv6_pseudo_checksum(src, dst, NEXT_HEADER_ICMPV6, body) == 0
}

/// Stamp the checksum field of an already-written ICMPv6 message. Exposed
/// crate-wide so [`crate::stack`] can finish NDP messages built from
/// [`crate::ndp::wire`], which only assembles the body.
pub(crate) fn finish_with_checksum(out: &mut [u8], len: usize, src: Ipv6Addr, dst: Ipv6Addr) -> usize {
    out[2..4].copy_from_slice(&[0, 0]);
    let cksum = ipv6_pseudo_checksum(src, dst, NEXT_HEADER_ICMPV6, &out[..len]);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    len
}

pub fn build_echo_reply(out: &mut [u8], src: Ipv6Addr, dst: Ipv6Addr, id: u16, seq: u16, data: &[u8]) -> usize {
    out[0] = TYPE_ECHO_REPLY;
    out[1] = 0;
    out[4..6].copy_from_slice(&id.to_be_bytes());
    out[6..8].copy_from_slice(&seq.to_be_bytes());
    out[8..8 + data.len()].copy_from_slice(data);
    finish_with_checksum(out, 8 + data.len(), src, dst)
}

pub fn build_dest_unreachable(out: &mut [u8], src: Ipv6Addr, dst: Ipv6Addr, code: u8, original: &[u8]) -> usize {
    // RFC 4443 §3.1: "as much of invoking packet as will fit without the
    // ICMPv6 packet exceeding the minimum IPv6 MTU" — clamp to a
    // conservative 1232 bytes (1280 minimum MTU minus headers).
    let n = original.len().min(1232 - 8);
    out[0] = TYPE_DEST_UNREACHABLE;
    out[1] = code;
    out[4..8].copy_from_slice(&[0, 0, 0, 0]);
    out[8..8 + n].copy_from_slice(&original[..n]);
    finish_with_checksum(out, 8 + n, src, dst)
}

pub fn build_time_exceeded(out: &mut [u8], src: Ipv6Addr, dst: Ipv6Addr, code: u8, original: &[u8]) -> usize {
    let n = original.len().min(1232 - 8);
    out[0] = TYPE_TIME_EXCEEDED;
    out[1] = code;
    out[4..8].copy_from_slice(&[0, 0, 0, 0]);
    out[8..8 + n].copy_from_slice(&original[..n]);
    finish_with_checksum(out, 8 + n, src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_reply_checksum_verifies() {
        let src = Ipv6Addr::LOOPBACK;
        let dst = Ipv6Addr::LOOPBACK;
        let mut out = [0u8; 32];
        let n = build_echo_reply(&mut out, src, dst, 1, 2, &[9, 9, 9, 9]);
        assert!(verify_checksum(src, dst, &out[..n]));
    }

    #[test]
    fn classify_routes_ndp_and_mld_types() {
        assert_eq!(classify(TYPE_NEIGHBOR_SOLICITATION), Dispatch::Ndp);
        assert_eq!(classify(TYPE_MLD_REPORT), Dispatch::Mld);
        assert_eq!(classify(TYPE_ECHO_REQUEST), Dispatch::Echo);
        assert_eq!(classify(200), Dispatch::Unhandled);
    }
}
