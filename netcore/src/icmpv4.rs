//! ICMPv4 (RFC 792): Echo and the error messages
//! (Destination Unreachable, Time Exceeded).
//!
//! `sw/net` only forwards ICMP frames wholesale up its COM bus
//! (`handle_icmp_frame` in `sw/net/src/lib.rs`: "Forward ICMP up the COM
//! bus"); this engine answers Echo Requests itself and originates error
//! messages, so parse/build and the error-message constructors are new,
//! built in the checksum/header style already established by
//! [`crate::ipv4`]/[`crate::checksum`].

use crate::addr::Ipv4Addr;
use crate::checksum::ipv4_header_checksum;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PROTOCOL_UNREACHABLE: u8 = 2;
pub const CODE_PORT_UNREACHABLE: u8 = 3;
pub const CODE_FRAG_NEEDED: u8 = 4;
pub const CODE_TTL_EXCEEDED_IN_TRANSIT: u8 = 0;
pub const CODE_FRAGMENT_REASSEMBLY_TIME_EXCEEDED: u8 = 1;

#[derive(Clone, Copy, Debug)]
pub enum Message<'a> {
    EchoRequest { id: u16, seq: u16, data: &'a [u8] },
    EchoReply { id: u16, seq: u16, data: &'a [u8] },
    DestUnreachable { code: u8, original: &'a [u8] },
    TimeExceeded { code: u8, original: &'a [u8] },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpParseError {
    TooShort,
    BadChecksum,
    Unsupported,
}

pub fn parse(data: &[u8]) -> Result<Message<'_>, IcmpParseError> {
    if data.len() < 8 {
        return Err(IcmpParseError::TooShort);
    }
    if ipv4_header_checksum(data) != 0 {
        return Err(IcmpParseError::BadChecksum);
    }
    let kind = data[0];
    let code = data[1];
    match kind {
        TYPE_ECHO_REQUEST | TYPE_ECHO_REPLY => {
            let id = u16::from_be_bytes([data[4], data[5]]);
            let seq = u16::from_be_bytes([data[6], data[7]]);
            let body = &data[8..];
            Ok(if kind == TYPE_ECHO_REQUEST {
                Message::EchoRequest { id, seq, data: body }
            } else {
                Message::EchoReply { id, seq, data: body }
            })
        }
        TYPE_DEST_UNREACHABLE => Ok(Message::DestUnreachable { code, original: &data[8..] }),
        TYPE_TIME_EXCEEDED => Ok(Message::TimeExceeded { code, original: &data[8..] }),
        _ => Err(IcmpParseError::Unsupported),
    }
}

fn finish_with_checksum(out: &mut [u8], len: usize) -> usize {
    out[2..4].copy_from_slice(&[0, 0]);
    let cksum = ipv4_header_checksum(&out[..len]);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    len
}

pub fn build_echo_reply(out: &mut [u8], id: u16, seq: u16, data: &[u8]) -> usize {
    out[0] = TYPE_ECHO_REPLY;
    out[1] = 0;
    out[4..6].copy_from_slice(&id.to_be_bytes());
    out[6..8].copy_from_slice(&seq.to_be_bytes());
    out[8..8 + data.len()].copy_from_slice(data);
    finish_with_checksum(out, 8 + data.len())
}

/// Build a Destination Unreachable message carrying the offending
/// datagram's IP header plus first 8 bytes of payload (RFC 792 "Internet
/// Header + 64 bits of Original Data Datagram").
pub fn build_dest_unreachable(out: &mut [u8], code: u8, original: &[u8]) -> usize {
    let n = original.len().min(28);
    out[0] = TYPE_DEST_UNREACHABLE;
    out[1] = code;
    out[4..8].copy_from_slice(&[0, 0, 0, 0]);
    out[8..8 + n].copy_from_slice(&original[..n]);
    finish_with_checksum(out, 8 + n)
}

pub fn build_time_exceeded(out: &mut [u8], code: u8, original: &[u8]) -> usize {
    let n = original.len().min(28);
    out[0] = TYPE_TIME_EXCEEDED;
    out[1] = code;
    out[4..8].copy_from_slice(&[0, 0, 0, 0]);
    out[8..8 + n].copy_from_slice(&original[..n]);
    finish_with_checksum(out, 8 + n)
}

/// `true` if this ICMP message type must never itself trigger another error
/// message (RFC 792's loop-prevention rule: no ICMP error in response to an
/// ICMP error, a fragment, or a non-initial-fragment datagram).
pub fn suppresses_error_response(kind: u8) -> bool {
    matches!(kind, TYPE_DEST_UNREACHABLE | TYPE_TIME_EXCEEDED)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EchoKey {
    pub dst: Ipv4Addr,
    pub id: u16,
    pub seq: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_round_trips_into_reply() {
        let mut req = [0u8; 16];
        req[0] = TYPE_ECHO_REQUEST;
        req[4..6].copy_from_slice(&7u16.to_be_bytes());
        req[6..8].copy_from_slice(&1u16.to_be_bytes());
        req[8..16].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let cksum = ipv4_header_checksum(&req);
        req[2..4].copy_from_slice(&cksum.to_be_bytes());
        let parsed = parse(&req).unwrap();
        let (id, seq, data) = match parsed {
            Message::EchoRequest { id, seq, data } => (id, seq, data),
            _ => panic!("expected EchoRequest"),
        };
        let mut reply = [0u8; 16];
        let n = build_echo_reply(&mut reply, id, seq, data);
        assert_eq!(ipv4_header_checksum(&reply[..n]), 0);
        assert_eq!(reply[0], TYPE_ECHO_REPLY);
    }

    #[test]
    fn dest_unreachable_carries_original_header_prefix() {
        let original = [0x45u8; 30];
        let mut out = [0u8; 64];
        let n = build_dest_unreachable(&mut out, CODE_PORT_UNREACHABLE, &original);
        assert_eq!(&out[8..36], &original[..28]);
        assert_eq!(ipv4_header_checksum(&out[..n]), 0);
    }
}
