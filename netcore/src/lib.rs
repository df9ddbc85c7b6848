//! Dual-stack (IPv4/IPv6) embedded networking engine: frame pipeline, ARP/NDP
//! neighbor resolution, IGMP/MLD multicast membership, DHCPv4 and AutoIP
//! address configuration, and a TCP engine, all driven by an explicit tick
//! rather than a wall clock so the whole stack can be advanced
//! deterministically from a test harness or a bare-metal timer interrupt.
//!
//! Grounded on the `sw/net` crate (single-interface Ethernet/ARP/
//! IPv4/ICMPv4/UDP handling over a COM-bus driver); generalized here to a
//! dual-stack, multi-protocol engine, with its
//! raw-pointer Rx/Tx buffer handling replaced by the move-only [`frame::Frame`]
//! ownership discipline and its global interface state replaced by the
//! explicit [`stack::Stack`] context object.
#![no_std]

extern crate alloc;

pub mod addr;
pub mod arp;
pub mod autoip;
pub mod checksum;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod eth;
pub mod frame;
pub mod hostname;
pub mod icmpv4;
pub mod icmpv6;
pub mod iface;
pub mod igmp;
pub mod ip4_frag;
pub mod ip6_frag;
pub mod ipv4;
pub mod ipv6;
pub mod mld;
pub mod ndp;
pub mod prng;
pub mod stack;
pub mod tcp;
pub mod timers;
pub mod udp;

pub use error::{NetError, NetResult};
