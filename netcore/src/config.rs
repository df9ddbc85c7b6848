//! Configuration surface: compile-time/ROM tables describing
//! enabled interfaces and per-module capacity/timeout knobs. Built the way
//! `sw/net`'s own ROM tables are built — plain `const fn` constructors and
//! field literals, no configuration-framework crate.

use crate::addr::{Ipv4Addr, Ipv6Addr, MacAddr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceClass {
    Ethernet,
    WiFi,
}

#[derive(Clone, Copy, Debug)]
pub struct Ipv4Config {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
    pub mtu: u16,
    pub dhcp_enabled: bool,
}

impl Ipv4Config {
    pub const fn unconfigured(mtu: u16) -> Self {
        Ipv4Config {
            addr: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: [Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED],
            mtu,
            dhcp_enabled: true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Ipv6Config {
    pub link_local: Ipv6Addr,
    pub static_addr: Option<Ipv6Addr>,
    pub temp_addr: Option<Ipv6Addr>,
    pub default_gateway: Option<Ipv6Addr>,
    pub dns: [Option<Ipv6Addr>; 2],
    pub prefix_len: u8,
    pub hop_limit: u8,
    pub mtu: u16,
}

impl Ipv6Config {
    pub const fn unconfigured(mtu: u16) -> Self {
        Ipv6Config {
            link_local: Ipv6Addr::UNSPECIFIED,
            static_addr: None,
            temp_addr: None,
            default_gateway: None,
            dns: [None, None],
            prefix_len: 64,
            hop_limit: 64,
            mtu,
        }
    }
}

/// Per-instance DHCP client options.
#[derive(Clone, Debug)]
pub struct DhcpOptions {
    pub vendor_class_id: Option<&'static str>,
    pub request_bootfile: bool,
    pub request_ntp: bool,
    /// `SetOption` client-identifier override; per-instance, unlike
    /// `sw/net`'s module-level static.
    pub client_id: Option<heapless::Vec<u8, 19>>,
}

impl DhcpOptions {
    pub const fn defaults() -> Self {
        DhcpOptions { vendor_class_id: None, request_bootfile: false, request_ntp: false, client_id: None }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ArpConfig {
    pub cache_size: usize,
    pub cache_timeout_s: u32,
    pub pending_timeout_s: u32,
    pub max_retries: u8,
}

impl ArpConfig {
    pub const DEFAULT: ArpConfig =
        ArpConfig { cache_size: 8, cache_timeout_s: 1200, pending_timeout_s: 2, max_retries: 5 };
}

#[derive(Clone, Copy, Debug)]
pub struct NdpConfig {
    pub cache_size: usize,
    pub cache_timeout_s: u32,
    pub pending_timeout_s: u32,
    pub max_retries: u8,
    pub prefix_cache_size: usize,
}

impl NdpConfig {
    pub const DEFAULT: NdpConfig = NdpConfig {
        cache_size: 8,
        cache_timeout_s: 1200,
        pending_timeout_s: 2,
        max_retries: 5,
        prefix_cache_size: 4,
    };
}

#[derive(Clone, Copy, Debug)]
pub struct McastConfig {
    pub max_groups: usize,
}

impl McastConfig {
    pub const DEFAULT: McastConfig = McastConfig { max_groups: 8 };
}

#[derive(Clone, Copy, Debug)]
pub struct TcpConfig {
    pub max_sockets: usize,
    pub default_mss: u16,
    pub dynamic_port_lo: u16,
    pub dynamic_port_hi: u16,
    pub recv_window: u16,
}

impl TcpConfig {
    pub const DEFAULT: TcpConfig = TcpConfig {
        max_sockets: 8,
        default_mss: 1460,
        dynamic_port_lo: 49152,
        dynamic_port_hi: 65535,
        recv_window: 4096,
    };
}

#[derive(Clone, Debug)]
pub struct InterfaceConfig {
    pub class: InterfaceClass,
    pub mac: Option<MacAddr>,
    pub vlan_id: u16,
    pub ipv4: Option<Ipv4Config>,
    pub ipv6: Option<Ipv6Config>,
    pub dhcp: Option<DhcpOptions>,
}

impl InterfaceConfig {
    pub const fn ethernet(mtu: u16) -> Self {
        InterfaceConfig {
            class: InterfaceClass::Ethernet,
            mac: None,
            vlan_id: 0,
            ipv4: Some(Ipv4Config::unconfigured(mtu)),
            ipv6: Some(Ipv6Config::unconfigured(mtu)),
            dhcp: Some(DhcpOptions::defaults()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StackConfig {
    pub arp: ArpConfig,
    pub ndp: NdpConfig,
    pub igmp: McastConfig,
    pub mld: McastConfig,
    pub tcp: TcpConfig,
    pub ip4_reassembly_sessions: usize,
    pub ip4_reassembly_timeout_s: u32,
    pub ip6_reassembly_sessions: usize,
    pub ip6_reassembly_timeout_s: u32,
}

impl StackConfig {
    pub const DEFAULT: StackConfig = StackConfig {
        arp: ArpConfig::DEFAULT,
        ndp: NdpConfig::DEFAULT,
        igmp: McastConfig::DEFAULT,
        mld: McastConfig::DEFAULT,
        tcp: TcpConfig::DEFAULT,
        ip4_reassembly_sessions: 4,
        ip4_reassembly_timeout_s: 15,
        ip6_reassembly_sessions: 4,
        ip6_reassembly_timeout_s: 15,
    };
}
