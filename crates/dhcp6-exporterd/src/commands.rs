//! NX-OS CLI command builders

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv6Addr;

/// Uptime probe used by the heartbeat.
pub const SHOW_VERSION: &str = "show version";

/// Neighbor table dump used to map hardware addresses to interfaces.
pub const SHOW_IPV6_NEIGHBOR: &str = "show ipv6 neighbor";

static VLAN_IF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^vlan\d+$").expect("Invalid regex pattern"));

/// Returns true for switch VLAN interface names such as `Vlan100`.
pub fn is_vlan_interface(name: &str) -> bool {
    VLAN_IF_RE.is_match(name)
}

/// `<addr>/128`
pub fn host_prefix(addr: &Ipv6Addr) -> String {
    format!("{}/128", addr)
}

/// `<prefix>/<len>`
pub fn network_prefix(prefix: &Ipv6Addr, len: u8) -> String {
    format!("{}/{}", prefix, len)
}

/// Build route table lookup command
pub fn build_show_route_cmd(destination: &str) -> String {
    format!("show ipv6 route {}", destination)
}

/// Build static route command
///
/// `via` is either an interface name or a next-hop address.
pub fn build_route_cmd(destination: &str, via: &str) -> String {
    format!("ipv6 route {} {}", destination, via)
}

/// Build static route removal command
pub fn build_no_route_cmd(destination: &str, via: &str) -> String {
    format!("no ipv6 route {} {}", destination, via)
}

/// Build neighbor cache eviction command
pub fn build_clear_neighbor_cmd(if_name: &str) -> String {
    format!("clear ipv6 neighbor {} force-delete", if_name)
}
