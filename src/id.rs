//! Node identifiers.
//!
//! A node's identity is the last octet of its resolved IP address, so
//! `10.0.0.7` and `192.168.1.7` both map to node 7.

use std::fmt;
use std::net::IpAddr;

/// Integer identity of a node in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved destination meaning "every live neighbor".
    pub const BROADCAST: NodeId = NodeId(9999);

    /// Derive a node id from the last octet of `ip`.
    pub fn from_ip(ip: IpAddr) -> Self {
        let last = match ip {
            IpAddr::V4(v4) => v4.octets()[3],
            IpAddr::V6(v6) => v6.octets()[15],
        };
        NodeId(u32::from(last))
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            f.pad("*")
        } else {
            fmt::Display::fmt(&self.0, f)
        }
    }
}
