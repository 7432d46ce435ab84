//! Static overlay topology.
//!
//! The topology file lists one link per line:
//!
//! ```text
//! # hostA      hostB      cost
//! alpha.lab    bravo.lab  4
//! 10.0.0.2     10.0.0.3   1
//! ```
//!
//! Blank lines and `#` comments are skipped. Hosts are resolved with the
//! system resolver (IP literals resolve to themselves) and each node's id is
//! the last octet of its address. The node set is fixed once loaded.

use std::collections::BTreeMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;

use thiserror::Error;

use crate::config::INFINITE_COST;
use crate::id::NodeId;
use crate::nbr_cost::NeighborCostTable;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected `hostA hostB cost`, got {text:?}")]
    Malformed { line: usize, text: String },
    #[error("cannot resolve host {0}")]
    Resolve(String),
    #[error("hosts {0} and {1} map to the same node id")]
    IdCollision(IpAddr, IpAddr),
    #[error("local node {0} does not appear in the topology")]
    NotInTopology(NodeId),
}

/// One bidirectional link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub a: NodeId,
    pub b: NodeId,
    pub cost: u32,
}

#[derive(Debug, Clone)]
pub struct Topology {
    me: NodeId,
    addrs: BTreeMap<NodeId, IpAddr>,
    /// Keyed by `(lower id, higher id)`.
    links: BTreeMap<(NodeId, NodeId), u32>,
}

impl Topology {
    /// Read `path` and locate this node by the address `local` resolves to.
    pub fn load(path: impl AsRef<Path>, local: &str) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, resolve(local)?)
    }

    pub fn parse(text: &str, local: IpAddr) -> Result<Self, TopologyError> {
        let mut addrs: BTreeMap<NodeId, IpAddr> = BTreeMap::new();
        let mut links = BTreeMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let malformed = || TopologyError::Malformed {
                line: idx + 1,
                text: raw.to_string(),
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[host_a, host_b, cost] = &fields[..] else {
                return Err(malformed());
            };
            let cost: u32 = cost.parse().map_err(|_| malformed())?;

            let mut ids = [NodeId(0); 2];
            for (slot, host) in ids.iter_mut().zip([host_a, host_b]) {
                let ip = resolve(host)?;
                let id = NodeId::from_ip(ip);
                match addrs.get(&id) {
                    Some(&known) if known != ip => return Err(TopologyError::IdCollision(known, ip)),
                    _ => {
                        addrs.insert(id, ip);
                    }
                }
                *slot = id;
            }
            let [a, b] = ids;
            if a == b {
                return Err(malformed());
            }
            links.insert((a.min(b), a.max(b)), cost);
        }

        let me = NodeId::from_ip(local);
        if !addrs.contains_key(&me) {
            return Err(TopologyError::NotInTopology(me));
        }
        Ok(Self { me, addrs, links })
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    /// Every node id, ascending.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.addrs.keys().copied().collect()
    }

    /// Ids of this node's direct neighbors, ascending.
    pub fn neighbors(&self) -> Vec<NodeId> {
        self.neighbors_of(self.me)
    }

    pub fn neighbors_of(&self, node: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .links
            .keys()
            .filter_map(|&(a, b)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    /// Direct link cost: 0 to itself, [`INFINITE_COST`] when not linked.
    pub fn cost(&self, from: NodeId, to: NodeId) -> u32 {
        if from == to {
            return 0;
        }
        self.links
            .get(&(from.min(to), from.max(to)))
            .copied()
            .unwrap_or(INFINITE_COST)
    }

    pub fn addr(&self, node: NodeId) -> Option<IpAddr> {
        self.addrs.get(&node).copied()
    }

    pub fn local_addr(&self) -> IpAddr {
        // `parse` guarantees `me` is present.
        self.addrs[&self.me]
    }

    pub fn links(&self) -> impl Iterator<Item = Link> + '_ {
        self.links.iter().map(|(&(a, b), &cost)| Link { a, b, cost })
    }

    pub fn neighbor_costs(&self) -> NeighborCostTable {
        NeighborCostTable::new(
            self.me,
            self.neighbors().into_iter().map(|n| (n, self.cost(self.me, n))),
        )
    }

    /// The same topology seen from `node`.
    pub fn from_perspective(&self, node: NodeId) -> Option<Self> {
        self.addrs.contains_key(&node).then(|| Self {
            me: node,
            ..self.clone()
        })
    }
}

/// Resolve a host name or IP literal, preferring IPv4.
pub fn resolve(host: &str) -> Result<IpAddr, TopologyError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let candidates: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|_| TopologyError::Resolve(host.to_string()))?
        .map(|sa| sa.ip())
        .collect();
    candidates
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| TopologyError::Resolve(host.to_string()))
}
