//! Neighbor table: one entry per direct neighbor with its address and, while
//! the link is up, the write half of its TCP connection.
//!
//! Each attached link gets a generation number. A reader task that sees its
//! link die detaches by generation, so it can never drop a newer link that
//! replaced it.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::id::NodeId;
use crate::topology::Topology;

/// Shared write side of one neighbor link.
pub type LinkWriter = Arc<Mutex<OwnedWriteHalf>>;

#[derive(Debug)]
struct NeighborEntry {
    addr: IpAddr,
    link: Option<(u64, LinkWriter)>,
}

#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: BTreeMap<NodeId, NeighborEntry>,
    next_generation: u64,
}

impl NeighborTable {
    pub fn new(topology: &Topology) -> Self {
        let entries = topology
            .neighbors()
            .into_iter()
            .filter_map(|id| topology.addr(id).map(|addr| (id, NeighborEntry { addr, link: None })))
            .collect();
        Self {
            entries,
            next_generation: 0,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn addr(&self, id: NodeId) -> Option<IpAddr> {
        self.entries.get(&id).map(|e| e.addr)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install `writer` as the live link to `id`, replacing any older one.
    /// Returns the link's generation, or `None` if `id` is not a neighbor.
    pub fn attach(&mut self, id: NodeId, writer: LinkWriter) -> Option<u64> {
        let entry = self.entries.get_mut(&id)?;
        let generation = self.next_generation;
        self.next_generation += 1;
        entry.link = Some((generation, writer));
        Some(generation)
    }

    /// Mark the link to `id` down if it is still generation `generation`.
    pub fn detach(&mut self, id: NodeId, generation: u64) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if matches!(entry.link, Some((g, _)) if g == generation) => {
                entry.link = None;
                true
            }
            _ => false,
        }
    }

    /// Drop every live link.
    pub fn detach_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.link = None;
        }
    }

    /// Live link to `id` and its generation.
    pub fn link(&self, id: NodeId) -> Option<(u64, LinkWriter)> {
        self.entries.get(&id).and_then(|e| e.link.clone())
    }

    /// Every live link.
    pub fn live(&self) -> Vec<(NodeId, u64, LinkWriter)> {
        self.entries
            .iter()
            .filter_map(|(&id, e)| e.link.as_ref().map(|(g, w)| (id, *g, Arc::clone(w))))
            .collect()
    }

    pub fn connected(&self) -> usize {
        self.entries.values().filter(|e| e.link.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn writer() -> LinkWriter {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_read, write) = client.unwrap().into_split();
        Arc::new(Mutex::new(write))
    }

    fn table() -> NeighborTable {
        let topo = Topology::parse("10.0.0.1 10.0.0.2 1\n10.0.0.1 10.0.0.3 1\n", [10, 0, 0, 1].into()).unwrap();
        NeighborTable::new(&topo)
    }

    #[test]
    fn built_from_topology_neighbors() {
        let t = table();
        assert_eq!(t.ids().collect::<Vec<_>>(), vec![NodeId(2), NodeId(3)]);
        assert_eq!(t.addr(NodeId(3)), Some([10, 0, 0, 3].into()));
        assert_eq!(t.connected(), 0);
    }

    #[tokio::test]
    async fn attach_rejects_strangers() {
        let mut t = table();
        assert!(t.attach(NodeId(7), writer().await).is_none());
        assert!(t.attach(NodeId(2), writer().await).is_some());
        assert_eq!(t.connected(), 1);
    }

    #[tokio::test]
    async fn stale_generation_cannot_detach_newer_link() {
        let mut t = table();
        let old = t.attach(NodeId(2), writer().await).unwrap();
        let new = t.attach(NodeId(2), writer().await).unwrap();
        assert!(!t.detach(NodeId(2), old));
        assert_eq!(t.connected(), 1);
        assert!(t.detach(NodeId(2), new));
        assert_eq!(t.connected(), 0);
    }
}
